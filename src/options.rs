//! Tournament and per-engine configuration.
//!
//! Plain data, validated once at startup; everything past this point treats a
//! bad option as a programming error. The clap front-end in `cli` maps the
//! command line onto these structs, and library users can fill them directly.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};

use crate::position::{GameRule, OpeningFormat};
use crate::sprt::SprtParams;
use crate::util::tokenize_command;

/// Training-sample output settings.
#[derive(Debug, Clone)]
pub struct SampleParams {
    pub file: Option<PathBuf>,
    /// Probability of recording each played move.
    pub freq: f64,
    pub format: SampleFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Csv,
    Bin,
    /// Packed binary wrapped in a gzip stream.
    BinGz,
}

impl Default for SampleParams {
    fn default() -> Self {
        SampleParams {
            file: None,
            freq: 1.0,
            format: SampleFormat::Csv,
        }
    }
}

impl SampleParams {
    /// Parse a `file=,freq=,format=` sample spec.
    pub fn parse_spec(spec: &str) -> Result<SampleParams> {
        let mut sp = SampleParams::default();
        for token in spec.split(',').filter(|t| !t.is_empty()) {
            let (key, value) = token
                .split_once('=')
                .with_context(|| format!("expected key=value in sample spec, got '{token}'"))?;
            match key {
                "file" => sp.file = Some(PathBuf::from(value)),
                "freq" => sp.freq = value.parse().context("bad sample freq")?,
                "format" => {
                    sp.format = match value {
                        "csv" => SampleFormat::Csv,
                        "bin" => SampleFormat::Bin,
                        "bin_gz" => SampleFormat::BinGz,
                        other => bail!("unknown sample format '{other}'"),
                    }
                }
                other => bail!("unknown key '{other}' in sample spec"),
            }
        }
        if sp.file.is_none() {
            let ext = match sp.format {
                SampleFormat::Csv => "csv",
                SampleFormat::Bin => "bin",
                SampleFormat::BinGz => "bin.gz",
            };
            sp.file = Some(PathBuf::from(format!("sample.{ext}")));
        }
        Ok(sp)
    }
}

/// Global tournament options.
#[derive(Debug, Clone)]
pub struct Options {
    pub openings: Option<PathBuf>,
    pub opening_format: OpeningFormat,
    /// Shuffle opening order with a seeded permutation.
    pub random: bool,
    pub srand: u64,
    pub pgn: Option<PathBuf>,
    pub sgf: Option<PathBuf>,
    pub msg: Option<PathBuf>,
    pub sample: Option<SampleParams>,
    pub sprt: Option<SprtParams>,
    pub concurrency: usize,
    pub games: usize,
    pub rounds: usize,
    pub resign_count: u32,
    pub resign_score: i32,
    pub draw_count: u32,
    pub draw_score: i32,
    /// Hard ply ceiling: adjudicate a draw once this many stones are down.
    pub force_draw_after: usize,
    pub board_size: usize,
    pub rule: GameRule,
    /// Prefer `TURN` over a full `BOARD` resync when possible.
    pub use_turn: bool,
    /// Play each opening twice with the seats swapped.
    pub repeat: bool,
    /// Rotate/mirror openings by the opening cycle round.
    pub transform: bool,
    pub gauntlet: bool,
    /// In gauntlet mode, export only games the challenger seat lost.
    pub save_lose_only: bool,
    /// Per-worker protocol logs.
    pub log: bool,
    pub debug: bool,
    /// Treat engine startup misbehavior as fatal instead of scoring it.
    pub fatal_error: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            openings: None,
            opening_format: OpeningFormat::Offset,
            random: false,
            srand: 0,
            pgn: None,
            sgf: None,
            msg: None,
            sample: None,
            sprt: None,
            concurrency: 1,
            games: 1,
            rounds: 1,
            resign_count: 0,
            resign_score: 0,
            draw_count: 0,
            draw_score: 0,
            force_draw_after: 0,
            board_size: 15,
            rule: GameRule::FiveOrMore,
            use_turn: true,
            repeat: false,
            transform: false,
            gauntlet: false,
            save_lose_only: false,
            log: false,
            debug: false,
            fatal_error: false,
        }
    }
}

impl Options {
    pub fn validate(&self, engines: &[EngineOptions]) -> Result<()> {
        if engines.len() < 2 {
            bail!("at least 2 engines are needed");
        }
        if self.sprt.is_some() && engines.len() != 2 {
            bail!("SPRT requires exactly 2 engines");
        }
        if let Some(sprt) = &self.sprt {
            sprt.validate()?;
        }
        if !(5..=22).contains(&self.board_size) {
            bail!("board size must be between 5 and 22");
        }
        if self.games < 1 || self.rounds < 1 {
            bail!("games and rounds must be at least 1");
        }
        if self.concurrency < 1 {
            bail!("concurrency must be at least 1");
        }
        for (i, eo) in engines.iter().enumerate() {
            if eo.cmd.is_empty() {
                bail!("engine {i} is missing cmd=");
            }
        }
        Ok(())
    }

    /// Print the effective configuration, one `key = value` per line.
    pub fn print_banner(&self, engines: &[EngineOptions]) {
        let path = |p: &Option<PathBuf>| {
            p.as_ref().map(|p| p.display().to_string()).unwrap_or_default()
        };
        println!("---------------------------");
        println!("Global options:");
        println!("openings = {}", path(&self.openings));
        if self.openings.is_some() {
            let fmt = match self.opening_format {
                OpeningFormat::Offset => "offset",
                OpeningFormat::Pos => "pos",
            };
            println!("openingFormat = {fmt}");
            println!("random = {}", self.random);
        }
        println!("boardSize = {}", self.board_size);
        println!("rule = {}", self.rule.code());
        println!("pgn = {}", path(&self.pgn));
        println!("sgf = {}", path(&self.sgf));
        println!("msg = {}", path(&self.msg));
        if let Some(sp) = &self.sample {
            println!("sample = {}", path(&sp.file));
            println!("sample.freq = {}", sp.freq);
        }
        println!("sprt = {}", self.sprt.is_some());
        println!("concurrency = {}", self.concurrency);
        println!("games = {}", self.games);
        println!("rounds = {}", self.rounds);
        println!("gauntlet = {}", self.gauntlet);
        if self.gauntlet {
            println!("loseonly = {}", self.save_lose_only);
        }
        println!("repeat = {}", self.repeat);
        println!("transform = {}", self.transform);
        println!("resign = {} {}", self.resign_count, self.resign_score);
        println!("draw = {} {}", self.draw_count, self.draw_score);
        println!("drawAfter = {}", self.force_draw_after);
        println!("log = {}", self.log);
        println!("debug = {}", self.debug);
        for (i, eo) in engines.iter().enumerate() {
            println!("---------------------------");
            println!("Engine {i} options:");
            println!("name = {}", eo.name);
            println!("cmd = {}", eo.cmd);
            println!("timeoutTurn = {}", eo.timeout_turn);
            println!("timeoutMatch = {}", eo.timeout_match);
            println!("increment = {}", eo.increment);
            println!("depth = {}", eo.depth);
            println!("nodes = {}", eo.nodes);
            println!("maxMemory = {}", eo.max_memory);
            println!("thread = {}", eo.num_threads);
            println!("tolerance = {}", eo.tolerance);
            for (key, value) in &eo.options {
                println!("option.{key} = {value}");
            }
        }
        println!("---------------------------");
    }
}

/// One roster entry: how to start an engine and what limits to announce.
///
/// Times are milliseconds; zero means "no limit" throughout, matching the
/// Gomocup convention of `timeout_match 0`.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub cmd: String,
    pub name: String,
    /// Custom `INFO` pairs forwarded verbatim.
    pub options: Vec<(String, String)>,
    pub timeout_turn: i64,
    pub timeout_match: i64,
    pub increment: i64,
    pub nodes: i64,
    pub depth: i32,
    pub num_threads: i32,
    pub max_memory: i64,
    /// Slack granted past every deadline before the watchdog fires.
    pub tolerance: i64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            cmd: String::new(),
            name: String::new(),
            options: Vec::new(),
            timeout_turn: 0,
            timeout_match: 0,
            increment: 0,
            nodes: 0,
            depth: 0,
            num_threads: 1,
            // 350 MB, the Gomocup default
            max_memory: 367_001_600,
            tolerance: 3000,
        }
    }
}

impl EngineOptions {
    /// Parse a space-separated `key=value` engine spec, e.g.
    /// `cmd="./my engine" name=foo tc=60/5+0.1 option.hash=128`.
    pub fn parse_spec(spec: &str) -> Result<EngineOptions> {
        let mut eo = EngineOptions::default();
        eo.merge_spec(spec)?;
        Ok(eo)
    }

    /// Apply a spec's keys on top of the current values (used by `--each`).
    pub fn merge_spec(&mut self, spec: &str) -> Result<()> {
        for token in tokenize_command(spec) {
            let (key, value) = token
                .split_once('=')
                .with_context(|| format!("expected key=value in engine spec, got '{token}'"))?;
            match key {
                "cmd" => self.cmd = value.to_string(),
                "name" => self.name = value.to_string(),
                "tc" => self.parse_time_control(value)?,
                "depth" => self.depth = value.parse().context("bad depth")?,
                "nodes" => self.nodes = value.parse().context("bad nodes")?,
                "maxmemory" => self.max_memory = value.parse().context("bad maxmemory")?,
                "thread" => self.num_threads = value.parse().context("bad thread")?,
                "tolerance" => {
                    let secs: f64 = value.parse().context("bad tolerance")?;
                    self.tolerance = (secs * 1000.0) as i64;
                }
                _ => match key.strip_prefix("option.") {
                    Some(name) => self.options.push((name.to_string(), value.to_string())),
                    None => bail!("unknown key '{key}' in engine spec"),
                },
            }
        }
        Ok(())
    }

    /// Gomocup time control: `matchtime[/turntime][+increment]`, seconds.
    /// Without a turn time, the turn limit equals the match limit.
    fn parse_time_control(&mut self, tc: &str) -> Result<()> {
        let (left, inc) = match tc.split_once('+') {
            Some((left, inc)) => (left, inc.parse::<f64>().context("bad increment")?),
            None => (tc, 0.0),
        };
        let (match_time, turn_time) = match left.split_once('/') {
            Some((m, t)) => (
                m.parse::<f64>().context("bad match time")?,
                t.parse::<f64>().context("bad turn time")?,
            ),
            None => {
                let m = left.parse::<f64>().context("bad match time")?;
                (m, m)
            }
        };
        self.timeout_match = (match_time * 1000.0) as i64;
        self.timeout_turn = (turn_time * 1000.0) as i64;
        self.increment = (inc * 1000.0) as i64;
        Ok(())
    }
}
