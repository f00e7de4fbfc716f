//! Command-line interface.
//!
//! clap handles the flag surface; the `key=value` sub-specs (engine, opening
//! book, sample, SPRT) are parsed by their owning modules so library users
//! get the same syntax.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use crate::options::{EngineOptions, Options, SampleParams};
use crate::position::{GameRule, OpeningFormat};
use crate::sprt::SprtParams;

/// Tournament arena for Gomocup protocol engines.
#[derive(Parser, Debug)]
#[command(name = "gomoku-arena")]
#[command(about = "Play concurrent gomoku/renju tournaments between engines")]
#[command(version)]
pub struct Cli {
    /// Engine spec, repeat once per engine:
    /// `cmd=PATH [name=N] [tc=M[/T][+I]] [depth=D] [nodes=N] [maxmemory=B]
    /// [thread=T] [tolerance=S] [option.K=V]...`
    #[arg(long = "engine", value_name = "SPEC", required = true)]
    pub engines: Vec<String>,

    /// Engine spec applied to every engine on top of its own
    #[arg(long, value_name = "SPEC")]
    pub each: Option<String>,

    /// Games per pairing per round (seats alternate between games)
    #[arg(long, default_value_t = 1)]
    pub games: usize,

    /// Rounds (full passes over all pairings)
    #[arg(long, default_value_t = 1)]
    pub rounds: usize,

    /// Worker threads, each playing one game at a time
    #[arg(long, default_value_t = 1)]
    pub concurrency: usize,

    /// Engine 0 plays everyone else instead of a full round-robin
    #[arg(long)]
    pub gauntlet: bool,

    /// With --gauntlet: export only games that engine 0 lost
    #[arg(long = "loseonly")]
    pub lose_only: bool,

    /// Board extent, 5 to 22
    #[arg(long, default_value_t = 15)]
    pub boardsize: usize,

    /// Game rule: 0 five-or-more, 1 exact five, 4 renju
    #[arg(long, default_value_t = 0)]
    pub rule: u32,

    /// Opening book:
    /// `file=PATH[,type=offset|pos][,order=sequential|random][,srand=N]`
    #[arg(long, value_name = "SPEC")]
    pub openings: Option<String>,

    /// Play each opening twice with seats swapped
    #[arg(long)]
    pub repeat: bool,

    /// Transform each opening by a symmetry chosen from its cycle round
    #[arg(long)]
    pub transform: bool,

    /// PGN output file
    #[arg(long, value_name = "FILE")]
    pub pgn: Option<PathBuf>,

    /// SGF output file
    #[arg(long, value_name = "FILE")]
    pub sgf: Option<PathBuf>,

    /// Engine message transcript output file
    #[arg(long, value_name = "FILE")]
    pub msg: Option<PathBuf>,

    /// Training samples: `[file=PATH][,freq=F][,format=csv|bin|bin_gz]`
    #[arg(long, value_name = "SPEC")]
    pub sample: Option<String>,

    /// Resign when one engine reports score <= -SCORE for COUNT of its moves
    #[arg(long, num_args = 2, value_names = ["COUNT", "SCORE"])]
    pub resign: Option<Vec<u32>>,

    /// Adjudicate a draw when |score| <= SCORE for 2*COUNT consecutive plies
    #[arg(long, num_args = 2, value_names = ["COUNT", "SCORE"])]
    pub draw: Option<Vec<u32>>,

    /// Adjudicate a draw once this many stones are on the board
    #[arg(long = "drawafter", value_name = "MOVES", default_value_t = 0)]
    pub draw_after: usize,

    /// Early stopping: `elo0=E0,elo1=E1[,alpha=A][,beta=B]`
    #[arg(long, value_name = "SPEC")]
    pub sprt: Option<String>,

    /// Resynchronize with BOARD before every move instead of TURN
    #[arg(long = "sendbyboard")]
    pub send_by_board: bool,

    /// Write per-worker protocol logs and a trace file
    #[arg(long)]
    pub log: bool,

    /// Print boards and engine chatter (implies --log)
    #[arg(long)]
    pub debug: bool,

    /// Abort the tournament on engine startup misbehavior
    #[arg(long = "fatalerror")]
    pub fatal_error: bool,
}

impl Cli {
    /// Resolve the flag surface into validated tournament configuration.
    pub fn into_config(self) -> Result<(Options, Vec<EngineOptions>)> {
        let mut options = Options {
            games: self.games,
            rounds: self.rounds,
            concurrency: self.concurrency,
            gauntlet: self.gauntlet,
            save_lose_only: self.lose_only,
            board_size: self.boardsize,
            repeat: self.repeat,
            transform: self.transform,
            pgn: self.pgn,
            sgf: self.sgf,
            msg: self.msg,
            force_draw_after: self.draw_after,
            use_turn: !self.send_by_board,
            log: self.log || self.debug,
            debug: self.debug,
            fatal_error: self.fatal_error,
            ..Options::default()
        };

        options.rule = GameRule::from_code(self.rule)
            .with_context(|| format!("unsupported game rule code '{}'", self.rule))?;

        if let Some(spec) = &self.openings {
            parse_openings_spec(spec, &mut options)?;
        }
        if let Some(spec) = &self.sample {
            options.sample = Some(SampleParams::parse_spec(spec)?);
        }
        if let Some(spec) = &self.sprt {
            options.sprt = Some(SprtParams::parse_spec(spec)?);
        }
        if let Some(pair) = &self.resign {
            options.resign_count = pair[0];
            options.resign_score = pair[1] as i32;
        }
        if let Some(pair) = &self.draw {
            options.draw_count = pair[0];
            options.draw_score = pair[1] as i32;
        }

        let mut engines = Vec::with_capacity(self.engines.len());
        for spec in &self.engines {
            let mut eo = EngineOptions::parse_spec(spec)?;
            if let Some(each) = &self.each {
                eo.merge_spec(each)?;
            }
            engines.push(eo);
        }

        options.validate(&engines)?;
        Ok((options, engines))
    }
}

fn parse_openings_spec(spec: &str, options: &mut Options) -> Result<()> {
    for token in spec.split(',').filter(|t| !t.is_empty()) {
        let Some((key, value)) = token.split_once('=') else {
            anyhow::bail!("expected key=value in openings spec, got '{token}'");
        };
        match key {
            "file" => options.openings = Some(PathBuf::from(value)),
            "type" => {
                options.opening_format = match value {
                    "offset" => OpeningFormat::Offset,
                    "pos" => OpeningFormat::Pos,
                    other => anyhow::bail!("unknown opening type '{other}'"),
                }
            }
            "order" => {
                options.random = match value {
                    "random" => true,
                    "sequential" => false,
                    other => anyhow::bail!("unknown opening order '{other}'"),
                }
            }
            "srand" => options.srand = value.parse().context("bad srand")?,
            other => anyhow::bail!("unknown key '{other}' in openings spec"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SampleFormat;

    fn parse(args: &[&str]) -> Result<(Options, Vec<EngineOptions>)> {
        Cli::try_parse_from(
            std::iter::once("gomoku-arena").chain(args.iter().copied()),
        )
        .map_err(anyhow::Error::from)?
        .into_config()
    }

    #[test]
    fn minimal_invocation() {
        let (options, engines) =
            parse(&["--engine", "cmd=./a", "--engine", "cmd=./b"]).unwrap();
        assert_eq!(engines.len(), 2);
        assert_eq!(options.board_size, 15);
        assert!(options.use_turn);
        assert!(!options.gauntlet);
    }

    #[test]
    fn each_applies_to_all_engines() {
        let (_, engines) = parse(&[
            "--engine",
            "cmd=./a",
            "--engine",
            "cmd=./b name=bee",
            "--each",
            "tc=10/1 option.hash=64",
        ])
        .unwrap();
        for eo in &engines {
            assert_eq!(eo.timeout_match, 10_000);
            assert_eq!(eo.timeout_turn, 1_000);
            assert_eq!(eo.options, vec![("hash".to_string(), "64".to_string())]);
        }
        assert_eq!(engines[1].name, "bee");
    }

    #[test]
    fn full_surface_parses() {
        let (options, engines) = parse(&[
            "--engine",
            "cmd=./a",
            "--engine",
            "cmd=./b",
            "--games",
            "4",
            "--rounds",
            "2",
            "--concurrency",
            "3",
            "--rule",
            "4",
            "--boardsize",
            "19",
            "--openings",
            "file=book.txt,type=pos,order=random,srand=99",
            "--repeat",
            "--transform",
            "--sample",
            "format=bin_gz",
            "--sprt",
            "elo0=0,elo1=10",
            "--draw",
            "10",
            "2",
            "--resign",
            "4",
            "500",
            "--drawafter",
            "200",
            "--sendbyboard",
            "--pgn",
            "games.pgn",
        ])
        .unwrap();
        assert_eq!(engines.len(), 2);
        assert_eq!(options.games, 4);
        assert_eq!(options.rounds, 2);
        assert_eq!(options.concurrency, 3);
        assert_eq!(options.rule, GameRule::Renju);
        assert_eq!(options.board_size, 19);
        assert_eq!(options.opening_format, OpeningFormat::Pos);
        assert!(options.random);
        assert_eq!(options.srand, 99);
        assert!(options.repeat && options.transform);
        assert_eq!(options.sample.as_ref().unwrap().format, SampleFormat::BinGz);
        assert!(options.sprt.is_some());
        assert_eq!((options.draw_count, options.draw_score), (10, 2));
        assert_eq!((options.resign_count, options.resign_score), (4, 500));
        assert_eq!(options.force_draw_after, 200);
        assert!(!options.use_turn);
        assert_eq!(options.pgn.as_deref().unwrap().to_str(), Some("games.pgn"));
    }

    #[test]
    fn config_errors_are_fatal() {
        // one engine
        assert!(parse(&["--engine", "cmd=./a"]).is_err());
        // bad rule code
        assert!(parse(&["--engine", "cmd=./a", "--engine", "cmd=./b", "--rule", "2"]).is_err());
        // SPRT with three engines
        assert!(parse(&[
            "--engine",
            "cmd=./a",
            "--engine",
            "cmd=./b",
            "--engine",
            "cmd=./c",
            "--sprt",
            "elo0=0,elo1=5",
        ])
        .is_err());
        // invalid SPRT interval
        assert!(parse(&[
            "--engine",
            "cmd=./a",
            "--engine",
            "cmd=./b",
            "--sprt",
            "elo0=5,elo1=0",
        ])
        .is_err());
    }

    #[test]
    fn debug_implies_log() {
        let (options, _) =
            parse(&["--engine", "cmd=./a", "--engine", "cmd=./b", "--debug"]).unwrap();
        assert!(options.log);
        assert!(options.debug);
    }
}
