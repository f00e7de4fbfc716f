//! Driver for one engine child process.
//!
//! Owns the child and both pipe ends, speaks the Gomocup line protocol, and
//! cooperates with the worker's deadline watchdog: every blocking read is
//! covered by an armed deadline whose callback signals the child, so a hung
//! engine turns into end-of-stream on our side rather than a stuck worker.
//!
//! The driver is in one of three states: never started / terminated
//! (`Down`), alive with open pipes (`Running`), or dead with a pid still to
//! reap (`Crashed`). Transitions happen only in `start`, `terminate` and on
//! the first failed read or write; a crashed engine stays visibly crashed
//! until the worker restarts it before the next game.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::process::CommandExt;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tracing::{debug, info, warn};

use crate::position::Position;
use crate::util::{monotonic_msec, split_cwd_run, tokenize_command};
use crate::worker::{Deadline, OverdueCallback, Worker, WorkerLog};

/// Per-move report assembled while an engine thinks.
#[derive(Debug, Clone, Copy, Default)]
pub struct MoveInfo {
    pub score: i32,
    pub depth: i32,
    /// Thinking time for this move, milliseconds.
    pub time: i64,
}

/// Extracts score and depth from an engine `MESSAGE` line.
///
/// The protocol does not standardize thinking output, so the default
/// [`NullInfoParser`] leaves score and depth at zero, so the
/// score-based draw and resign adjudications never trigger unless a parser
/// matching the engines' message format is installed.
pub trait InfoParser: Send + Sync {
    fn parse(&self, line: &str, info: &mut MoveInfo);
}

/// The inert default parser.
pub struct NullInfoParser;

impl InfoParser for NullInfoParser {
    fn parse(&self, _line: &str, info: &mut MoveInfo) {
        info.score = 0;
        info.depth = 0;
    }
}

enum State {
    Down,
    Running {
        child: Child,
        stdin: ChildStdin,
        stdout: BufReader<ChildStdout>,
    },
    /// Pipes are gone but the child has not been reaped yet.
    Crashed { child: Child },
}

pub struct Engine {
    pub name: String,
    worker_id: usize,
    deadline: Arc<Deadline>,
    log: Option<WorkerLog>,
    debug: bool,
    info_parser: Arc<dyn InfoParser>,
    tolerance: i64,
    state: State,
}

impl Engine {
    pub fn new(worker: &Worker, debug: bool, info_parser: Arc<dyn InfoParser>) -> Engine {
        Engine {
            name: String::new(),
            worker_id: worker.id,
            deadline: worker.deadline.clone(),
            log: worker.log.clone(),
            debug,
            info_parser,
            tolerance: 0,
            state: State::Down,
        }
    }

    /// Started and not yet terminated (possibly crashed).
    pub fn is_ok(&self) -> bool {
        !matches!(self.state, State::Down)
    }

    pub fn is_crashed(&self) -> bool {
        matches!(self.state, State::Crashed { .. })
    }

    fn pid(&self) -> Option<i32> {
        match &self.state {
            State::Running { child, .. } | State::Crashed { child } => Some(child.id() as i32),
            State::Down => None,
        }
    }

    /// A deadline callback that nudges the child with SIGTERM. Runs on the
    /// supervisor thread, so it must not touch driver state: the worker
    /// observes the resulting end-of-stream and transitions itself.
    fn kill_on_overdue(&self) -> Option<OverdueCallback> {
        let pid = self.pid()?;
        let engine = self.name.clone();
        let worker_id = self.worker_id;
        Some(Box::new(move || {
            warn!(worker = worker_id, engine = %engine, pid, "deadline expired, terminating engine");
            unsafe {
                libc::kill(pid, libc::SIGTERM);
            }
        }))
    }

    /// Spawn the engine and complete the `ABOUT` handshake.
    ///
    /// `cmd` is parsed with quote/escape rules so paths may contain spaces; a
    /// qualified path runs from its own directory. Spawn failures are fatal
    /// for the tournament (the roster is wrong), while an engine that dies
    /// during the handshake is merely left in the crashed state to be scored
    /// at its first move.
    pub fn start(&mut self, cmd: &str, name: &str, tolerance: i64) -> Result<()> {
        let argv = tokenize_command(cmd);
        if argv.is_empty() {
            bail!("[{}] missing command to start engine", self.worker_id);
        }
        self.name = name.to_string();
        self.tolerance = tolerance;

        let (cwd, run) = split_cwd_run(&argv[0]);
        let mut command = Command::new(&run);
        command
            .args(&argv[1..])
            .current_dir(&cwd)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped());

        // In the child, after stdio is plugged: die with the parent, and
        // optionally fold stderr into the stdout pipe so engine complaints
        // land in the worker log instead of the terminal.
        let merge_stderr = self.log.is_some();
        unsafe {
            command.pre_exec(move || {
                libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGHUP);
                if merge_stderr {
                    libc::dup2(libc::STDOUT_FILENO, libc::STDERR_FILENO);
                }
                Ok(())
            });
        }

        let mut child = command
            .spawn()
            .with_context(|| format!("[{}] failed to start engine '{cmd}'", self.worker_id))?;
        let stdin = child.stdin.take().expect("stdin was piped");
        let stdout = BufReader::new(child.stdout.take().expect("stdout was piped"));
        debug!(worker = self.worker_id, pid = child.id(), cmd, "spawned engine");
        self.state = State::Running {
            child,
            stdin,
            stdout,
        };

        self.parse_about(cmd);
        Ok(())
    }

    /// Stop the engine and release its slot.
    ///
    /// Cooperative shutdown (`force = false`) sends `END` and waits for the
    /// child under a tolerance deadline whose callback escalates to SIGTERM;
    /// `force = true` kills outright. Either way the pipes close, the child
    /// is reaped, and the driver returns to `Down`. A driver that never
    /// started is a no-op.
    pub fn terminate(&mut self, force: bool) {
        if !self.is_ok() {
            return;
        }

        if !force {
            self.deadline.set(
                &self.name,
                monotonic_msec() + self.tolerance,
                "exit",
                self.kill_on_overdue(),
            );
            self.write_line("END");
        }

        match std::mem::replace(&mut self.state, State::Down) {
            State::Running {
                mut child,
                stdin,
                stdout,
            } => {
                drop(stdin);
                drop(stdout);
                if force {
                    let _ = child.kill();
                }
                let _ = child.wait();
            }
            State::Crashed { mut child } => {
                if force {
                    let _ = child.kill();
                }
                let _ = child.wait();
            }
            State::Down => {}
        }

        if !force {
            self.deadline.clear();
        }
        debug!(worker = self.worker_id, engine = %self.name, force, "engine terminated");
    }

    /// Send one protocol line. A failed write or flush marks the engine
    /// crashed instead of aborting the worker.
    pub fn write_line(&mut self, line: &str) {
        let State::Running { stdin, .. } = &mut self.state else {
            return;
        };
        let result = stdin
            .write_all(line.as_bytes())
            .and_then(|_| stdin.write_all(b"\n"))
            .and_then(|_| stdin.flush());
        if let Err(err) = result {
            warn!(worker = self.worker_id, engine = %self.name, %err, "write to engine failed");
            self.mark_crashed();
            return;
        }
        self.mirror(&format!("{} <- {line}", self.name));
    }

    /// Read one line into `line`. `false` means end-of-stream: the engine
    /// crashed or was killed by the watchdog; the driver is left crashed
    /// either way, after waiting out any in-flight watchdog callback so the
    /// caller sees a settled state.
    pub fn read_line(&mut self, line: &mut String) -> bool {
        line.clear();
        let State::Running { stdout, .. } = &mut self.state else {
            return false;
        };
        match stdout.read_line(line) {
            Ok(n) if n > 0 => {
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
                self.mirror(&format!("{} -> {line}", self.name));
                true
            }
            _ => {
                // If the watchdog is mid-kill, let it finish before we
                // transition, so crash classification is not racy.
                self.deadline.wait_callback_done();
                self.mark_crashed();
                false
            }
        }
    }

    /// Drive the `START` acknowledgement: read until `OK`, under deadline.
    /// Returns false when the engine crashed, timed out, or answered with
    /// `ERROR`; in the latter case the engine is force-terminated so the
    /// game resolves against it. With `fatal` set, misbehavior here aborts
    /// the tournament instead.
    pub fn wait_for_ok(&mut self, fatal: bool) -> Result<bool> {
        let callback = if fatal { None } else { self.kill_on_overdue() };
        self.deadline
            .set(&self.name, monotonic_msec() + self.tolerance, "start", callback);

        let mut line = String::new();
        let ok = loop {
            if !self.read_line(&mut line) {
                let what = if self.is_crashed() { "crashed" } else { "timed out" };
                if fatal {
                    self.deadline.clear();
                    bail!(
                        "[{}] engine {} {what} before answering START",
                        self.worker_id,
                        self.name
                    );
                }
                warn!(worker = self.worker_id, engine = %self.name, "engine {what} before answering START");
                break false;
            }
            if let Some(msg) = line.strip_prefix("ERROR") {
                if fatal {
                    self.deadline.clear();
                    bail!("[{}] engine {} reported error:{msg}", self.worker_id, self.name);
                }
                warn!(worker = self.worker_id, engine = %self.name, "engine reported error:{msg}");
                self.deadline.clear();
                self.terminate(true);
                return Ok(false);
            }
            if line == "OK" {
                break true;
            }
        };

        self.deadline.clear();
        Ok(ok)
    }

    /// Solicit a move.
    ///
    /// `time_left` is the remaining match budget on entry and the updated
    /// remainder on exit; `max_turn_time` (0 = unlimited) caps this single
    /// turn. Returns the move string, or `None` when the engine went down.
    ///
    /// When the turn budget (plus a small overhead allowance) runs out
    /// before a move arrives, the engine is asked to `YXSTOP` and
    /// `time_left` is pinned to `i64::MIN`: a move that still arrives before
    /// the watchdog fires is returned so transcripts can include it, but the
    /// negative remainder makes the caller score the game as a time loss.
    pub fn bestmove(
        &mut self,
        time_left: &mut i64,
        max_turn_time: i64,
        info: &mut MoveInfo,
        moveply: usize,
        mut messages: Option<&mut String>,
    ) -> Option<String> {
        let start = monotonic_msec();
        let match_limit = start + *time_left;
        let (turn_limit, mut turn_left) = if max_turn_time > 0 {
            let budget = (*time_left).min(max_turn_time);
            (start + budget, budget)
        } else {
            (match_limit, *time_left)
        };

        self.deadline
            .set(&self.name, turn_limit + self.tolerance, "move", self.kill_on_overdue());
        let move_overhead = (self.tolerance / 2).min(1000);

        let mut line = String::new();
        let mut best = None;

        while turn_left + move_overhead >= 0 && best.is_none() {
            if !self.read_line(&mut line) {
                self.deadline.clear();
                return None;
            }
            let now = monotonic_msec();
            info.time = now - start;
            *time_left = match_limit - now;
            turn_left = turn_limit - now;

            if self.debug {
                self.echo_message(&line);
            }
            if let Some(tail) = line.strip_prefix("MESSAGE") {
                if let Some(out) = messages.as_mut() {
                    let tail = tail.strip_prefix(' ').unwrap_or(tail);
                    out.push_str(&format!("{moveply}) {}: {tail}\n", self.name));
                }
                self.info_parser.parse(&line, info);
            } else if Position::is_valid_move_str(&line) {
                best = Some(line.clone());
            }
        }

        if best.is_none() {
            // Turn budget exhausted: ask for the current best and flag the
            // time loss. A late answer is still collected for the record.
            self.write_line("YXSTOP");
            *time_left = i64::MIN;

            loop {
                if !self.read_line(&mut line) {
                    self.deadline.clear();
                    return None;
                }
                if self.debug {
                    self.echo_message(&line);
                }
                if let Some(tail) = line.strip_prefix("MESSAGE") {
                    if let Some(out) = messages.as_mut() {
                        let tail = tail.strip_prefix(' ').unwrap_or(tail);
                        out.push_str(&format!("{moveply}) {}: {tail}\n", self.name));
                    }
                    self.info_parser.parse(&line, info);
                } else if Position::is_valid_move_str(&line) {
                    best = Some(line.clone());
                    break;
                }
            }
        }

        self.deadline.clear();
        best
    }

    /// `ABOUT` handshake: one descriptor line of `key="value"` pairs. Adopts
    /// the advertised name when none was configured, falling back to the
    /// command string.
    fn parse_about(&mut self, fallback: &str) {
        let label = if self.name.is_empty() {
            fallback.to_string()
        } else {
            self.name.clone()
        };
        self.deadline.set(
            &label,
            monotonic_msec() + self.tolerance,
            "about",
            self.kill_on_overdue(),
        );
        self.write_line("ABOUT");

        let mut line = String::new();
        if !self.read_line(&mut line) {
            self.deadline.clear();
            warn!(worker = self.worker_id, engine = %label, "engine exited before answering ABOUT");
            if self.name.is_empty() {
                self.name = fallback.to_string();
            }
            return;
        }
        self.deadline.clear();

        let about = parse_about_line(&line);
        let field = |key: &str| about_field(&about, key).unwrap_or("?");
        if self.name.is_empty() {
            self.name = about_field(&about, "name").unwrap_or(fallback).to_string();
        }
        info!(
            worker = self.worker_id,
            "Load engine: {} (version {}) by {}, {}",
            field("name"),
            field("version"),
            field("author"),
            field("country"),
        );
    }

    /// Console echo of engine chatter in `--debug` mode.
    fn echo_message(&self, line: &str) {
        for prefix in ["MESSAGE", "UNKNOWN", "DEBUG", "ERROR"] {
            if let Some(tail) = line.strip_prefix(prefix) {
                println!("engine {} {}:{tail}", self.name, prefix.to_lowercase());
                return;
            }
        }
    }

    fn mark_crashed(&mut self) {
        match std::mem::replace(&mut self.state, State::Down) {
            State::Running {
                child,
                stdin,
                stdout,
            } => {
                drop(stdin);
                drop(stdout);
                self.state = State::Crashed { child };
            }
            other => self.state = other,
        }
    }

    fn mirror(&self, line: &str) {
        if let Some(log) = &self.log {
            let mut log = log.lock().expect("poisoned");
            let _ = writeln!(log, "{line}");
        }
    }
}

/// Tokenize an `ABOUT` descriptor: `,`, ` ` and `=` separate tokens outside
/// quotes and are literal inside them.
fn parse_about_line(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quoted = false;
    for ch in line.chars() {
        match ch {
            '"' => quoted = !quoted,
            ',' | ' ' | '=' if !quoted => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn about_field<'a>(tokens: &'a [String], key: &str) -> Option<&'a str> {
    tokens
        .windows(2)
        .find(|w| w[0] == key)
        .map(|w| w[1].as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn about_line_tokenizes_quoted_values() {
        let tokens =
            parse_about_line(r#"name="Some Engine", version="1.2", author="A, B", country="CZ""#);
        assert_eq!(about_field(&tokens, "name"), Some("Some Engine"));
        assert_eq!(about_field(&tokens, "version"), Some("1.2"));
        assert_eq!(about_field(&tokens, "author"), Some("A, B"));
        assert_eq!(about_field(&tokens, "country"), Some("CZ"));
        assert_eq!(about_field(&tokens, "www"), None);
    }

    #[test]
    fn about_line_without_quotes() {
        let tokens = parse_about_line("name=foo, version=0.1");
        assert_eq!(about_field(&tokens, "name"), Some("foo"));
        assert_eq!(about_field(&tokens, "version"), Some("0.1"));
    }

    #[test]
    fn terminate_on_never_started_engine_is_noop() {
        let worker = Worker::new(0, None).unwrap();
        let mut engine = Engine::new(&worker, false, Arc::new(NullInfoParser));
        assert!(!engine.is_ok());
        engine.terminate(true);
        engine.terminate(false);
        assert!(!engine.is_ok());
        assert!(!engine.is_crashed());
    }

    #[test]
    fn null_parser_keeps_score_and_depth_inert() {
        let parser = NullInfoParser;
        let mut info = MoveInfo {
            score: 123,
            depth: 9,
            time: 77,
        };
        parser.parse("MESSAGE depth 11 ev -50", &mut info);
        assert_eq!(info.score, 0);
        assert_eq!(info.depth, 0);
        assert_eq!(info.time, 77);
    }
}
