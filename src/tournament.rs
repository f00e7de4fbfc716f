//! Tournament supervisor: owns the shared state, runs the worker threads,
//! and polls every worker's deadline watchdog.
//!
//! The supervisor prefers to let a worker notice an overdue engine itself:
//! the worker scores the game against the offender and carries on. Firing
//! the callback from here is the normal escalation (it unblocks the worker's
//! pipe read); aborting the whole process is the last resort for an engine
//! that ignores even that, because at that point any further I/O on its pipe
//! would block forever.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::error;

use crate::engine::{Engine, InfoParser, NullInfoParser};
use crate::game::Game;
use crate::jobs::{JobQueue, Outcome, PairResult};
use crate::openings::Openings;
use crate::options::{EngineOptions, Options};
use crate::sample::SampleSink;
use crate::seqwriter::SeqWriter;
use crate::sprt::SprtStatus;
use crate::worker::Worker;

/// How long past an already-fired deadline we wait before declaring the
/// engine unkillable and aborting.
const UNRESPONSIVE_ABORT_MSEC: i64 = 1000;
/// Supervisor poll interval.
const POLL_MSEC: u64 = 100;

pub struct Tournament {
    options: Options,
    engine_options: Vec<EngineOptions>,
    jobs: JobQueue,
    openings: Openings,
    pgn: Option<SeqWriter>,
    sgf: Option<SeqWriter>,
    msg: Option<SeqWriter>,
    samples: Option<SampleSink>,
    info_parser: Arc<dyn InfoParser>,
}

impl Tournament {
    /// Validate the configuration and open every sink.
    pub fn new(options: Options, engine_options: Vec<EngineOptions>) -> Result<Tournament> {
        options.validate(&engine_options)?;

        let jobs = JobQueue::new(
            engine_options.len(),
            options.rounds,
            options.games,
            options.gauntlet,
        );
        let openings = Openings::open(options.openings.as_deref(), options.random, options.srand)?;
        let pgn = options.pgn.as_deref().map(SeqWriter::open).transpose()?;
        let sgf = options.sgf.as_deref().map(SeqWriter::open).transpose()?;
        let msg = options.msg.as_deref().map(SeqWriter::open).transpose()?;
        let samples = options.sample.as_ref().map(SampleSink::open).transpose()?;

        Ok(Tournament {
            options,
            engine_options,
            jobs,
            openings,
            pgn,
            sgf,
            msg,
            samples,
            info_parser: Arc::new(NullInfoParser),
        })
    }

    /// Install a custom thinking-message parser (see
    /// [`InfoParser`](crate::engine::InfoParser)); without one, score-based
    /// adjudication stays inert.
    pub fn with_info_parser(mut self, parser: Arc<dyn InfoParser>) -> Tournament {
        self.info_parser = parser;
        self
    }

    /// Run the tournament to completion: play every scheduled game, join
    /// all workers, finalize every sink, and return the per-pair standings.
    pub fn run(self) -> Result<Vec<PairResult>> {
        // A worker panic must not leave the supervisor waiting forever.
        setup_exit_on_panic();

        let concurrency = self.options.concurrency;
        let log = self.options.log;
        let shared = Arc::new(self);

        let mut deadlines = Vec::with_capacity(concurrency);
        let mut threads = Vec::with_capacity(concurrency);
        for i in 0..concurrency {
            let log_name = log.then(|| format!("gomoku-arena.{}.log", i + 1));
            let worker = Worker::new(i, log_name.as_deref())?;
            deadlines.push(worker.deadline.clone());
            let ctx = Arc::clone(&shared);
            let handle = thread::Builder::new()
                .name(format!("worker-{}", i + 1))
                .spawn(move || {
                    let id = worker.id;
                    if let Err(err) = worker_loop(worker, ctx) {
                        error!(worker = id, %err, "worker failed");
                        std::process::exit(1);
                    }
                })
                .context("spawning worker thread")?;
            threads.push(handle);
        }

        // Poll until the queue is drained and the last in-flight games ended.
        while !shared.jobs.done() || threads.iter().any(|t| !t.is_finished()) {
            thread::sleep(Duration::from_millis(POLL_MSEC));

            for (i, deadline) in deadlines.iter().enumerate() {
                let overdue = deadline.overdue();
                if overdue > UNRESPONSIVE_ABORT_MSEC && deadline.fired() {
                    // The kill signal went out long ago and the worker is
                    // still stuck on the pipe. Nothing recoverable remains.
                    let (engine, task) = deadline.describe();
                    error!(
                        worker = i + 1,
                        engine = %engine,
                        task = %task,
                        "engine is unresponsive, giving up"
                    );
                    std::process::exit(1);
                }
                if overdue > 0 {
                    deadline.fire_once();
                }
            }
        }

        for handle in threads {
            if handle.join().is_err() {
                bail!("worker thread panicked");
            }
        }

        let Ok(tournament) = Arc::try_unwrap(shared) else {
            unreachable!("all workers joined");
        };
        let results = tournament.jobs.results();
        if let Some(samples) = tournament.samples {
            samples.finish()?;
        }
        // transcript writers flush their buffered tails on drop
        Ok(results)
    }
}

/// One worker thread: pop jobs, keep the two engine slots matched to the
/// job's pairing (restarting crashed engines), play the game, export the
/// artifacts, report the result.
fn worker_loop(mut worker: Worker, ctx: Arc<Tournament>) -> Result<()> {
    let options = &ctx.options;
    let mut engines = [
        Engine::new(&worker, options.debug, ctx.info_parser.clone()),
        Engine::new(&worker, options.debug, ctx.info_parser.clone()),
    ];
    // roster index currently loaded in each slot
    let mut assigned: [Option<usize>; 2] = [None, None];

    while let Some((job, idx, total)) = ctx.jobs.pop() {
        let mut messages = options
            .msg
            .is_some()
            .then(|| format!("------------------------------\nGame ID: {}\n", idx + 1));

        for seat in 0..2 {
            let target = job.engines[seat];
            let eo = &ctx.engine_options[target];
            if assigned[seat] != Some(target) {
                assigned[seat] = Some(target);
                engines[seat].terminate(false);
                engines[seat].start(&eo.cmd, &eo.name, eo.tolerance)?;
                ctx.jobs.set_name(target, &engines[seat].name);
            } else if !engines[seat].is_ok() || engines[seat].is_crashed() {
                engines[seat].terminate(false);
                engines[seat].start(&eo.cmd, &eo.name, eo.tolerance)?;
            }
        }

        let opening_idx = if options.repeat { idx / 2 } else { idx };
        let (opening, cycle_round) = ctx.openings.next(opening_idx)?;

        let mut game = Game::new(job.round, job.game);
        let Some(first_color) = game.load_opening(&opening, options, cycle_round) else {
            bail!("[{}] unusable opening '{opening}'", worker.id);
        };

        let black_seat = first_color.index() ^ job.reverse as usize;
        let white_seat = 1 - black_seat;
        println!(
            "[{}] Started game {} of {} ({} vs {})",
            worker.id,
            idx + 1,
            total,
            engines[black_seat].name,
            engines[white_seat].name
        );
        if let Some(m) = messages.as_mut() {
            m.push_str(&format!(
                "Engines: {} x {}\n",
                engines[black_seat].name, engines[white_seat].name
            ));
        }

        let eo_pair = [
            &ctx.engine_options[job.engines[0]],
            &ctx.engine_options[job.engines[1]],
        ];
        let outcome = game.play(
            &mut worker,
            options,
            &mut engines,
            eo_pair,
            job.reverse,
            messages.as_mut(),
        )?;

        let keep = !options.gauntlet || !options.save_lose_only || outcome == Outcome::Loss;
        if keep {
            if let Some(pgn) = &ctx.pgn {
                pgn.push(idx, game.export_pgn(idx + 1, 0));
            }
            if let Some(sgf) = &ctx.sgf {
                sgf.push(idx, game.export_sgf(idx + 1));
            }
            if let Some(msg) = &ctx.msg {
                msg.push(idx, messages.take().unwrap_or_default());
            }
            if let Some(samples) = &ctx.samples {
                if !game.samples.is_empty() {
                    samples.write_batch(&game.samples)?;
                }
            }
        }

        // black-vs-white summary line
        let (result, reason) = game.decode_state(["0-1", "1/2-1/2", "1-0"]);
        println!(
            "[{}] Finished game {} ({} vs {}): {result} {{{reason}}}",
            worker.id,
            idx + 1,
            engines[black_seat].name,
            engines[white_seat].name
        );

        let tally = ctx.jobs.add_result(job.pair, outcome);
        println!(
            "Score of {} vs {}: {} - {} - {}  [{:.3}] {}",
            engines[0].name,
            engines[1].name,
            tally.wins,
            tally.losses,
            tally.draws,
            (tally.wins as f64 + 0.5 * tally.draws as f64) / tally.total() as f64,
            tally.total()
        );

        if let Some(sprt) = &options.sprt {
            if sprt.check(tally.as_wld()) != SprtStatus::Continue {
                ctx.jobs.stop();
            }
        }
        if ctx.engine_options.len() > 2 {
            ctx.jobs.print_results(options.games);
        }
    }

    for engine in &mut engines {
        engine.terminate(false);
    }
    Ok(())
}

/// Turn any panic into a process exit so a dead worker cannot deadlock the
/// supervisor loop.
fn setup_exit_on_panic() {
    let original = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        original(panic_info);
        std::process::exit(1);
    }));
}
