//! Per-worker state: the deadline watchdog record, the sampling seed, and the
//! optional protocol log.
//!
//! Each worker thread owns one [`Worker`]. The supervisor keeps a clone of
//! every worker's [`Deadline`] and polls it on a timer; everything else is
//! worker-private. A worker has at most one armed deadline at any time:
//! every blocking engine interaction arms it on entry and clears it on exit.

use std::fs::File;
use std::io::Write;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use tracing::trace;

use crate::util::monotonic_msec;

/// Callback invoked (once) by whoever first notices the deadline passed.
pub type OverdueCallback = Box<dyn FnOnce() + Send>;

/// Shared per-worker protocol log. Both engine drivers of a worker and its
/// deadline record append to the same file.
pub type WorkerLog = Arc<Mutex<File>>;

#[derive(Default)]
struct DeadlineState {
    armed: bool,
    fired: bool,
    engine: String,
    task: String,
    at_msec: i64,
    on_overdue: Option<OverdueCallback>,
}

/// A single in-flight deadline, shared between one worker and the supervisor.
#[derive(Default)]
pub struct Deadline {
    state: Mutex<DeadlineState>,
    log: Option<WorkerLog>,
}

impl Deadline {
    fn new(log: Option<WorkerLog>) -> Deadline {
        Deadline {
            state: Mutex::new(DeadlineState::default()),
            log,
        }
    }

    /// Arm the deadline: `engine` must finish `task` by `at_msec` or
    /// `on_overdue` runs. Replaces any previous deadline.
    pub fn set(&self, engine: &str, at_msec: i64, task: &str, on_overdue: Option<OverdueCallback>) {
        debug_assert!(at_msec > 0);
        {
            let mut state = self.state.lock().expect("poisoned");
            state.armed = true;
            state.fired = false;
            state.engine = engine.to_string();
            state.task = task.to_string();
            state.at_msec = at_msec;
            state.on_overdue = on_overdue;
        }
        trace!(engine, task, at_msec, "deadline armed");
        self.log_line(&format!("deadline: {engine} must respond to [{task}] by {at_msec}"));
    }

    /// Disarm. The engine responded in time.
    pub fn clear(&self) {
        let (engine, task, at_msec) = {
            let mut state = self.state.lock().expect("poisoned");
            state.armed = false;
            state.on_overdue = None;
            (state.engine.clone(), state.task.clone(), state.at_msec)
        };
        trace!(engine = %engine, task = %task, "deadline cleared");
        self.log_line(&format!("deadline: {engine} responded [{task}] before {at_msec}"));
    }

    /// Milliseconds past the deadline, or 0 when not armed / not overdue.
    pub fn overdue(&self) -> i64 {
        let now = monotonic_msec();
        let state = self.state.lock().expect("poisoned");
        if state.armed && now > state.at_msec {
            now - state.at_msec
        } else {
            0
        }
    }

    /// Run the overdue callback if armed and not yet fired. The callback runs
    /// under the record's lock, so `wait_callback_done` observes completion.
    pub fn fire_once(&self) {
        let mut state = self.state.lock().expect("poisoned");
        if state.armed && !state.fired {
            state.fired = true;
            if let Some(callback) = state.on_overdue.take() {
                callback();
            }
        }
    }

    /// Still armed with the callback already fired: the engine ignored the
    /// kill and the owning worker is presumed stuck.
    pub fn fired(&self) -> bool {
        let state = self.state.lock().expect("poisoned");
        state.armed && state.fired
    }

    /// Synchronization point for a reader that just hit end-of-stream: taking
    /// and releasing the lock guarantees any in-flight `fire_once` finished.
    pub fn wait_callback_done(&self) {
        drop(self.state.lock().expect("poisoned"));
    }

    /// Who is overdue on what, for the supervisor's abort message.
    pub fn describe(&self) -> (String, String) {
        let state = self.state.lock().expect("poisoned");
        (state.engine.clone(), state.task.clone())
    }

    fn log_line(&self, line: &str) {
        if let Some(log) = &self.log {
            let mut log = log.lock().expect("poisoned");
            let _ = writeln!(log, "{line}");
        }
    }
}

/// Per-thread tournament worker.
pub struct Worker {
    /// 1-based; 0 is the supervisor in console output.
    pub id: usize,
    pub deadline: Arc<Deadline>,
    /// SplitMix64 state for sample selection.
    pub seed: u64,
    pub log: Option<WorkerLog>,
}

impl Worker {
    pub fn new(index: usize, log_name: Option<&str>) -> Result<Worker> {
        let log = match log_name {
            Some(name) => {
                let file = File::create(name).with_context(|| format!("cannot create {name}"))?;
                Some(Arc::new(Mutex::new(file)))
            }
            None => None,
        };
        Ok(Worker {
            id: index + 1,
            deadline: Arc::new(Deadline::new(log.clone())),
            seed: index as u64,
            log,
        })
    }
}
