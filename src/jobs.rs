//! The job queue: every game of the tournament, enumerated up front and
//! dispensed to workers one at a time.
//!
//! Round-robin plays each unordered pair `(e1, e2)` with `e1 < e2`;
//! gauntlet plays engine 0 against everyone else. Within a round each pair
//! gets `games` jobs with alternating seats, so openings repeat with colors
//! swapped when the operator pairs this with `--repeat`. Results are tallied
//! per pair from the first engine's point of view.

use std::sync::Mutex;

/// Outcome of one game from seat 0's (pair-first engine's) viewpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Loss = 0,
    Draw = 1,
    Win = 2,
}

/// Instruction to play a single game.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    /// Roster indices: `engines[0]` plays `engines[1]`.
    pub engines: [usize; 2],
    /// Position of this pairing in the round's pair list.
    pub pair: usize,
    pub round: usize,
    /// Game number within the round.
    pub game: usize,
    /// When set, the second engine of the pair moves first.
    pub reverse: bool,
}

/// Win/loss/draw tally for one pairing, from the first engine's viewpoint.
#[derive(Debug, Clone, Copy, Default)]
pub struct Tally {
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
}

impl Tally {
    pub fn total(&self) -> u32 {
        self.wins + self.losses + self.draws
    }

    pub fn as_wld(&self) -> [u32; 3] {
        [self.wins, self.losses, self.draws]
    }

    fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Win => self.wins += 1,
            Outcome::Loss => self.losses += 1,
            Outcome::Draw => self.draws += 1,
        }
    }

    fn score(&self) -> f64 {
        (self.wins as f64 + 0.5 * self.draws as f64) / self.total() as f64
    }
}

struct Pair {
    engines: [usize; 2],
    tally: Tally,
}

/// Final standing of one pairing, as returned by
/// [`Tournament::run`](crate::tournament::Tournament::run).
#[derive(Debug, Clone)]
pub struct PairResult {
    pub engines: [usize; 2],
    pub names: [String; 2],
    pub tally: Tally,
}

struct QueueState {
    jobs: Vec<Job>,
    /// Cursor of the next job to hand out.
    next: usize,
    completed: usize,
    pairs: Vec<Pair>,
    names: Vec<String>,
}

/// Thread-safe tournament schedule; all operations serialize on one lock.
pub struct JobQueue {
    state: Mutex<QueueState>,
}

impl JobQueue {
    pub fn new(engines: usize, rounds: usize, games: usize, gauntlet: bool) -> JobQueue {
        assert!(engines >= 2 && rounds >= 1 && games >= 1);

        let pair_list: Vec<[usize; 2]> = if gauntlet {
            (1..engines).map(|e2| [0, e2]).collect()
        } else {
            (0..engines - 1)
                .flat_map(|e1| (e1 + 1..engines).map(move |e2| [e1, e2]))
                .collect()
        };

        let mut jobs = Vec::with_capacity(rounds * pair_list.len() * games);
        for round in 0..rounds {
            let mut game = 0;
            for (pair, &engines) in pair_list.iter().enumerate() {
                for g in 0..games {
                    jobs.push(Job {
                        engines,
                        pair,
                        round,
                        game,
                        reverse: g % 2 == 1,
                    });
                    game += 1;
                }
            }
        }

        JobQueue {
            state: Mutex::new(QueueState {
                jobs,
                next: 0,
                completed: 0,
                pairs: pair_list
                    .into_iter()
                    .map(|engines| Pair {
                        engines,
                        tally: Tally::default(),
                    })
                    .collect(),
                names: vec![String::new(); engines],
            }),
        }
    }

    /// Atomically take the next job; `(job, index, total)` or `None` when the
    /// schedule is exhausted (or stopped).
    pub fn pop(&self) -> Option<(Job, usize, usize)> {
        let mut state = self.state.lock().expect("poisoned");
        if state.next < state.jobs.len() {
            let idx = state.next;
            state.next += 1;
            Some((state.jobs[idx], idx, state.jobs.len()))
        } else {
            None
        }
    }

    /// Record a finished game and return the pair's updated tally.
    pub fn add_result(&self, pair: usize, outcome: Outcome) -> Tally {
        let mut state = self.state.lock().expect("poisoned");
        state.pairs[pair].tally.add(outcome);
        state.completed += 1;
        state.pairs[pair].tally
    }

    /// All jobs handed out (games may still be in flight).
    pub fn done(&self) -> bool {
        let state = self.state.lock().expect("poisoned");
        debug_assert!(state.next <= state.jobs.len());
        state.next == state.jobs.len()
    }

    /// Stop dispensing jobs. In-flight games finish normally; a stop on an
    /// exhausted queue is a no-op.
    pub fn stop(&self) {
        let mut state = self.state.lock().expect("poisoned");
        state.next = state.jobs.len();
    }

    /// Record an engine's advertised name; the first writer wins, so
    /// concurrent workers starting the same engine agree.
    pub fn set_name(&self, engine: usize, name: &str) {
        let mut state = self.state.lock().expect("poisoned");
        if state.names[engine].is_empty() {
            state.names[engine] = name.to_string();
        }
    }

    pub fn completed(&self) -> usize {
        self.state.lock().expect("poisoned").completed
    }

    /// Snapshot of every pairing's tally and discovered names.
    pub fn results(&self) -> Vec<PairResult> {
        let state = self.state.lock().expect("poisoned");
        state
            .pairs
            .iter()
            .map(|pair| PairResult {
                engines: pair.engines,
                names: [
                    state.names[pair.engines[0]].clone(),
                    state.names[pair.engines[1]].clone(),
                ],
                tally: pair.tally,
            })
            .collect()
    }

    /// Print the pair-by-pair scoreboard at every `frequency` completed games.
    pub fn print_results(&self, frequency: usize) {
        let state = self.state.lock().expect("poisoned");
        if frequency == 0 || state.completed == 0 || state.completed % frequency != 0 {
            return;
        }
        let mut out = String::from("Tournament update:\n");
        for pair in &state.pairs {
            if pair.tally.total() == 0 {
                continue;
            }
            out.push_str(&format!(
                "{} vs {}: {} - {} - {}  [{:.3}] {}\n",
                state.names[pair.engines[0]],
                state.names[pair.engines[1]],
                pair.tally.wins,
                pair.tally.losses,
                pair.tally.draws,
                pair.tally.score(),
                pair.tally.total(),
            ));
        }
        print!("{out}");
    }
}
