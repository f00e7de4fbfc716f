//! # gomoku-arena
//!
//! A concurrent match-play arena for gomoku and renju engines speaking the
//! Gomocup line protocol. Engines run as child processes; the arena drives
//! pairs of them through scheduled games, enforces time controls with a
//! per-worker deadline watchdog, records results, and can stop the
//! tournament early once an SPRT reaches statistical confidence.
//!
//! It provides:
//! - Round-robin and gauntlet schedules over any roster ([`jobs`])
//! - A child-process driver for the line protocol ([`engine`])
//! - Per-worker watchdogs backed by a supervisor thread ([`worker`],
//!   [`tournament`])
//! - Ordered PGN/SGF/message transcripts despite out-of-order game
//!   completion ([`seqwriter`])
//! - Opening books with seeded shuffling and board symmetries ([`openings`],
//!   [`position`])
//! - Training-sample capture in text or packed binary form ([`sample`])
//!
//! The `gomoku-arena` binary wires these together; embedders can instead
//! build an [`options::Options`] roster and run a
//! [`tournament::Tournament`] directly:
//!
//! ```no_run
//! use gomoku_arena::options::{EngineOptions, Options};
//! use gomoku_arena::tournament::Tournament;
//!
//! fn main() -> anyhow::Result<()> {
//!     let options = Options {
//!         games: 2,
//!         rounds: 10,
//!         concurrency: 4,
//!         ..Options::default()
//!     };
//!     let engines = vec![
//!         EngineOptions::parse_spec("cmd=./engines/alpha tc=30/5")?,
//!         EngineOptions::parse_spec("cmd=./engines/beta tc=30/5")?,
//!     ];
//!     let results = Tournament::new(options, engines)?.run()?;
//!     for pair in results {
//!         println!(
//!             "{} vs {}: +{} -{} ={}",
//!             pair.names[0], pair.names[1],
//!             pair.tally.wins, pair.tally.losses, pair.tally.draws,
//!         );
//!     }
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod engine;
pub mod game;
pub mod jobs;
pub mod logger;
pub mod openings;
pub mod options;
pub mod position;
pub mod sample;
pub mod seqwriter;
pub mod sprt;
pub mod tournament;
pub mod util;
pub mod worker;
