//! Tracing subscriber setup.
//!
//! Normal runs log to stderr so tournament output on stdout stays clean
//! (score lines, scoreboards and transcripts are products, not logs). With
//! `--log` the subscriber instead writes everything down to TRACE into a
//! timestamped file next to the per-worker protocol logs.

use std::fs::File;

use time::{format_description, OffsetDateTime};
use tracing::{subscriber::set_global_default, Level};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, FmtSubscriber};

/// Install the global subscriber. Call once, before any worker starts.
pub fn init(log_to_file: bool, debug: bool) {
    if log_to_file {
        let file_name = log_file_name();
        let file = File::create(&file_name)
            .unwrap_or_else(|err| panic!("cannot create log file {file_name}: {err}"));
        let subscriber = FmtSubscriber::builder()
            .with_max_level(Level::TRACE)
            .with_ansi(false)
            .with_writer(BoxMakeWriter::new(file))
            .finish();
        set_global_default(subscriber).expect("global tracing subscriber already set");
    } else {
        let level = if debug { Level::DEBUG } else { Level::INFO };
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .with_writer(std::io::stderr)
            .finish();
        set_global_default(subscriber).expect("global tracing subscriber already set");
    }
}

fn log_file_name() -> String {
    let format = format_description::parse("[year]-[month]-[day]_[hour][minute][second]")
        .expect("static format");
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    format!(
        "gomoku-arena_{}.log",
        now.format(&format).unwrap_or_else(|_| "startup".into())
    )
}
