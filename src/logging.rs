//! Logging setup.
//!
//! Diagnostics go through the `log` facade with an `env_logger` backend.
//! Records render as `[XcodeCache/E]`, `[XcodeCache/W]`, `[XcodeCache/I]`,
//! `[XcodeCache/D]` so cache lines are easy to grep out of an xcodebuild
//! log. `RUST_LOG` overrides the default `info` filter.

use std::io::Write;

use env_logger::Builder;
use log::{Level, LevelFilter};

/// Initialize the logger. Call once from `main`.
pub fn init() {
    let mut builder = Builder::new();

    if std::env::var("RUST_LOG").is_ok() {
        builder.parse_default_env();
    } else {
        builder.filter_level(LevelFilter::Info);
    }

    builder.format(|buf, record| {
        writeln!(buf, "[XcodeCache/{}] {}", level_tag(record.level()), record.args())
    });

    // Tests may initialize more than once.
    let _ = builder.is_test(false).try_init();
}

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "E",
        Level::Warn => "W",
        Level::Info => "I",
        Level::Debug => "D",
        Level::Trace => "T",
    }
}
