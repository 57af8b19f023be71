//! Stderr logging backend for the `log` facade
//!
//! The level defaults to `warn`, every `-v` raises it one step and a
//! `TFS_LOG` value such as `debug` overrides both.

use std::env;
use std::str::FromStr;

use log::{LevelFilter, Log, Metadata, Record, SetLoggerError};
use spin::Mutex;

/// Global logger instance
pub static LOGGER: Logger = Logger::new();

/// Serializes writers so lines never interleave
pub struct Logger {
    inner: Mutex<()>,
}

impl Logger {
    pub const fn new() -> Logger {
        Logger {
            inner: Mutex::new(()),
        }
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    /// Formats messages as "[LEVEL] message"
    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let _guard = self.inner.lock();
            eprintln!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

fn level_for(verbosity: u64) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Install the logger; `TFS_LOG` wins over the `-v` count when it parses
pub fn init(verbosity: u64) -> Result<(), SetLoggerError> {
    let level = env::var("TFS_LOG")
        .ok()
        .and_then(|value| LevelFilter::from_str(&value).ok())
        .unwrap_or_else(|| level_for(verbosity));
    log::set_logger(&LOGGER).map(|()| log::set_max_level(level))
}
