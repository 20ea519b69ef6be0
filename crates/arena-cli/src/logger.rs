use std::{env, fmt, time::Instant};

use ansi_term::Color;
use log::{Level, LevelFilter, Log, Metadata, Record};
use snafu::{ResultExt as _, Snafu};
use snafu_utils::Location;

/// Environment variable holding the default log level.
pub const LEVEL_ENV: &str = "ARENA_LOG";

#[derive(Debug, Snafu)]
pub enum LoggerError {
    #[snafu(display("invalid log level in {LEVEL_ENV}, value={value:?}"))]
    ParseLevel {
        value: String,
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        source: log::ParseLevelError,
    },
    #[snafu(display("logger is already installed"))]
    SetLogger {
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        source: log::SetLoggerError,
    },
}

/// Resolves the level from an explicit choice, then `ARENA_LOG`, then `info`.
pub fn resolve_level(explicit: Option<LevelFilter>) -> Result<LevelFilter, LoggerError> {
    if let Some(level) = explicit {
        return Ok(level);
    }
    parse_level(env::var(LEVEL_ENV).ok().as_deref())
}

fn parse_level(value: Option<&str>) -> Result<LevelFilter, LoggerError> {
    let Some(value) = value.filter(|value| !value.is_empty()) else {
        return Ok(LevelFilter::Info);
    };
    value.parse().context(ParseLevelSnafu { value })
}

pub fn init(level: LevelFilter, color: bool) -> Result<(), LoggerError> {
    let logger = Logger {
        start: Instant::now(),
        color,
    };
    log::set_boxed_logger(Box::new(logger)).context(SetLoggerSnafu)?;
    log::set_max_level(level);
    Ok(())
}

struct Logger {
    start: Instant,
    color: bool,
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let now = self.start.elapsed();
        eprintln!(
            "[{:4}.{:06}] {} {}: {}",
            now.as_secs(),
            now.subsec_micros(),
            LevelFormat {
                level: record.level(),
                color: self.color,
            },
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

struct LevelFormat {
    level: Level,
    color: bool,
}

impl fmt::Display for LevelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let color = match self.level {
            Level::Trace => Color::Magenta,
            Level::Debug => Color::Blue,
            Level::Info => Color::Green,
            Level::Warn => Color::Yellow,
            Level::Error => Color::Red,
        };
        let msg = match self.level {
            Level::Trace => "TRACE",
            Level::Debug => "DEBUG",
            Level::Info => " INFO",
            Level::Warn => " WARN",
            Level::Error => "ERROR",
        };
        write!(f, "{}", color.paint(msg).enabled(self.color))
    }
}
