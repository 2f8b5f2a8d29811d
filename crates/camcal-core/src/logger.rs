//! Stderr logging for calibration runs.
//!
//! [`init_with_level`] installs a `log` backend that prints
//! `[  1.234s  INFO mono] message`, showing the last path segment of the
//! record target. Records from crates outside the calibration workspace are
//! shown only at `warn` and above. With the `tracing` feature,
//! [`init_tracing`] installs a `tracing-subscriber` pipeline instead.

use std::io::Write;
use std::sync::OnceLock;
use std::time::Instant;

use log::{Level, LevelFilter, Log, Metadata, Record};

#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, fmt::format::FmtSpan, prelude::*, EnvFilter};

const OWN_PREFIX: &str = "camcal";

struct RunLogger {
    filter: LevelFilter,
    started: Instant,
}

impl RunLogger {
    fn stage<'a>(&self, target: &'a str) -> &'a str {
        target.rsplit("::").next().unwrap_or(target)
    }
}

impl Log for RunLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        let ceiling = if metadata.target().starts_with(OWN_PREFIX) {
            self.filter
        } else {
            self.filter.min(LevelFilter::Warn)
        };
        metadata.level() <= ceiling
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "[{:8.3}s {:>5} {}] {}\n",
            self.started.elapsed().as_secs_f64(),
            record.level(),
            self.stage(record.target()),
            record.args()
        );
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        if record.level() == Level::Error {
            let _ = err.flush();
        }
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

static LOGGER: OnceLock<RunLogger> = OnceLock::new();

/// Installs the stderr logger. Later calls keep the first logger.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    let mut fresh = false;
    let logger = LOGGER.get_or_init(|| {
        fresh = true;
        RunLogger {
            filter: level,
            started: Instant::now(),
        }
    });
    if fresh {
        log::set_logger(logger)?;
        log::set_max_level(logger.filter);
    }
    Ok(())
}

/// Installs a `tracing` subscriber filtered by `RUST_LOG` (default `info`),
/// emitting a line when each instrumented span closes.
#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    let _ = if json {
        registry
            .with(
                fmt::layer()
                    .json()
                    .flatten_event(true)
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
    } else {
        registry
            .with(
                fmt::layer()
                    .with_timer(fmt::time::Uptime::default())
                    .with_span_events(FmtSpan::CLOSE),
            )
            .try_init()
    };
}
