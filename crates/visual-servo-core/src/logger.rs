//! Logging setup.
//!
//! Two pieces live here:
//! - a minimal process logger for the `log` facade that prints
//!   `[elapsed LEVEL target] message` to stderr (`init_with_level`),
//! - [`TraceLog`], an explicit per-session trace file used by the robot
//!   control loop.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Instant;

use log::{LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;

#[cfg(feature = "tracing")]
use tracing_subscriber::fmt::format::FmtSpan;
#[cfg(feature = "tracing")]
use tracing_subscriber::util::SubscriberInitExt;
#[cfg(feature = "tracing")]
use tracing_subscriber::{fmt, EnvFilter};

struct StderrLogger {
    level: LevelFilter,
    started: Instant,
}

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        let elapsed = self.started.elapsed().as_secs_f64();
        let mut stderr = std::io::stderr().lock();
        let _ = writeln!(
            stderr,
            "[{:7.3}s {:>5} {}] {}",
            elapsed,
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

static LOGGER: OnceLock<StderrLogger> = OnceLock::new();

/// Install the stderr logger with the provided level filter.
///
/// Calling this more than once is a no-op after the first successful
/// initialization.
pub fn init_with_level(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    if LOGGER.get().is_none() {
        let logger = LOGGER.get_or_init(|| StderrLogger {
            level,
            started: Instant::now(),
        });
        log::set_logger(logger)?;
        log::set_max_level(level);
    }
    Ok(())
}

#[cfg(feature = "tracing")]
pub fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if json {
        let _ = fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .json()
            .flatten_event(true)
            .finish()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(filter)
            .with_span_events(FmtSpan::CLOSE)
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init();
    }
}

/// Line-oriented trace file owned by one hardware session.
///
/// The first successful write of a `TraceLog` truncates the file, later
/// writes append. Every write opens the file, appends one line and drops the
/// handle before returning, so no handle outlives a call. Writes are
/// serialized, so lines never interleave. Failures are reported through
/// `log::warn!` and never surface to the caller. Every message is also
/// forwarded to `log::debug!`.
#[derive(Debug)]
pub struct TraceLog {
    path: Option<PathBuf>,
    appending: Mutex<bool>,
    started: Instant,
}

impl TraceLog {
    /// Trace into `path`.
    pub fn to_file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            appending: Mutex::new(false),
            started: Instant::now(),
        }
    }

    /// Trace only through the `log` facade.
    pub fn disabled() -> Self {
        Self {
            path: None,
            appending: Mutex::new(false),
            started: Instant::now(),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn write(&self, message: impl std::fmt::Display) {
        log::debug!(target: "trace", "{message}");

        let Some(path) = self.path.as_deref() else {
            return;
        };
        let line = format!(
            "[{:8.3}s] by #{:?}: {}\r\n",
            self.started.elapsed().as_secs_f64(),
            std::thread::current().id(),
            message
        );
        if let Err(err) = self.append_line(path, &line) {
            log::warn!("trace log {} not writable: {err}", path.display());
        }
    }

    fn append_line(&self, path: &Path, line: &str) -> std::io::Result<()> {
        let mut appending = self.appending.lock();
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .append(*appending)
            .truncate(!*appending)
            .open(path)?;
        *appending = true;
        let mut writer = BufWriter::new(file);
        writer.write_all(line.as_bytes())?;
        writer.flush()
    }
}

impl Default for TraceLog {
    fn default() -> Self {
        Self::disabled()
    }
}
