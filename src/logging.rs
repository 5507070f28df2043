/// Structured logging for the water grid service
///
/// Thin layer over the `log` facade. Every entry carries a source tag
/// (USGS, STORE, SCHED, HTTP, SYS) as its log target and, where relevant,
/// the site identifier. `init_logger` installs `env_logger` writing to the
/// console and, optionally, appending to a log file for daemon operation.

use chrono::Utc;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;

use log::{Level, LevelFilter};

use crate::model::{CycleSummary, SiteFetchError};

// ---------------------------------------------------------------------------
// Data Source Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    Usgs,
    Store,
    Scheduler,
    Http,
    System,
}

impl DataSource {
    /// Log target used for entries from this source.
    pub fn target(&self) -> &'static str {
        match self {
            DataSource::Usgs => "USGS",
            DataSource::Store => "STORE",
            DataSource::Scheduler => "SCHED",
            DataSource::Http => "HTTP",
            DataSource::System => "SYS",
        }
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.target())
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - station may be offline, seasonal, or in maintenance
    Expected,
    /// Unexpected failure - indicates service degradation or an API change
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Setup
// ---------------------------------------------------------------------------

/// Parses a level name from config; unknown names fall back to `info`.
pub fn parse_level(name: &str) -> LevelFilter {
    name.trim().parse().unwrap_or(LevelFilter::Info)
}

/// Console + file writer handed to env_logger.
struct Tee {
    file: File,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Install the global logger. Call once, before anything logs.
pub fn init_logger(level: &str, log_file: Option<&Path>) -> io::Result<()> {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(parse_level(level))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} {}: {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
                record.level(),
                record.target(),
                record.args()
            )
        });

    if let Some(path) = log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(Tee { file })));
    }

    // A second init (tests, embedding) keeps the first logger.
    let _ = builder.try_init();
    Ok(())
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

fn emit(level: Level, source: DataSource, site_id: Option<&str>, message: &str) {
    match site_id {
        Some(site) => log::log!(target: source.target(), level, "[{}] {}", site, message),
        None => log::log!(target: source.target(), level, "{}", message),
    }
}

/// Log a general informational message
pub fn info(source: DataSource, site_id: Option<&str>, message: &str) {
    emit(Level::Info, source, site_id, message);
}

/// Log a warning message
pub fn warn(source: DataSource, site_id: Option<&str>, message: &str) {
    emit(Level::Warn, source, site_id, message);
}

/// Log an error message
pub fn error(source: DataSource, site_id: Option<&str>, message: &str) {
    emit(Level::Error, source, site_id, message);
}

/// Log a debug message
pub fn debug(source: DataSource, site_id: Option<&str>, message: &str) {
    emit(Level::Debug, source, site_id, message);
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify a USGS station failure by error kind.
pub fn classify_usgs_failure(err: &SiteFetchError) -> FailureType {
    match err {
        // 404 is what NWIS answers for a site with nothing in range or a
        // retired site number.
        SiteFetchError::HttpError(404) => FailureType::Expected,
        SiteFetchError::HttpError(_) => FailureType::Unexpected,
        // Malformed payloads suggest an API change on their side
        SiteFetchError::ParseError(_) => FailureType::Unexpected,
        SiteFetchError::RequestError(_) => FailureType::Unknown,
    }
}

/// Log a per-site fetch failure with automatic classification.
pub fn log_usgs_failure(site_code: &str, operation: &str, err: &SiteFetchError) {
    let failure_type = classify_usgs_failure(err);
    let message = format!("{} failed [{}]: {}", operation, failure_type, err);

    match failure_type {
        FailureType::Expected => debug(DataSource::Usgs, Some(site_code), &message),
        FailureType::Unexpected => error(DataSource::Usgs, Some(site_code), &message),
        FailureType::Unknown => warn(DataSource::Usgs, Some(site_code), &message),
    }
}

// ---------------------------------------------------------------------------
// Cycle Summary Logging
// ---------------------------------------------------------------------------

/// Level a cycle summary is logged at.
pub fn summary_level(summary: &CycleSummary) -> Level {
    let with_data = summary.sites_ok;
    if summary.sites_failed == 0 && summary.sites_empty == 0 {
        Level::Info
    } else if with_data == 0 {
        Level::Error
    } else {
        Level::Warn
    }
}

/// Log a summary of one refresh cycle.
pub fn log_cycle_summary(summary: &CycleSummary) {
    let message = format!(
        "Refresh cycle: {}/{} sites ok, {} empty, {} failed, {} rows",
        summary.sites_ok,
        summary.sites_total,
        summary.sites_empty,
        summary.sites_failed,
        summary.rows
    );
    emit(summary_level(summary), DataSource::Scheduler, None, &message);
}
