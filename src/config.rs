/// Service configuration.
///
/// Settings come from a TOML file (`./watergrid.toml` unless `--config` or
/// `WATERGRID_CONFIG` says otherwise), then environment overrides. A `.env`
/// file in the working directory is loaded first so overrides can live there.
/// A missing default config file is fine: built-in defaults apply.
///
/// Example TOML:
/// ```toml
/// bind_addr = "0.0.0.0:5000"
/// snapshot_path = "data/water_data.json"
/// refresh_interval_minutes = 15
/// parameter_codes = ["00010", "00065", "00095"]
///
/// [[stations]]
/// site_no = "01376500"
/// station_nm = "Poughkeepsie"
/// latitude = 41.7004
/// longitude = -73.9210
/// ```

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ingest::usgs::NWIS_IV_URL;
use crate::model::DateRange;
use crate::refresh::{DEFAULT_REFRESH_INTERVAL, RefreshSettings};
use crate::stations::{self, Station};

pub const DEFAULT_CONFIG_PATH: &str = "watergrid.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for {key}: {message}")]
    Invalid { key: String, message: String },
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        message: message.into(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bind_addr: String,
    pub snapshot_path: PathBuf,
    pub refresh_interval_minutes: u64,
    pub lookback_days: i64,
    pub max_concurrent_fetches: usize,
    pub request_timeout_secs: u64,
    pub base_url: String,
    pub parameter_codes: Vec<String>,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub stations: Vec<Station>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5000".to_string(),
            snapshot_path: PathBuf::from("data/water_data.json"),
            refresh_interval_minutes: DEFAULT_REFRESH_INTERVAL.as_secs() / 60,
            lookback_days: DateRange::DEFAULT_LOOKBACK_DAYS,
            max_concurrent_fetches: 4,
            request_timeout_secs: 30,
            base_url: NWIS_IV_URL.to_string(),
            parameter_codes: stations::default_parameter_codes(),
            log_level: "info".to_string(),
            log_file: None,
            stations: stations::default_stations(),
        }
    }
}

impl Config {
    /// Load `.env`, the config file, and environment overrides, then validate.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenv::dotenv().ok();

        let from_env = std::env::var("WATERGRID_CONFIG").ok().map(PathBuf::from);
        let (path, required) = match (explicit_path, from_env) {
            (Some(p), _) => (p.to_path_buf(), true),
            (None, Some(p)) => (p, true),
            (None, None) => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        let mut config = if path.exists() {
            let contents = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
                path: path.clone(),
                source,
            })?;
            Self::from_toml_str(&contents)?
        } else if required {
            return Err(ConfigError::NotFound(path));
        } else {
            Self::default()
        };

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply `WATERGRID_*` overrides from `lookup` (the process environment
    /// in production).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("WATERGRID_BIND") {
            self.bind_addr = v;
        }
        if let Some(v) = lookup("WATERGRID_SNAPSHOT_PATH") {
            self.snapshot_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("WATERGRID_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = lookup("WATERGRID_REFRESH_MINUTES") {
            self.refresh_interval_minutes = v
                .trim()
                .parse()
                .map_err(|_| invalid("WATERGRID_REFRESH_MINUTES", format!("not a number: {v}")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_interval_minutes == 0 {
            return Err(invalid("refresh_interval_minutes", "must be greater than 0"));
        }
        if self.lookback_days <= 0 {
            return Err(invalid("lookback_days", "must be greater than 0"));
        }
        if self.max_concurrent_fetches == 0 {
            return Err(invalid("max_concurrent_fetches", "must be greater than 0"));
        }
        if self.parameter_codes.is_empty() {
            return Err(invalid("parameter_codes", "at least one parameter code is required"));
        }
        if self.stations.is_empty() {
            return Err(invalid("stations", "at least one station is required"));
        }
        for station in &self.stations {
            if !stations::is_valid_site_code(&station.site_no) {
                return Err(invalid(
                    "stations",
                    format!("'{}' is not a USGS site number", station.site_no),
                ));
            }
        }
        self.socket_addr()?;
        Ok(())
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_addr
            .parse()
            .map_err(|_| invalid("bind_addr", format!("'{}' is not host:port", self.bind_addr)))
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_minutes * 60)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_settings(&self) -> RefreshSettings {
        RefreshSettings {
            site_codes: stations::all_site_codes(&self.stations),
            parameter_codes: self.parameter_codes.clone(),
            lookback: chrono::Duration::days(self.lookback_days),
            max_concurrent_fetches: self.max_concurrent_fetches,
        }
    }
}
