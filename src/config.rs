use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const API_URL_ENV: &str = "NBRUN_API_URL";
/// Shortest poll interval accepted from a file or flag.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(100);
const API_VERSION_SUFFIX: &str = "/api/v1";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid config {path}: {message}")]
    Invalid { path: PathBuf, message: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend base URL; `/api/v1` is appended unless already present.
    pub api_url: String,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    pub max_poll_failures: u32,
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    pub default_cpu_milli: Option<u32>,
    pub default_memory_mib: Option<u32>,
    pub python_version: Option<String>,
    pub token_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            poll_interval: Duration::from_secs(5),
            max_poll_failures: 3,
            request_timeout: Duration::from_secs(30),
            default_cpu_milli: Some(1000),
            default_memory_mib: Some(2048),
            python_version: None,
            token_path: None,
        }
    }
}

impl Config {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("nbrun").join("config.toml"))
    }

    /// Load from `explicit` if given (must exist), else the default location
    /// if present, else defaults. `NBRUN_API_URL` overrides the file.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                cfg.api_url = url;
            }
        }
        Ok(cfg)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let cfg = toml::from_str::<Config>(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        cfg.validate().map_err(|message| ConfigError::Invalid {
            path: path.to_path_buf(),
            message,
        })?;
        tracing::debug!("Loaded config from {}", path.display());
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), String> {
        check_poll_interval(self.poll_interval)?;
        if self.max_poll_failures == 0 {
            return Err("max_poll_failures must be at least 1".to_string());
        }
        Ok(())
    }

    /// The versioned API base, e.g. `http://localhost:8000/api/v1`.
    pub fn api_base_url(&self) -> String {
        normalize_api_url(&self.api_url)
    }

    pub fn token_path(&self) -> Option<PathBuf> {
        self.token_path
            .clone()
            .or_else(crate::session::store::FileTokenStore::default_path)
    }
}

/// Also applied to the `--poll-interval` flag.
pub fn check_poll_interval(interval: Duration) -> Result<(), String> {
    if interval < MIN_POLL_INTERVAL {
        return Err(format!(
            "poll_interval must be at least {}",
            humantime::format_duration(MIN_POLL_INTERVAL)
        ));
    }
    Ok(())
}

pub fn normalize_api_url(base: &str) -> String {
    let base = base.trim();
    if base.ends_with(API_VERSION_SUFFIX) {
        base.to_string()
    } else if let Some(stripped) = base.strip_suffix('/') {
        format!("{stripped}{API_VERSION_SUFFIX}")
    } else {
        format!("{base}{API_VERSION_SUFFIX}")
    }
}
