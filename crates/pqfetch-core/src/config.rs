//! Job configuration: CLI-facing `JobConfig` plus optional tunables loaded from
//! `~/.config/pqfetch/config.toml`.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::retry::RetryPolicy;

/// Bytes in one GiB; `--batch-size-gb` is multiplied by this.
pub const BYTES_PER_GIB: u64 = 1024 * 1024 * 1024;

/// User agent sent with every request unless overridden in config.toml.
/// Many image hosts reject requests without a browser-like agent.
pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:72.0) Gecko/20100101 Firefox/72.0";

/// Retry backoff parameters (optional `[retry]` section in config.toml).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Base delay in seconds for exponential backoff (e.g. 0.5 = 500ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
    /// Add random jitter on top of the computed delay.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 0.5,
            max_delay_secs: 10,
            jitter: true,
        }
    }
}

/// Tunables that are not exposed as CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// `User-Agent` header for image requests.
    pub user_agent: String,
    /// Number of committed rows buffered before the Parquet file is rewritten.
    pub flush_every: usize,
    /// Optional retry backoff; if missing, built-in defaults are used.
    #[serde(default)]
    pub retry: Option<RetryConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            flush_every: 500,
            retry: None,
        }
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("pqfetch")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Tunables plus where a default file was written, if one was.
#[derive(Debug, Clone)]
pub struct LoadedSettings {
    pub settings: Settings,
    /// Set when the file did not exist and a default one was created. Logged
    /// by the caller once logging is up.
    pub created: Option<PathBuf>,
}

/// Load tunables from the default location, creating a default file if none exists.
pub fn load_or_init() -> Result<LoadedSettings> {
    load_or_init_at(&config_path()?)
}

/// Same as [`load_or_init`] for an explicit location.
pub fn load_or_init_at(path: &Path) -> Result<LoadedSettings> {
    if path.exists() {
        return Ok(LoadedSettings {
            settings: load_from(path)?,
            created: None,
        });
    }
    let settings = Settings::default();
    let toml = toml::to_string_pretty(&settings)?;
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, toml)?;
    Ok(LoadedSettings {
        settings,
        created: Some(path.to_path_buf()),
    })
}

/// Load tunables from an explicit path (`--config`).
pub fn load_from(path: &Path) -> Result<Settings> {
    let data = fs::read_to_string(path)?;
    let settings: Settings = toml::from_str(&data)?;
    Ok(settings)
}

/// Invalid flags or paths. These are the only errors that stop the whole process.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("input directory {} does not exist", .0.display())]
    InputDirMissing(PathBuf),

    #[error("input path {} is not a directory", .0.display())]
    InputNotDirectory(PathBuf),

    #[error("cannot prepare output directory {}: {source}", .path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid worker count {0}: must be at least 1")]
    InvalidWorkerCount(usize),

    #[error("batch capacity must be greater than zero bytes")]
    InvalidBatchCapacity,

    #[error("URL column name must not be empty")]
    EmptyUrlColumn,

    #[error("flush interval must be at least 1 row")]
    InvalidFlushInterval,

    #[error("request timeout must be at least 1ms")]
    InvalidTimeout,

    #[error("invalid retry delay: base {base}s, max {max}s")]
    InvalidRetryDelay { base: f64, max: u64 },
}

/// The whole invocation. Built once, immutable for the run.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Directory holding the Parquet files.
    pub input_dir: PathBuf,
    /// Root of the batch folders (`000001`, `000002`, ...).
    pub output_dir: PathBuf,
    /// Column holding the image URL.
    pub url_column: String,
    /// Number of concurrent download workers.
    pub max_workers: usize,
    /// Per-attempt request timeout.
    pub timeout: Duration,
    /// Retries after the first attempt.
    pub retries: u32,
    /// Capacity of one batch folder in bytes.
    pub batch_capacity_bytes: u64,
    /// Take over `_processing` files left behind by a dead run.
    pub resume: bool,
    pub user_agent: String,
    pub flush_every: usize,
    pub retry: RetryConfig,
}

impl JobConfig {
    /// Config with the CLI defaults for everything except the two directories.
    pub fn new(input_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        let settings = Settings::default();
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            url_column: "url".to_string(),
            max_workers: 16,
            timeout: Duration::from_secs(30),
            retries: 3,
            batch_capacity_bytes: 10 * BYTES_PER_GIB,
            resume: false,
            user_agent: settings.user_agent,
            flush_every: settings.flush_every,
            retry: RetryConfig::default(),
        }
    }

    /// Apply tunables from config.toml.
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        self.user_agent = settings.user_agent.clone();
        self.flush_every = settings.flush_every;
        if let Some(retry) = &settings.retry {
            self.retry = retry.clone();
        }
        self
    }

    /// Check flags and paths; creates the output directory and makes it absolute
    /// so recorded output paths stay valid regardless of the working directory.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if !self.input_dir.exists() {
            return Err(ConfigError::InputDirMissing(self.input_dir));
        }
        if !self.input_dir.is_dir() {
            return Err(ConfigError::InputNotDirectory(self.input_dir));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::InvalidWorkerCount(self.max_workers));
        }
        // libcurl reads a zero timeout as "never time out".
        if self.timeout < Duration::from_millis(1) {
            return Err(ConfigError::InvalidTimeout);
        }
        if self.batch_capacity_bytes == 0 {
            return Err(ConfigError::InvalidBatchCapacity);
        }
        if self.url_column.trim().is_empty() {
            return Err(ConfigError::EmptyUrlColumn);
        }
        if self.flush_every == 0 {
            return Err(ConfigError::InvalidFlushInterval);
        }
        let base = self.retry.base_delay_secs;
        if !base.is_finite() || base < 0.0 || base > self.retry.max_delay_secs as f64 {
            return Err(ConfigError::InvalidRetryDelay {
                base,
                max: self.retry.max_delay_secs,
            });
        }

        fs::create_dir_all(&self.output_dir).map_err(|source| ConfigError::OutputDir {
            path: self.output_dir.clone(),
            source,
        })?;
        self.output_dir =
            fs::canonicalize(&self.output_dir).map_err(|source| ConfigError::OutputDir {
                path: self.output_dir.clone(),
                source,
            })?;
        Ok(self)
    }

    /// Retry policy for the fetcher: `retries + 1` attempts with the configured backoff.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.retries,
            base_delay: Duration::from_secs_f64(self.retry.base_delay_secs.max(0.0)),
            max_delay: Duration::from_secs(self.retry.max_delay_secs),
            jitter: self.retry.jitter,
        }
    }
}

/// `--batch-size-gb` to bytes, saturating.
pub fn gib_to_bytes(gib: u64) -> u64 {
    gib.saturating_mul(BYTES_PER_GIB)
}
