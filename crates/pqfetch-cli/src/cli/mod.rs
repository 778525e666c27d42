//! CLI for pqfetch.

mod commands;

use anyhow::{Context, Result};
use clap::Parser;
use pqfetch_core::config::{self, gib_to_bytes, JobConfig, Settings};
use pqfetch_core::logging;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use commands::{print_summary, run_job};

/// Exit status when the run was stopped by Ctrl-C.
pub(crate) const EXIT_INTERRUPTED: u8 = 130;

/// Download every image referenced by a URL column in a directory of Parquet files.
#[derive(Debug, Parser)]
#[command(name = "pqfetch")]
#[command(
    about = "pqfetch: resumable bulk image downloads from Parquet URL columns",
    long_about = None
)]
pub struct Cli {
    /// Directory containing the Parquet files.
    #[arg(long, value_name = "PATH")]
    pub input_dir: PathBuf,

    /// Root directory for the batch folders (000001, 000002, ...).
    #[arg(long, value_name = "PATH")]
    pub output_dir: PathBuf,

    /// Column holding the image URL.
    #[arg(long, default_value = "url", value_name = "NAME")]
    pub url_column: String,

    /// Number of concurrent download workers.
    #[arg(long, default_value_t = 16, value_name = "N")]
    pub max_workers: usize,

    /// Per-request timeout.
    #[arg(long, default_value_t = 30, value_name = "SECONDS")]
    pub timeout: u64,

    /// Retries after the first attempt for retryable failures.
    #[arg(long, default_value_t = 3, value_name = "N")]
    pub retries: u32,

    /// Capacity of one batch folder in GiB.
    #[arg(long, default_value_t = 10, value_name = "G")]
    pub batch_size_gb: u64,

    /// Take over files left in processing by a run that died.
    #[arg(long)]
    pub resume: bool,

    /// Tunables file (default: ~/.config/pqfetch/config.toml).
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Job configuration from flags plus tunables (not yet validated).
    pub fn job_config(&self, settings: &Settings) -> JobConfig {
        let mut cfg = JobConfig::new(&self.input_dir, &self.output_dir).with_settings(settings);
        cfg.url_column = self.url_column.clone();
        cfg.max_workers = self.max_workers;
        cfg.timeout = Duration::from_secs(self.timeout);
        cfg.retries = self.retries;
        cfg.batch_capacity_bytes = gib_to_bytes(self.batch_size_gb);
        cfg.resume = self.resume;
        cfg
    }
}

pub async fn run_from_args() -> Result<ExitCode> {
    let cli = Cli::parse();

    // An explicit --config must load; the default file is best effort.
    let mut created_config = None;
    let (settings, settings_err) = match &cli.config {
        Some(path) => {
            let settings = config::load_from(path)
                .with_context(|| format!("cannot load config {}", path.display()))?;
            (settings, None)
        }
        None => match config::load_or_init() {
            Ok(loaded) => {
                created_config = loaded.created;
                (loaded.settings, None)
            }
            Err(e) => (Settings::default(), Some(e)),
        },
    };

    let cfg = cli.job_config(&settings).validate()?;

    if let Err(e) = logging::init_logging(&cfg.output_dir) {
        logging::init_logging_stderr();
        tracing::warn!("file logging unavailable, using stderr only: {:#}", e);
    }
    if let Some(path) = created_config {
        tracing::info!("created default config at {}", path.display());
    }
    if let Some(e) = settings_err {
        tracing::warn!("using default tunables: {:#}", e);
    }
    tracing::debug!("job config: {:?}", cfg);

    let summary = run_job(cfg).await?;
    print_summary(&summary);
    if summary.interrupted {
        Ok(ExitCode::from(EXIT_INTERRUPTED))
    } else {
        Ok(ExitCode::SUCCESS)
    }
}
