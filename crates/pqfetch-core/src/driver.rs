//! Job driver: runs every discovered file through claim → download → release,
//! one file at a time, and aggregates a run summary.
//!
//! Errors of one file are logged and recorded in its `FileReport`; the driver
//! moves on to the next file. Only a failure to list the input directory ends
//! the run early.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::batch::{AllocationError, BatchAllocator};
use crate::config::JobConfig;
use crate::control::AbortToken;
use crate::engine::{DownloadEngine, EngineReport};
use crate::fetch::{CurlTransport, Fetcher, Transport};
use crate::lifecycle::SourceFile;
use crate::progress::ProgressStats;
use crate::record_store::{RecordStore, ReleaseOutcome, StoreError};

/// How a file left this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// All rows terminal; renamed to `_processed`.
    Processed,
    /// Rows remain pending (interrupted); stays `_processing`.
    StillProcessing { pending: usize },
    /// Claimed by another run.
    Skipped { reason: String },
    /// Read/write/allocation failure; stays `_processing` if it was claimed.
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    /// Path at the time the file was discovered.
    pub path: PathBuf,
    pub outcome: FileOutcome,
    pub succeeded: usize,
    pub failed: usize,
    pub bytes_written: u64,
}

impl FileReport {
    fn new(path: PathBuf, outcome: FileOutcome) -> Self {
        Self {
            path,
            outcome,
            succeeded: 0,
            failed: 0,
            bytes_written: 0,
        }
    }

    fn with_counts(mut self, report: &EngineReport) -> Self {
        self.succeeded = report.succeeded;
        self.failed = report.failed;
        self.bytes_written = report.bytes_written;
        self
    }
}

/// Totals for the whole invocation.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub files: Vec<FileReport>,
    pub interrupted: bool,
    pub elapsed: Duration,
}

impl RunSummary {
    pub fn rows_succeeded(&self) -> usize {
        self.files.iter().map(|f| f.succeeded).sum()
    }

    pub fn rows_failed(&self) -> usize {
        self.files.iter().map(|f| f.failed).sum()
    }

    pub fn bytes_written(&self) -> u64 {
        self.files.iter().map(|f| f.bytes_written).sum()
    }

    pub fn count(&self, pred: impl Fn(&FileOutcome) -> bool) -> usize {
        self.files.iter().filter(|f| pred(&f.outcome)).count()
    }
}

pub struct JobDriver<T> {
    config: JobConfig,
    store: RecordStore,
    fetcher: Fetcher<T>,
    allocator: BatchAllocator,
    abort: AbortToken,
}

impl JobDriver<CurlTransport> {
    /// Driver using libcurl with the configured user agent.
    pub fn from_config(config: JobConfig, abort: AbortToken) -> Result<Self, AllocationError> {
        let transport = CurlTransport::new(config.user_agent.clone());
        Self::new(config, transport, abort)
    }
}

impl<T: Transport> JobDriver<T> {
    /// `config` must already be validated.
    pub fn new(config: JobConfig, transport: T, abort: AbortToken) -> Result<Self, AllocationError> {
        let store = RecordStore::from_config(&config);
        let fetcher = Fetcher::new(transport, config.retry_policy(), config.timeout);
        let allocator = BatchAllocator::open(&config.output_dir, config.batch_capacity_bytes)?;
        Ok(Self {
            config,
            store,
            fetcher,
            allocator,
            abort,
        })
    }

    pub fn fetcher(&self) -> &Fetcher<T> {
        &self.fetcher
    }

    /// Process every candidate file in order. Stops claiming new files once
    /// the abort token is set.
    pub fn run<F>(&self, mut on_progress: F) -> Result<RunSummary, StoreError>
    where
        F: FnMut(&SourceFile, &ProgressStats),
    {
        let started = Instant::now();
        let mut summary = RunSummary::default();
        for file in self.store.discover()? {
            if self.abort.is_aborted() {
                break;
            }
            let report = self.process_file(file, &mut on_progress);
            summary.files.push(report);
        }
        summary.interrupted = self.abort.is_aborted();
        summary.elapsed = started.elapsed();
        tracing::info!(
            files = summary.files.len(),
            succeeded = summary.rows_succeeded(),
            failed = summary.rows_failed(),
            bytes = summary.bytes_written(),
            interrupted = summary.interrupted,
            "run finished in {:.1}s",
            summary.elapsed.as_secs_f64()
        );
        Ok(summary)
    }

    fn process_file<F>(&self, file: SourceFile, on_progress: &mut F) -> FileReport
    where
        F: FnMut(&SourceFile, &ProgressStats),
    {
        let path = file.path();
        let claimed = match self.store.claim(file) {
            Ok(c) => c,
            Err(e) if e.is_claim_conflict() => {
                tracing::warn!("skipping {}: {}", path.display(), e);
                return FileReport::new(path, FileOutcome::Skipped { reason: e.to_string() });
            }
            Err(e) => {
                tracing::error!("cannot claim {}: {}", path.display(), e);
                return FileReport::new(path, FileOutcome::Failed { error: e.to_string() });
            }
        };

        let rows = match claimed.load_pending_rows(&self.config.url_column) {
            Ok(rows) => rows,
            Err(e) => {
                tracing::error!("{}", e);
                return FileReport::new(path, FileOutcome::Failed { error: e.to_string() });
            }
        };

        let engine = DownloadEngine::new(
            &self.fetcher,
            &self.allocator,
            self.config.max_workers,
            self.abort.clone(),
        );
        let source = claimed.source().clone();
        let mut forward = |stats: &ProgressStats| on_progress(&source, stats);
        let progress: &mut dyn FnMut(&ProgressStats) = &mut forward;
        let report = match engine.run(&claimed, rows, Some(progress)) {
            Ok(report) => report,
            Err(e) => {
                tracing::error!("abandoning {}: {}", claimed.path().display(), e);
                if let Err(flush_err) = claimed.flush() {
                    tracing::error!("{}", flush_err);
                }
                return FileReport::new(path, FileOutcome::Failed { error: e.to_string() });
            }
        };

        let outcome = match claimed.release() {
            Ok(ReleaseOutcome::Processed { .. }) => FileOutcome::Processed,
            Ok(ReleaseOutcome::StillProcessing { pending, .. }) => {
                FileOutcome::StillProcessing { pending }
            }
            Err(e) => {
                tracing::error!("{}", e);
                FileOutcome::Failed { error: e.to_string() }
            }
        };
        FileReport::new(path, outcome).with_counts(&report)
    }
}
