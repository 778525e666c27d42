//! Bounded-concurrency download of one claimed file's pending rows.
//!
//! A fixed pool of scoped worker threads pulls rows from a shared queue. Each
//! worker fetches, reserves a destination, writes the bytes atomically and
//! commits the row, then reports the outcome to the coordinating thread over a
//! channel. A file-fatal error (allocation, write, or record store failure)
//! halts the pool: workers finish the row in hand and stop pulling.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Mutex};
use std::time::Instant;
use thiserror::Error;

use crate::batch::{AllocationError, BatchAllocator};
use crate::control::AbortToken;
use crate::fetch::{Fetcher, Transport};
use crate::progress::ProgressStats;
use crate::record_store::{ClaimedFile, Row, RowUpdate, StoreError};
use crate::storage;
use crate::url_model::output_file_name;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("download worker panicked")]
    WorkerPanicked,
}

/// Counts for one engine run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineReport {
    pub succeeded: usize,
    pub failed: usize,
    pub bytes_written: u64,
    /// Stopped by the abort token with rows left pending.
    pub interrupted: bool,
}

impl EngineReport {
    pub fn attempted(&self) -> usize {
        self.succeeded + self.failed
    }
}

enum RowOutcome {
    Success { bytes: u64 },
    Failed,
}

/// Shared, read-only collaborators of a run.
pub struct DownloadEngine<'a, T> {
    fetcher: &'a Fetcher<T>,
    allocator: &'a BatchAllocator,
    workers: usize,
    abort: AbortToken,
}

impl<'a, T: Transport> DownloadEngine<'a, T> {
    pub fn new(
        fetcher: &'a Fetcher<T>,
        allocator: &'a BatchAllocator,
        workers: usize,
        abort: AbortToken,
    ) -> Self {
        Self {
            fetcher,
            allocator,
            workers: workers.max(1),
            abort,
        }
    }

    /// Attempt every row once (unless halted or aborted). Successful rows end up
    /// in a batch folder; every attempted row is committed to `file`.
    pub fn run(
        &self,
        file: &ClaimedFile,
        rows: Vec<Row>,
        mut progress: Option<&mut dyn FnMut(&ProgressStats)>,
    ) -> Result<EngineReport, EngineError> {
        let total = rows.len();
        let mut report = EngineReport::default();
        if total == 0 {
            return Ok(report);
        }

        let started = Instant::now();
        let queue: Mutex<VecDeque<Row>> = Mutex::new(rows.into());
        let halt = AtomicBool::new(false);
        let num_workers = self.workers.min(total);
        let mut first_error: Option<EngineError> = None;

        std::thread::scope(|s| {
            let (tx, rx) = mpsc::channel();
            let mut handles = Vec::with_capacity(num_workers);
            for _ in 0..num_workers {
                let tx = tx.clone();
                let queue = &queue;
                let halt = &halt;
                handles.push(s.spawn(move || loop {
                    if halt.load(Ordering::Relaxed) || self.abort.is_aborted() {
                        break;
                    }
                    let next = queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
                    let Some(row) = next else {
                        break;
                    };
                    let res = self.process_row(file, &row);
                    if res.is_err() {
                        halt.store(true, Ordering::Relaxed);
                    }
                    if tx.send(res).is_err() {
                        break;
                    }
                }));
            }
            drop(tx);

            for res in rx {
                match res {
                    Ok(RowOutcome::Success { bytes }) => {
                        report.succeeded += 1;
                        report.bytes_written += bytes;
                    }
                    Ok(RowOutcome::Failed) => report.failed += 1,
                    Err(e) => {
                        tracing::error!("halting downloads for {}: {}", file.path().display(), e);
                        if first_error.is_none() {
                            first_error = Some(e);
                        }
                    }
                }
                if let Some(cb) = progress.as_mut() {
                    cb(&ProgressStats {
                        rows_done: report.attempted(),
                        rows_total: total,
                        rows_failed: report.failed,
                        bytes_done: report.bytes_written,
                        elapsed_secs: started.elapsed().as_secs_f64(),
                    });
                }
            }

            for h in handles {
                if h.join().is_err() && first_error.is_none() {
                    first_error = Some(EngineError::WorkerPanicked);
                }
            }
        });

        if let Some(e) = first_error {
            return Err(e);
        }
        report.interrupted = self.abort.is_aborted() && report.attempted() < total;
        tracing::info!(
            succeeded = report.succeeded,
            failed = report.failed,
            bytes = report.bytes_written,
            interrupted = report.interrupted,
            "finished rows of {}",
            file.path().display()
        );
        Ok(report)
    }

    fn process_row(&self, file: &ClaimedFile, row: &Row) -> Result<RowOutcome, EngineError> {
        match self.fetcher.fetch(&row.url) {
            Ok(bytes) => {
                let name = output_file_name(file.source().stem(), row.id.0, &row.url);
                let size = bytes.len() as u64;
                let dest = self.allocator.next_destination(size, &name)?;
                storage::write_atomic(&dest.path, &bytes).map_err(|source| {
                    AllocationError::Write {
                        path: dest.path.clone(),
                        source,
                    }
                })?;
                file.commit_row(RowUpdate::success(row.id, &dest.path))?;
                Ok(RowOutcome::Success { bytes: size })
            }
            Err(e) => {
                tracing::debug!(row = row.id.0, url = %row.url, "row failed: {}", e);
                file.commit_row(RowUpdate::failed(row.id, &e))?;
                Ok(RowOutcome::Failed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record_store::test_support::{read_column, write_url_file};
    use crate::record_store::{RecordStore, ReleaseOutcome, STATUS_COLUMN};
    use crate::fetch::test_support::StubTransport;
    use crate::retry::RetryPolicy;
    use std::fs;
    use std::path::Path;
    use std::time::Duration;

    fn no_retry() -> RetryPolicy {
        RetryPolicy {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter: false,
        }
    }

    fn claim_single(dir: &Path, urls: &[Option<&str>]) -> ClaimedFile {
        let input = dir.join("in");
        fs::create_dir_all(&input).unwrap();
        write_url_file(&input.join("shard.parquet"), urls);
        let store = RecordStore::new(&input, false, 1000);
        store.claim(store.discover().unwrap().next().unwrap()).unwrap()
    }

    #[test]
    fn downloads_and_commits_every_row() {
        let dir = tempfile::tempdir().unwrap();
        let urls: Vec<String> = (0..40).map(|i| format!("http://img/{}.png", i)).collect();
        let cells: Vec<Option<&str>> = urls.iter().map(|u| Some(u.as_str())).collect();
        let claimed = claim_single(dir.path(), &cells);
        let rows = claimed.load_pending_rows("url").unwrap();

        let bodies: Vec<(&str, usize)> = urls.iter().map(|u| (u.as_str(), 100)).collect();
        let fetcher = Fetcher::new(StubTransport::new(&bodies), no_retry(), Duration::from_secs(1));
        let out = dir.path().join("out");
        let alloc = BatchAllocator::open(&out, 1000).unwrap();
        let engine = DownloadEngine::new(&fetcher, &alloc, 8, AbortToken::new());

        let mut snapshots = 0;
        let mut count = |_: &ProgressStats| snapshots += 1;
        let on_progress: &mut dyn FnMut(&ProgressStats) = &mut count;
        let report = engine.run(&claimed, rows, Some(on_progress)).unwrap();
        assert_eq!(report.succeeded, 40);
        assert_eq!(report.failed, 0);
        assert_eq!(report.bytes_written, 4000);
        assert!(!report.interrupted);
        assert_eq!(snapshots, 40);
        assert_eq!(fetcher.transport().calls(), 40);

        for id in 1..=4 {
            let folder = out.join(format!("{:06}", id));
            assert_eq!(fs::read_dir(&folder).unwrap().count(), 10);
        }
        let names: Vec<String> = (1..=4)
            .flat_map(|id| fs::read_dir(out.join(format!("{:06}", id))).unwrap())
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert!(names.contains(&"shard_00000000.png".to_string()));
        assert!(names.contains(&"shard_00000039.png".to_string()));
        assert!(matches!(claimed.release().unwrap(), ReleaseOutcome::Processed { .. }));
    }

    #[test]
    fn fetch_failures_are_committed_as_failed() {
        let dir = tempfile::tempdir().unwrap();
        let claimed = claim_single(
            dir.path(),
            &[Some("http://img/ok.jpg"), Some("http://img/missing.jpg"), None],
        );
        let rows = claimed.load_pending_rows("url").unwrap();
        let fetcher = Fetcher::new(
            StubTransport::new(&[("http://img/ok.jpg", 10)]),
            no_retry(),
            Duration::from_secs(1),
        );
        let alloc = BatchAllocator::open(dir.path().join("out"), 1000).unwrap();
        let engine = DownloadEngine::new(&fetcher, &alloc, 2, AbortToken::new());
        let report = engine.run(&claimed, rows, None).unwrap();
        assert_eq!((report.succeeded, report.failed), (1, 2));
        // The null URL never reaches the transport.
        assert_eq!(fetcher.transport().calls(), 2);

        let ReleaseOutcome::Processed { path } = claimed.release().unwrap() else {
            panic!("expected processed");
        };
        let errors = read_column(&path, "error").unwrap();
        assert_eq!(errors[0], None);
        assert_eq!(errors[1].as_deref(), Some("ClientError: HTTP 404"));
        assert!(errors[2].as_deref().unwrap().starts_with("MalformedUrl"));
    }

    #[test]
    fn aborted_token_leaves_rows_pending() {
        let dir = tempfile::tempdir().unwrap();
        let claimed = claim_single(dir.path(), &[Some("http://img/a.jpg"), Some("http://img/b.jpg")]);
        let rows = claimed.load_pending_rows("url").unwrap();
        let fetcher = Fetcher::new(
            StubTransport::new(&[("http://img/a.jpg", 10), ("http://img/b.jpg", 10)]),
            no_retry(),
            Duration::from_secs(1),
        );
        let alloc = BatchAllocator::open(dir.path().join("out"), 1000).unwrap();
        let abort = AbortToken::new();
        abort.request_abort();
        let engine = DownloadEngine::new(&fetcher, &alloc, 2, abort);
        let report = engine.run(&claimed, rows, None).unwrap();
        assert!(report.interrupted);
        assert_eq!(report.attempted(), 0);
        assert!(matches!(
            claimed.release().unwrap(),
            ReleaseOutcome::StillProcessing { pending: 2, .. }
        ));
    }

    #[test]
    fn allocation_failure_halts_the_pool() {
        let dir = tempfile::tempdir().unwrap();
        let urls: Vec<String> = (0..20).map(|i| format!("http://img/{}.jpg", i)).collect();
        let cells: Vec<Option<&str>> = urls.iter().map(|u| Some(u.as_str())).collect();
        let claimed = claim_single(dir.path(), &cells);
        let rows = claimed.load_pending_rows("url").unwrap();
        let bodies: Vec<(&str, usize)> = urls.iter().map(|u| (u.as_str(), 10)).collect();
        let fetcher = Fetcher::new(StubTransport::new(&bodies), no_retry(), Duration::from_secs(1));

        let out = dir.path().join("out");
        let alloc = BatchAllocator::open(&out, 1000).unwrap();
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("000001"), b"not a folder").unwrap();

        let engine = DownloadEngine::new(&fetcher, &alloc, 2, AbortToken::new());
        let err = engine.run(&claimed, rows, None).unwrap_err();
        assert!(matches!(err, EngineError::Allocation(AllocationError::CreateFolder { .. })));
        // Each worker stops after at most the row in hand.
        assert!(fetcher.transport().calls() <= 2);

        claimed.flush().unwrap();
        assert_eq!(read_column(&claimed.path(), STATUS_COLUMN), None);
    }

    #[test]
    fn empty_row_set_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let claimed = claim_single(dir.path(), &[Some("http://img/a.jpg")]);
        let fetcher = Fetcher::new(StubTransport::new(&[]), no_retry(), Duration::from_secs(1));
        let alloc = BatchAllocator::open(dir.path().join("out"), 1000).unwrap();
        let engine = DownloadEngine::new(&fetcher, &alloc, 4, AbortToken::new());
        assert_eq!(engine.run(&claimed, Vec::new(), None).unwrap(), EngineReport::default());
    }
}
