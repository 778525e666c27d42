//! Record store: Parquet files as durable per-row status storage.
//!
//! `RecordStore::discover` lists candidate files, `claim` takes exclusive
//! ownership (claim marker + rename to `_processing`), and the returned
//! `ClaimedFile` serves pending rows, buffers row updates from many workers,
//! and on `release` flushes them and renames to `_processed` once every row is
//! terminal.

mod error;
mod table;

pub use error::StoreError;
pub use table::{ERROR_COLUMN, OUTPUT_PATH_COLUMN, STATUS_COLUMN};

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use crate::config::JobConfig;
use crate::lifecycle::{FileState, SourceFile, Transition};
use table::Table;

/// Stable identifier of a row: its position in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RowId(pub u64);

/// Download status stored in the `status` column (null = pending).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Pending,
    Success,
    Failed,
}

impl RowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RowStatus::Pending => "pending",
            RowStatus::Success => "success",
            RowStatus::Failed => "failed",
        }
    }

    /// Parse a stored cell. Null, empty and unknown values are pending.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some("success") => RowStatus::Success,
            Some("failed") => RowStatus::Failed,
            _ => RowStatus::Pending,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, RowStatus::Pending)
    }

    /// Value written to the `status` column.
    pub(crate) fn stored(self) -> Option<&'static str> {
        match self {
            RowStatus::Pending => None,
            terminal => Some(terminal.as_str()),
        }
    }
}

/// A pending row handed to the download engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub id: RowId,
    /// URL cell; empty if the cell was null.
    pub url: String,
}

/// Terminal update for one row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowUpdate {
    pub row: RowId,
    pub status: RowStatus,
    pub error: Option<String>,
    pub output_path: Option<String>,
}

impl RowUpdate {
    pub fn success(row: RowId, output_path: &Path) -> Self {
        Self {
            row,
            status: RowStatus::Success,
            error: None,
            output_path: Some(output_path.to_string_lossy().into_owned()),
        }
    }

    pub fn failed(row: RowId, error: impl ToString) -> Self {
        Self {
            row,
            status: RowStatus::Failed,
            error: Some(error.to_string()),
            output_path: None,
        }
    }
}

/// What `release` did with the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// Every row terminal; renamed to `_processed`.
    Processed { path: PathBuf },
    /// Some rows still pending; left as `_processing` for a later run.
    StillProcessing { path: PathBuf, pending: usize },
}

/// Entry point over the input directory.
#[derive(Debug, Clone)]
pub struct RecordStore {
    input_dir: PathBuf,
    resume: bool,
    flush_every: usize,
}

impl RecordStore {
    pub fn new(input_dir: impl Into<PathBuf>, resume: bool, flush_every: usize) -> Self {
        Self {
            input_dir: input_dir.into(),
            resume,
            flush_every: flush_every.max(1),
        }
    }

    pub fn from_config(cfg: &JobConfig) -> Self {
        Self::new(&cfg.input_dir, cfg.resume, cfg.flush_every)
    }

    /// Candidate files in lexicographic path order. `_processed` files are
    /// skipped; `_processing` files are candidates for re-claim.
    pub fn discover(&self) -> Result<impl Iterator<Item = SourceFile>, StoreError> {
        let entries =
            fs::read_dir(&self.input_dir).map_err(|e| StoreError::read(&self.input_dir, e))?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        let resume = self.resume;
        Ok(paths
            .into_iter()
            .filter_map(|p| SourceFile::from_path(&p))
            .filter(move |f| match f.state() {
                FileState::Processed => false,
                FileState::Processing => {
                    if !resume {
                        tracing::debug!(
                            "{} was left in processing; re-claiming",
                            f.path().display()
                        );
                    }
                    true
                }
                FileState::Unprocessed => true,
            }))
    }

    /// Take exclusive ownership of `file` and move it to `_processing`.
    ///
    /// Fails with `ClaimConflict` if another run holds the claim marker (unless
    /// resuming, where leftover markers are stale) or if the `_processing` or
    /// `_processed` name of the dataset is already taken.
    pub fn claim(&self, file: SourceFile) -> Result<ClaimedFile, StoreError> {
        let path = file.path();
        let next = file
            .state()
            .apply(Transition::Claim)
            .ok_or(StoreError::InvalidTransition {
                path: path.clone(),
                from: file.state(),
                transition: Transition::Claim,
            })?;

        let marker = ClaimMarker::acquire(file.claim_marker_path(), &path, self.resume)?;
        for state in [FileState::Processing, FileState::Processed] {
            let other = file.path_in(state);
            if state != file.state() && other.exists() {
                return Err(StoreError::ClaimConflict { path: other });
            }
        }
        let claimed = file.with_state(next);
        if file.state() == next {
            tracing::info!("adopting {}", path.display());
        } else {
            let target = claimed.path();
            fs::rename(&path, &target).map_err(|e| StoreError::write(&path, e))?;
            tracing::info!("claimed {}", target.display());
        }

        Ok(ClaimedFile {
            file: claimed,
            flush_every: self.flush_every,
            buffer: Mutex::new(Buffer::default()),
            _marker: marker,
        })
    }
}

/// Exclusive-create marker naming the owning process. Removed on drop.
struct ClaimMarker {
    path: PathBuf,
}

impl ClaimMarker {
    fn acquire(path: PathBuf, dataset: &Path, take_over_stale: bool) -> Result<Self, StoreError> {
        match create_marker(&path) {
            Ok(()) => return Ok(Self { path }),
            Err(e) if e.kind() != io::ErrorKind::AlreadyExists => {
                return Err(StoreError::write(&path, e));
            }
            Err(_) if !take_over_stale => {
                return Err(StoreError::ClaimConflict {
                    path: dataset.to_path_buf(),
                });
            }
            Err(_) => {}
        }

        let owner = fs::read_to_string(&path).unwrap_or_default();
        tracing::warn!(
            owner = owner.trim(),
            "taking over stale claim marker {}",
            path.display()
        );
        fs::remove_file(&path).map_err(|e| StoreError::write(&path, e))?;
        match create_marker(&path) {
            Ok(()) => Ok(Self { path }),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(StoreError::ClaimConflict {
                path: dataset.to_path_buf(),
            }),
            Err(e) => Err(StoreError::write(&path, e)),
        }
    }
}

fn create_marker(path: &Path) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    writeln!(file, "{}", std::process::id())
}

impl Drop for ClaimMarker {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!("could not remove claim marker {}: {}", self.path.display(), e);
        }
    }
}

#[derive(Default)]
struct Buffer {
    table: Option<Table>,
    updates: Vec<RowUpdate>,
    /// In-memory table differs from disk (a previous write failed).
    dirty: bool,
}

/// A dataset owned by this run. Shared by reference between download workers.
pub struct ClaimedFile {
    file: SourceFile,
    flush_every: usize,
    buffer: Mutex<Buffer>,
    _marker: ClaimMarker,
}

impl ClaimedFile {
    pub fn source(&self) -> &SourceFile {
        &self.file
    }

    /// Current path (`_processing` name).
    pub fn path(&self) -> PathBuf {
        self.file.path()
    }

    fn lock(&self) -> MutexGuard<'_, Buffer> {
        self.buffer.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Read the file and return its pending rows. A missing status column
    /// means every row is pending.
    pub fn load_pending_rows(&self, url_column: &str) -> Result<Vec<Row>, StoreError> {
        let path = self.path();
        let table = Table::read(&path)?;
        let urls = table.urls(&path, url_column)?;
        let rows: Vec<Row> = urls
            .into_iter()
            .enumerate()
            .filter(|(i, _)| !table.status(*i).is_terminal())
            .map(|(i, url)| Row {
                id: RowId(i as u64),
                url: url.unwrap_or_default(),
            })
            .collect();
        tracing::info!(
            "{}: {} of {} rows pending",
            path.display(),
            rows.len(),
            table.num_rows()
        );
        let mut buf = self.lock();
        buf.table = Some(table);
        buf.updates.clear();
        buf.dirty = false;
        Ok(rows)
    }

    /// Buffer a terminal update. Every `flush_every` updates the file is
    /// rewritten so a crash loses at most that many committed rows.
    pub fn commit_row(&self, update: RowUpdate) -> Result<(), StoreError> {
        let mut buf = self.lock();
        buf.updates.push(update);
        if buf.updates.len() >= self.flush_every {
            self.flush_locked(&mut buf)?;
        }
        Ok(())
    }

    /// Write buffered updates to disk.
    pub fn flush(&self) -> Result<(), StoreError> {
        let mut buf = self.lock();
        self.flush_locked(&mut buf)
    }

    fn flush_locked(&self, buf: &mut Buffer) -> Result<(), StoreError> {
        if buf.updates.is_empty() && !buf.dirty {
            return Ok(());
        }
        let path = self.path();
        let Some(table) = buf.table.as_mut() else {
            return Err(StoreError::write(
                &path,
                "rows were committed before the file was loaded",
            ));
        };
        for update in buf.updates.drain(..) {
            if table.apply(&update) {
                buf.dirty = true;
            } else {
                tracing::warn!(row = update.row.0, "ignoring update for a row that is not pending");
            }
        }
        if buf.dirty {
            table.write(&path)?;
            buf.dirty = false;
        }
        Ok(())
    }

    /// Flush, then rename to `_processed` if no row is pending. Otherwise the
    /// file stays `_processing` and a later run picks it up.
    pub fn release(self) -> Result<ReleaseOutcome, StoreError> {
        let path = self.path();
        let mut buf = self.lock();
        if buf.table.is_none() {
            buf.table = Some(Table::read(&path)?);
        }
        self.flush_locked(&mut buf)?;

        let Some(table) = buf.table.as_ref() else {
            return Err(StoreError::read(&path, "table not loaded"));
        };
        let pending = table.pending_count();
        if pending > 0 {
            tracing::info!("{}: {} rows still pending, leaving in processing", path.display(), pending);
            return Ok(ReleaseOutcome::StillProcessing { path, pending });
        }
        if !table.has_bookkeeping_columns() {
            table.write(&path)?;
        }

        let from = self.file.state();
        let next = from.apply(Transition::Release).ok_or(StoreError::InvalidTransition {
            path: path.clone(),
            from,
            transition: Transition::Release,
        })?;
        let target = self.file.path_in(next);
        if target.exists() {
            return Err(StoreError::NameTaken { path: target });
        }
        fs::rename(&path, &target).map_err(|e| StoreError::write(&path, e))?;
        tracing::info!("marked {} as processed", target.display());
        Ok(ReleaseOutcome::Processed { path: target })
    }
}
