//! Size-bounded batch folders under the output directory.
//!
//! Folders are named `000001`, `000002`, ... and each holds at most
//! `capacity` bytes, except that a single file may push a folder over the
//! limit (capacity is checked before the file is added).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

use crate::storage;

/// Width of the zero-padded folder name.
const FOLDER_DIGITS: usize = 6;

#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("cannot create batch folder {}: {source}", .path.display())]
    CreateFolder {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot scan output directory {}: {source}", .path.display())]
    Scan {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Where the next file goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub folder_id: u32,
    pub path: PathBuf,
}

#[derive(Debug)]
struct AllocState {
    folder_id: u32,
    running_total: u64,
}

/// Hands out destination paths, rolling over to a new folder when the current
/// one would exceed capacity. Shared by reference between download workers.
#[derive(Debug)]
pub struct BatchAllocator {
    output_dir: PathBuf,
    capacity: u64,
    state: Mutex<AllocState>,
}

impl BatchAllocator {
    /// Resume from the highest existing numeric folder (its byte total is
    /// recomputed from disk), or start at folder 1.
    pub fn open(output_dir: impl Into<PathBuf>, capacity: u64) -> Result<Self, AllocationError> {
        let output_dir = output_dir.into();
        let (folder_id, running_total) = match highest_folder(&output_dir)? {
            Some(id) => {
                let dir = folder_path(&output_dir, id);
                let total = folder_bytes(&dir)
                    .map_err(|source| AllocationError::Scan { path: dir, source })?;
                tracing::info!(folder = id, bytes = total, "resuming batch folder");
                (id, total)
            }
            None => (1, 0),
        };
        Ok(Self {
            output_dir,
            capacity,
            state: Mutex::new(AllocState {
                folder_id,
                running_total,
            }),
        })
    }

    /// Reserve `size` bytes for `file_name` and return its destination. The
    /// folder is created here; the caller writes the bytes outside the lock.
    pub fn next_destination(
        &self,
        size: u64,
        file_name: &str,
    ) -> Result<Destination, AllocationError> {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if state.running_total > 0 && state.running_total.saturating_add(size) > self.capacity {
            state.folder_id += 1;
            state.running_total = 0;
            tracing::info!(folder = state.folder_id, "rolling over to new batch folder");
        }
        let dir = folder_path(&self.output_dir, state.folder_id);
        fs::create_dir_all(&dir).map_err(|source| AllocationError::CreateFolder {
            path: dir.clone(),
            source,
        })?;
        state.running_total = state.running_total.saturating_add(size);
        Ok(Destination {
            folder_id: state.folder_id,
            path: dir.join(file_name),
        })
    }

    /// Current folder id and its byte total.
    pub fn current(&self) -> (u32, u64) {
        let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        (state.folder_id, state.running_total)
    }
}

/// `output_dir/000042`
pub fn folder_path(output_dir: &Path, id: u32) -> PathBuf {
    output_dir.join(format!("{:0width$}", id, width = FOLDER_DIGITS))
}

fn parse_folder_name(name: &str) -> Option<u32> {
    if name.len() != FOLDER_DIGITS || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok().filter(|id| *id > 0)
}

fn highest_folder(output_dir: &Path) -> Result<Option<u32>, AllocationError> {
    let entries = match fs::read_dir(output_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(AllocationError::Scan {
                path: output_dir.to_path_buf(),
                source,
            })
        }
    };
    Ok(entries
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir())
        .filter_map(|e| e.file_name().to_str().and_then(parse_folder_name))
        .max())
}

/// Sum of regular file sizes in `dir`, ignoring in-flight temp files.
fn folder_bytes(dir: &Path) -> io::Result<u64> {
    let mut total = 0u64;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_file() && !storage::is_temp_file(&entry.path()) {
            total = total.saturating_add(meta.len());
        }
    }
    Ok(total)
}
