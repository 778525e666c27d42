//! Record store errors. All of them are fatal to one file, never to the job.

use std::path::PathBuf;
use thiserror::Error;

use crate::lifecycle::{FileState, Transition};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum StoreError {
    /// The dataset is owned by another active run, or one of its other
    /// lifecycle names already exists. The file is skipped this run.
    #[error("{} is claimed by another run", .path.display())]
    ClaimConflict { path: PathBuf },

    /// The name a file would be renamed to already exists.
    #[error("{} already exists", .path.display())]
    NameTaken { path: PathBuf },

    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("cannot write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: BoxError,
    },

    #[error("{} has no column '{column}'", .path.display())]
    MissingColumn { path: PathBuf, column: String },

    #[error("{}: cannot {transition:?} a file in state {}", .path.display(), .from.as_str())]
    InvalidTransition {
        path: PathBuf,
        from: FileState,
        transition: Transition,
    },
}

impl StoreError {
    pub(crate) fn read(path: impl Into<PathBuf>, source: impl Into<BoxError>) -> Self {
        StoreError::Read {
            path: path.into(),
            source: source.into(),
        }
    }

    pub(crate) fn write(path: impl Into<PathBuf>, source: impl Into<BoxError>) -> Self {
        StoreError::Write {
            path: path.into(),
            source: source.into(),
        }
    }

    pub fn is_claim_conflict(&self) -> bool {
        matches!(self, StoreError::ClaimConflict { .. })
    }
}
