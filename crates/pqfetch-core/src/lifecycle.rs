//! Per-file lifecycle: `name.parquet` → `name_processing.parquet` →
//! `name_processed.parquet`.
//!
//! The state lives in the file name. Transitions are computed by a pure
//! function; the caller performs the rename that makes them real.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

/// File extension of tabular input files.
pub const DATA_EXTENSION: &str = "parquet";

const PROCESSING_SUFFIX: &str = "_processing";
const PROCESSED_SUFFIX: &str = "_processed";

/// Lifecycle state encoded in the file name suffix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Unprocessed,
    Processing,
    Processed,
}

/// Lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Take exclusive ownership before downloading.
    Claim,
    /// All rows terminal; mark the dataset done.
    Release,
}

impl FileState {
    pub fn as_str(self) -> &'static str {
        match self {
            FileState::Unprocessed => "unprocessed",
            FileState::Processing => "processing",
            FileState::Processed => "processed",
        }
    }

    /// Name suffix appended to the dataset stem in this state.
    pub fn suffix(self) -> &'static str {
        match self {
            FileState::Unprocessed => "",
            FileState::Processing => PROCESSING_SUFFIX,
            FileState::Processed => PROCESSED_SUFFIX,
        }
    }

    /// Next state, or `None` if the transition is not allowed from here.
    /// Claiming an already-claimed file is a no-op so that resumed runs can
    /// adopt `_processing` files.
    pub fn apply(self, transition: Transition) -> Option<FileState> {
        match (self, transition) {
            (FileState::Unprocessed, Transition::Claim) => Some(FileState::Processing),
            (FileState::Processing, Transition::Claim) => Some(FileState::Processing),
            (FileState::Processing, Transition::Release) => Some(FileState::Processed),
            _ => None,
        }
    }
}

/// One tabular file on disk: a logical dataset (`dir/stem`) in some state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFile {
    dir: PathBuf,
    stem: String,
    state: FileState,
}

impl SourceFile {
    /// Interpret `path` as a dataset file. Returns `None` for anything that is
    /// not a `.parquet` file with a UTF-8 name.
    pub fn from_path(path: &Path) -> Option<Self> {
        if path.extension().and_then(OsStr::to_str) != Some(DATA_EXTENSION) {
            return None;
        }
        let file_stem = path.file_stem()?.to_str()?;
        let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let (stem, state) = if let Some(s) = file_stem.strip_suffix(PROCESSED_SUFFIX) {
            (s, FileState::Processed)
        } else if let Some(s) = file_stem.strip_suffix(PROCESSING_SUFFIX) {
            (s, FileState::Processing)
        } else {
            (file_stem, FileState::Unprocessed)
        };
        if stem.is_empty() {
            return None;
        }
        Some(Self {
            dir,
            stem: stem.to_string(),
            state,
        })
    }

    /// Logical dataset name, without lifecycle suffix or extension.
    pub fn stem(&self) -> &str {
        &self.stem
    }

    pub fn state(&self) -> FileState {
        self.state
    }

    /// Current on-disk path.
    pub fn path(&self) -> PathBuf {
        self.path_in(self.state)
    }

    /// Where this dataset lives when it is in `state`.
    pub fn path_in(&self, state: FileState) -> PathBuf {
        self.dir
            .join(format!("{}{}.{}", self.stem, state.suffix(), DATA_EXTENSION))
    }

    /// Marker that records which run currently owns the dataset. Independent of
    /// the lifecycle state so ownership survives the renames.
    pub fn claim_marker_path(&self) -> PathBuf {
        self.dir.join(format!("{}.{}.lock", self.stem, DATA_EXTENSION))
    }

    /// Same dataset after a successful transition (no filesystem access).
    pub(crate) fn with_state(&self, state: FileState) -> Self {
        Self {
            dir: self.dir.clone(),
            stem: self.stem.clone(),
            state,
        }
    }
}
