//! Atomic file writes.
//!
//! Bytes go to a `.part` sibling first and are renamed into place once fully
//! written, so a crash or interrupt never leaves a truncated file under the
//! final name.

use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Temporary file suffix used before atomic rename.
pub const TEMP_SUFFIX: &str = ".part";

/// Path for the temp file: appends `.part` to the final path (e.g. `0001.jpg` → `0001.jpg.part`).
pub fn temp_path(final_path: &Path) -> PathBuf {
    let mut o = final_path.as_os_str().to_owned();
    o.push(TEMP_SUFFIX);
    PathBuf::from(o)
}

/// True for leftovers of an interrupted atomic write.
pub fn is_temp_file(path: &Path) -> bool {
    path.as_os_str()
        .to_str()
        .map(|s| s.ends_with(TEMP_SUFFIX))
        .unwrap_or(false)
}

/// Write `data` to `final_path` via a temp file and rename. Replaces any
/// existing file at `final_path`.
pub fn write_atomic(final_path: &Path, data: &[u8]) -> io::Result<()> {
    let tmp = temp_path(final_path);
    let result = (|| {
        let mut file = File::create(&tmp)?;
        file.write_all(data)?;
        file.flush()?;
        drop(file);
        finalize(&tmp, final_path)
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result
}

/// Atomically rename a finished temp file onto its final path.
/// Fails if `final_path` is on a different filesystem.
pub fn finalize(temp_path: &Path, final_path: &Path) -> io::Result<()> {
    std::fs::rename(temp_path, final_path)
}
