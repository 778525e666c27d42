//! Logging init: stderr plus `<output_dir>/download.log`, or graceful fallback
//! to stderr only.

use anyhow::Result;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Log file written inside the output directory.
pub const LOG_FILE_NAME: &str = "download.log";

/// Writer that is either a file or stderr (used when file clone fails).
enum FileOrStderr {
    File(fs::File),
    Stderr,
}

impl io::Write for FileOrStderr {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            FileOrStderr::File(f) => f.write(buf),
            FileOrStderr::Stderr => io::stderr().lock().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            FileOrStderr::File(f) => f.flush(),
            FileOrStderr::Stderr => io::stderr().lock().flush(),
        }
    }
}

struct FileMakeWriter(fs::File);

impl<'a> MakeWriter<'a> for FileMakeWriter {
    type Writer = FileOrStderr;

    fn make_writer(&'a self) -> Self::Writer {
        self.0
            .try_clone()
            .map(FileOrStderr::File)
            .unwrap_or(FileOrStderr::Stderr)
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Path of the log file for a run writing into `output_dir`.
pub fn log_file_path(output_dir: &Path) -> PathBuf {
    output_dir.join(LOG_FILE_NAME)
}

/// Initialize logging to stderr and to `<output_dir>/download.log` (appended).
/// On failure (e.g. output dir unwritable), returns Err so the caller can fall
/// back to stderr.
pub fn init_logging(output_dir: &Path) -> Result<()> {
    fs::create_dir_all(output_dir)?;
    let path = log_file_path(output_dir);
    let file = fs::OpenOptions::new().create(true).append(true).open(&path)?;

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(io::stderr))
        .with(
            fmt::layer()
                .with_writer(FileMakeWriter(file))
                .with_ansi(false),
        )
        .try_init()?;

    tracing::debug!("logging to {}", path.display());
    Ok(())
}

/// Initialize logging to stderr only (no file). Use when init_logging() fails
/// so the CLI doesn't crash.
pub fn init_logging_stderr() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(io::stderr)
        .try_init();
}
