//! End-of-run summary: one line per file, then totals.

use pqfetch_core::driver::{FileOutcome, FileReport, RunSummary};

pub fn print_summary(summary: &RunSummary) {
    if summary.files.is_empty() {
        println!("No files to process.");
    }
    for file in &summary.files {
        println!("{}", file_line(file));
    }
    let skipped = summary.count(|o| matches!(o, FileOutcome::Skipped { .. }));
    let errored = summary.count(|o| matches!(o, FileOutcome::Failed { .. }));
    println!(
        "{} file(s), {} skipped, {} with errors: {} rows downloaded, {} failed, {:.1} MiB in {:.1}s",
        summary.files.len(),
        skipped,
        errored,
        summary.rows_succeeded(),
        summary.rows_failed(),
        summary.bytes_written() as f64 / 1_048_576.0,
        summary.elapsed.as_secs_f64()
    );
    if summary.interrupted {
        println!("Interrupted; rerun to continue with the remaining rows.");
    }
}

fn file_line(file: &FileReport) -> String {
    let state = match &file.outcome {
        FileOutcome::Processed => "processed".to_string(),
        FileOutcome::StillProcessing { pending } => format!("{} pending", pending),
        FileOutcome::Skipped { reason } => format!("skipped ({})", reason),
        FileOutcome::Failed { error } => format!("error ({})", error),
    };
    format!(
        "  {}: {}, {} ok, {} failed",
        file.path.display(),
        state,
        file.succeeded,
        file.failed
    )
}
