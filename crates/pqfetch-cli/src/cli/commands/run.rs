//! Run the job: driver on a blocking thread, Ctrl-C and progress on the runtime.

use anyhow::Result;
use pqfetch_core::config::JobConfig;
use pqfetch_core::control::AbortToken;
use pqfetch_core::driver::{JobDriver, RunSummary};
use pqfetch_core::progress::ProgressStats;
use std::future::Future;
use std::time::Instant;

use crate::cli::EXIT_INTERRUPTED;

const PROGRESS_INTERVAL_MS: u64 = 500;

pub async fn run_job(cfg: JobConfig) -> Result<RunSummary> {
    let abort = AbortToken::new();
    let driver = JobDriver::from_config(cfg, abort.clone())?;

    let (progress_tx, mut progress_rx) = tokio::sync::mpsc::channel::<(String, ProgressStats)>(16);
    let progress_handle = tokio::spawn(async move {
        let mut last_print: Option<Instant> = None;
        let mut printed = false;
        while let Some((name, stats)) = progress_rx.recv().await {
            let now = Instant::now();
            let due = last_print
                .map(|t| now.duration_since(t).as_millis() as u64 >= PROGRESS_INTERVAL_MS)
                .unwrap_or(true);
            if due || stats.rows_done >= stats.rows_total {
                let rate_mib = stats.bytes_per_sec() / 1_048_576.0;
                let eta = stats
                    .eta_secs()
                    .map(|s| format!("{:.0}s", s))
                    .unwrap_or_else(|| "?".to_string());
                eprint!(
                    "\r  {}: {} / {} rows ({:.1}%), {} failed  {:.2} MiB/s  ETA {}  ",
                    name,
                    stats.rows_done,
                    stats.rows_total,
                    stats.fraction() * 100.0,
                    stats.rows_failed,
                    rate_mib,
                    eta
                );
                last_print = Some(now);
                printed = true;
            }
        }
        if printed {
            eprintln!();
        }
    });

    let handle = tokio::task::spawn_blocking(move || {
        driver.run(|file, stats| {
            let _ = progress_tx.try_send((file.stem().to_string(), stats.clone()));
        })
    });
    let job = async move { Ok::<_, anyhow::Error>(handle.await??) };

    let summary = match supervise(job, &abort, ctrl_c_pressed).await? {
        Finished::Done(summary) => summary,
        Finished::Forced => {
            eprintln!("\nForced exit.");
            std::process::exit(i32::from(EXIT_INTERRUPTED));
        }
    };

    let _ = progress_handle.await;
    Ok(summary)
}

/// How the job ended.
enum Finished {
    Done(RunSummary),
    /// Interrupted twice; the caller exits without waiting for workers.
    Forced,
}

/// First interrupt sets the abort token and waits for rows in flight; a second
/// one gives up on the job.
async fn supervise<J, I, S>(job: J, abort: &AbortToken, mut interrupt: I) -> Result<Finished>
where
    J: Future<Output = Result<RunSummary>>,
    I: FnMut() -> S,
    S: Future<Output = ()>,
{
    tokio::pin!(job);
    tokio::select! {
        res = &mut job => return Ok(Finished::Done(res?)),
        _ = interrupt() => {
            tracing::warn!("interrupt received; finishing rows in flight");
            eprintln!("\nPress Ctrl+C again to exit immediately.");
            abort.request_abort();
        }
    }
    tokio::select! {
        res = &mut job => Ok(Finished::Done(res?)),
        _ = interrupt() => {
            // Rows committed since the last flush are fetched again next run.
            tracing::warn!("second interrupt; exiting without waiting for workers");
            Ok(Finished::Forced)
        }
    }
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn ctrl_c_pressed() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
