//! Progress reporting for one file's download run (rows done, bytes, ETA).
//!
//! The engine builds a snapshot after every finished row and hands it to the
//! caller's callback; consumers can compute rate = rows_done / elapsed_secs and
//! ETA = (rows_total - rows_done) / rate.

/// Snapshot of progress through the pending rows of one file (CLI-friendly).
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressStats {
    /// Rows finished this run (success or failed).
    pub rows_done: usize,
    /// Pending rows at the start of the run.
    pub rows_total: usize,
    /// Rows that ended `failed`.
    pub rows_failed: usize,
    /// Bytes written to batch folders so far.
    pub bytes_done: u64,
    /// Elapsed time since the run started (seconds).
    pub elapsed_secs: f64,
}

impl ProgressStats {
    /// Row throughput (0 if elapsed is 0).
    pub fn rows_per_sec(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.rows_done as f64 / self.elapsed_secs
    }

    /// Download rate in bytes per second (0 if elapsed is 0).
    pub fn bytes_per_sec(&self) -> f64 {
        if self.elapsed_secs <= 0.0 {
            return 0.0;
        }
        self.bytes_done as f64 / self.elapsed_secs
    }

    /// Estimated seconds remaining (None if rate is 0 and rows remain).
    pub fn eta_secs(&self) -> Option<f64> {
        let remaining = self.rows_total.saturating_sub(self.rows_done);
        if remaining == 0 {
            return Some(0.0);
        }
        let rate = self.rows_per_sec();
        if rate <= 0.0 {
            return None;
        }
        Some(remaining as f64 / rate)
    }

    /// Fraction complete in [0.0, 1.0].
    pub fn fraction(&self) -> f64 {
        if self.rows_total == 0 {
            return 1.0;
        }
        (self.rows_done as f64 / self.rows_total as f64).min(1.0)
    }
}
