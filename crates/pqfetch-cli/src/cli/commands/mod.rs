//! Command implementations (one per file).

mod run;
mod summary;

pub use run::run_job;
pub use summary::print_summary;
