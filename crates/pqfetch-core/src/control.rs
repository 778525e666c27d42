//! Cooperative cancellation: a shared abort token set on Ctrl-C.
//!
//! Workers check the token before pulling the next row; the row in hand is
//! always finished, so no partially written file or half-committed row is left
//! behind.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable handle to one abort flag.
#[derive(Debug, Clone, Default)]
pub struct AbortToken(Arc<AtomicBool>);

impl AbortToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder of the token to stop.
    pub fn request_abort(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_aborted(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}
