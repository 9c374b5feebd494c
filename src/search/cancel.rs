//! Cancellation handle for in-flight searches
//!
//! The search loop is synchronous and CPU-bound, so cancellation is a shared
//! flag checked once per annealing round rather than an async signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag for one task's search.
///
/// Cloning produces another handle to the same flag; the tracker keeps one
/// clone per outstanding worker so searches can be stopped from outside.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, uncancelled token
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; idempotent
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}
