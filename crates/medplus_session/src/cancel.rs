use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Marks a consumer as torn down.
///
/// Work that finishes after `cancel()` must drop its result instead of
/// applying it. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}
