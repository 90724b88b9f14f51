//! Cooperative render cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared abort flag carried by a render request.
///
/// Aborting is advisory: long-running work polls [`is_aborted`](Self::is_aborted)
/// between chunks and returns early. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
}

impl AbortSignal {
    /// Creates a signal that is not aborted.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn abort(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Returns `true` once [`abort`](Self::abort) was called on any clone.
    #[inline]
    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Checks an optional signal.
#[inline]
pub fn is_aborted(signal: Option<&AbortSignal>) -> bool {
    signal.is_some_and(AbortSignal::is_aborted)
}
