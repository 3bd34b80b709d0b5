//! Cooperative cancellation.
//!
//! A [`CancelToken`] is a cloneable flag the sweep engine polls between
//! atomic steps: an in-flight exposure is always allowed to finish, and
//! cancellation then forces the transition to finalizing so the hardware
//! is released. Setting the flag is idempotent and never blocks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable cancellation flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create an unset token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Observed at the next step boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());

        token.cancel();
        assert!(clone.is_cancelled());
    }
}
