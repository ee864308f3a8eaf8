//! Cooperative cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A render task the scheduler polls for cancellation.
pub trait Task {
    fn is_canceled(&self) -> bool;
}

/// Shared cancellation flag.
///
/// Clones share the same flag, so one clone can be handed to the
/// scheduler while another is kept by whoever decides to stop.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    canceled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Already-issued work is not revoked.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Release);
    }
}

impl Task for CancelToken {
    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_flag() {
        let token = CancelToken::new();
        let task = token.clone();
        assert!(!task.is_canceled());

        token.cancel();
        assert!(task.is_canceled());
    }
}
