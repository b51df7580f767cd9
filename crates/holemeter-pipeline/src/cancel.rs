//! Cooperative cancellation.
//!
//! Long-running operations (convolution, local-window filters, outlier
//! correction loops) take a [`CancelToken`] and poll it at fine
//! granularity. When the token fires they stop and return
//! [`Cancelled`] instead of a partial image.
//!
//! The token is a cloneable handle around a shared atomic flag, so a UI
//! thread can hold one clone and request cancellation while a worker
//! runs the pipeline with another.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Error returned by an operation that observed a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation was cancelled")]
pub struct Cancelled;

/// Shared cancellation flag.
///
/// A default-constructed token is never cancelled unless
/// [`cancel`](Self::cancel) is called on it or on one of its clones.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a fresh, un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Visible to every clone of this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }

    /// Return `Err(Cancelled)` if cancellation has been requested.
    ///
    /// Intended for use with `?` inside hot loops.
    ///
    /// # Errors
    ///
    /// Returns [`Cancelled`] once [`cancel`](Self::cancel) has been called.
    pub fn check(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            tracing::debug!("cancellation requested, aborting");
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_not_cancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert_eq!(token.check(), Ok(()));
    }

    #[test]
    fn cancel_is_visible_through_clones() {
        let token = CancelToken::new();
        let worker = token.clone();
        token.cancel();
        assert!(worker.is_cancelled());
        assert_eq!(worker.check(), Err(Cancelled));
    }

    #[test]
    fn cancelled_displays_message() {
        assert_eq!(Cancelled.to_string(), "operation was cancelled");
    }
}
