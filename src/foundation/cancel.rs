use crate::foundation::error::{ExportError, ExportResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Shared cancellation flag for one export job.
///
/// Clones observe the same flag. Workers poll it at every frame submission and every audio
/// window, and turn a set flag into [`ExportError::Cancelled`].
///
/// A [`child`](Self::child) token also observes its parent, while cancelling the child leaves
/// the parent untouched.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    parent: Option<Arc<AtomicBool>>,
}

impl CancelToken {
    /// Create a fresh, un-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Token cancelled by `self` or by its own [`cancel`](Self::cancel).
    pub fn child(&self) -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            parent: Some(self.cancelled.clone()),
        }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Return `true` once [`cancel`](Self::cancel) has been called on any clone.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
            || self
                .parent
                .as_ref()
                .is_some_and(|p| p.load(Ordering::Relaxed))
    }

    /// Return `Err(ExportError::Cancelled)` when cancellation was requested.
    pub fn check(&self) -> ExportResult<()> {
        if self.is_cancelled() {
            Err(ExportError::Cancelled)
        } else {
            Ok(())
        }
    }
}
