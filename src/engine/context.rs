//! Per-call execution context.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use crate::error::ExecutionError;

/// Identity and cancellation state carried by every engine call.
///
/// Clones share the cancellation flag, so the caller can keep one copy
/// and trip it while a worker holds the other.
#[derive(Debug, Clone)]
pub struct OperationContext {
    request_id: Uuid,
    cancelled: Arc<AtomicBool>,
}

impl OperationContext {
    /// Creates a context with a fresh request id.
    #[must_use]
    pub fn new() -> Self {
        Self::with_request_id(Uuid::new_v4())
    }

    /// Creates a context for a caller-supplied request id.
    #[must_use]
    pub fn with_request_id(request_id: Uuid) -> Self {
        Self {
            request_id,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request id used in logs.
    #[must_use]
    pub const fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Requests cancellation. Work already committed stays committed.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns true once [`cancel`](Self::cancel) has been called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Fails with [`ExecutionError::Cancelled`] if cancellation was requested.
    pub fn checkpoint(&self) -> Result<(), ExecutionError> {
        if self.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }
        Ok(())
    }
}

impl Default for OperationContext {
    fn default() -> Self {
        Self::new()
    }
}
