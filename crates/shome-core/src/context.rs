//! Cancellation and deadlines for analytics queries.
//!
//! Reading stores grow without bound, so a sweep over a wide period can be
//! expensive. A [`QueryContext`] lets the caller stop a running query from
//! another thread or give it a deadline; the engine polls it between source
//! fetches and periodically while walking the timeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::analytics::AnalyticsError;

/// Cancellation flag plus optional deadline for one query.
#[derive(Debug, Clone, Default)]
pub struct QueryContext {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

/// Handle that cancels the [`QueryContext`] it was taken from.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl QueryContext {
    /// A context that never cancels and has no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    /// A context whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::background().with_deadline(Instant::now() + timeout)
    }

    #[must_use]
    pub const fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancelled))
    }

    /// Fails if the query was cancelled or its deadline passed.
    pub fn check(&self) -> Result<(), AnalyticsError> {
        if self.cancelled.load(Ordering::Acquire) {
            return Err(AnalyticsError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(AnalyticsError::DeadlineExceeded);
        }
        Ok(())
    }
}
