//! Counted back-reference from wait timers to their handler.
//!
//! Wait timers outlive the handlers they wake. The handler publishes a
//! cancellation token on creation; timers hold this reference and upgrade
//! to a strong handle only under its lock. Invalidation zeroes the target
//! atomically, so a late-firing timer observes the cancellation and exits
//! instead of touching a dead handler.

use std::sync::{Arc, Mutex, Weak};

use tokio_util::sync::CancellationToken;

use super::MsgHandler;

#[derive(Debug, Default)]
struct RefInner {
    token: CancellationToken,
    target: Mutex<Weak<MsgHandler>>,
}

/// Shared, invalidatable reference to a [`MsgHandler`].
#[derive(Clone, Debug, Default)]
pub struct HandlerRef {
    inner: Arc<RefInner>,
}

impl HandlerRef {
    /// Create an unbound reference.
    #[must_use]
    pub(super) fn new() -> Self { Self::default() }

    /// Bind the reference to its handler.
    pub(super) fn bind(&self, handler: Weak<MsgHandler>) {
        *self.lock_target() = handler;
    }

    /// Upgrade to a strong handle, unless the reference was invalidated.
    #[must_use]
    pub fn upgrade(&self) -> Option<Arc<MsgHandler>> {
        if self.inner.token.is_cancelled() {
            return None;
        }
        self.lock_target().upgrade()
    }

    /// Invalidate the reference; pending timers observe the cancellation.
    pub fn invalidate(&self) {
        self.inner.token.cancel();
        *self.lock_target() = Weak::new();
    }

    /// Wait until the reference is invalidated.
    pub async fn cancelled(&self) { self.inner.token.cancelled().await; }

    fn lock_target(&self) -> std::sync::MutexGuard<'_, Weak<MsgHandler>> {
        self.inner
            .target
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}
