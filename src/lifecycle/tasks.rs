//! Tracking for detached background work.
//!
//! Handlers launch fire-and-forget work (notifications, audit writes) through
//! [`TaskTracker::launch`]. Shutdown calls [`TaskTracker::wait`] after the
//! listener has drained, so launched work finishes before the process exits.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::Notify;

use crate::observability::metrics;

#[derive(Default)]
struct TrackerInner {
    outstanding: AtomicUsize,
    idle: Notify,
    closed: AtomicBool,
}

/// Counts outstanding background tasks. Clones share the same counter.
#[derive(Clone, Default)]
pub struct TaskTracker {
    inner: Arc<TrackerInner>,
}

/// Decrements the outstanding count exactly once, on whichever path the task exits.
struct CompletionGuard {
    inner: Arc<TrackerInner>,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if self.inner.outstanding.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

impl TaskTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` on the runtime without blocking the caller.
    ///
    /// A panic inside `task` is caught and logged; it never reaches the caller
    /// or the process.
    pub fn launch<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.inner.closed.load(Ordering::Acquire) {
            tracing::warn!("Background task launched after shutdown drain completed");
        }

        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);
        let guard = CompletionGuard {
            inner: self.inner.clone(),
        };

        tokio::spawn(async move {
            let _guard = guard;
            if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
                metrics::record_background_panic();
                tracing::error!(panic = %panic_message(&panic), "Background task panicked");
            }
        });
    }

    /// Block until every launched task has finished.
    pub async fn wait(&self) {
        loop {
            let idle = self.inner.idle.notified();
            tokio::pin!(idle);
            idle.as_mut().enable();

            if self.inner.outstanding.load(Ordering::Acquire) == 0 {
                self.inner.closed.store(true, Ordering::Release);
                return;
            }
            idle.await;
        }
    }

    /// Number of tasks launched and not yet finished.
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }
}

pub(crate) fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
