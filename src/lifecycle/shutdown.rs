//! Shutdown coordination for the server.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

/// Lifecycle phase of the server. Transitions only move forward.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    Running = 0,
    Draining = 1,
    Stopped = 2,
}

impl From<u8> for ShutdownState {
    fn from(val: u8) -> Self {
        match val {
            0 => ShutdownState::Running,
            1 => ShutdownState::Draining,
            _ => ShutdownState::Stopped,
        }
    }
}

/// Coordinator for graceful shutdown.
///
/// Provides a broadcast channel that all long-running tasks can subscribe to,
/// plus the shared lifecycle state. Clones share the same state.
#[derive(Clone)]
pub struct Shutdown {
    /// Broadcast channel sender.
    tx: broadcast::Sender<()>,
    state: Arc<AtomicU8>,
}

impl Shutdown {
    /// Create a new shutdown coordinator in the `Running` state.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(1);
        Self {
            tx,
            state: Arc::new(AtomicU8::new(ShutdownState::Running as u8)),
        }
    }

    /// Subscribe to the shutdown signal.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.tx.subscribe()
    }

    /// Begin draining. Only the first call has any effect.
    ///
    /// Returns `true` if this call moved the state from `Running` to `Draining`.
    pub fn trigger(&self) -> bool {
        let won = self
            .state
            .compare_exchange(
                ShutdownState::Running as u8,
                ShutdownState::Draining as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if won {
            let _ = self.tx.send(());
        }
        won
    }

    /// Resolve once draining has begun, however long ago that was.
    pub async fn wait(&self) {
        let mut rx = self.subscribe();
        if self.state() != ShutdownState::Running {
            return;
        }
        // A closed channel cannot happen while `self` holds the sender.
        let _ = rx.recv().await;
    }

    /// Current lifecycle phase.
    pub fn state(&self) -> ShutdownState {
        ShutdownState::from(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn mark_stopped(&self) {
        self.state.store(ShutdownState::Stopped as u8, Ordering::Release);
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}
