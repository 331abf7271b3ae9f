//! One-shot readiness gate.
//!
//! A [`ReadinessGate`] starts out pending and settles exactly once, either to
//! ready (publishing a shared handle value) or to failed. Waiters subscribe to
//! the underlying watch channel, so a waiter that arrives after the gate has
//! settled sees the outcome immediately and a waiter that arrives before it
//! is woken by the transition.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

pub const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadinessState {
    Pending,
    Ready,
    Failed,
}

#[derive(Debug)]
enum Slot<H> {
    Pending,
    Ready(Arc<H>),
    Failed(String),
}

impl<H> Slot<H> {
    fn state(&self) -> ReadinessState {
        match self {
            Slot::Pending => ReadinessState::Pending,
            Slot::Ready(_) => ReadinessState::Ready,
            Slot::Failed(_) => ReadinessState::Failed,
        }
    }

    fn is_terminal(&self) -> bool {
        !matches!(self, Slot::Pending)
    }

    fn handles(&self) -> Option<Arc<H>> {
        match self {
            Slot::Ready(handles) => Some(Arc::clone(handles)),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct ReadinessGate<H> {
    tx: watch::Sender<Slot<H>>,
}

impl<H> Default for ReadinessGate<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H> ReadinessGate<H> {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(Slot::Pending);
        Self { tx }
    }

    pub fn state(&self) -> ReadinessState {
        self.tx.borrow().state()
    }

    /// Handles published by [`signal_ready`](Self::signal_ready), if the gate
    /// settled to ready.
    pub fn handles(&self) -> Option<Arc<H>> {
        self.tx.borrow().handles()
    }

    /// The reason passed to [`signal_failed`](Self::signal_failed), if any.
    pub fn failure(&self) -> Option<String> {
        match &*self.tx.borrow() {
            Slot::Failed(reason) => Some(reason.clone()),
            _ => None,
        }
    }

    /// Settle the gate as ready. Returns `false` without touching the state if
    /// the gate had already settled.
    pub fn signal_ready(&self, handles: H) -> bool {
        self.settle(Slot::Ready(Arc::new(handles)))
    }

    /// Settle the gate as failed. Returns `false` without touching the state
    /// if the gate had already settled.
    pub fn signal_failed(&self, reason: impl Into<String>) -> bool {
        self.settle(Slot::Failed(reason.into()))
    }

    fn settle(&self, next: Slot<H>) -> bool {
        let target = next.state();
        let mut next = Some(next);
        let applied = self.tx.send_if_modified(|slot| {
            if slot.is_terminal() {
                return false;
            }
            if let Some(value) = next.take() {
                *slot = value;
            }
            true
        });
        if applied {
            tracing::debug!(state = ?target, "readiness gate settled");
        } else {
            tracing::warn!(
                requested = ?target,
                current = ?self.state(),
                "readiness gate already settled, ignoring signal"
            );
        }
        applied
    }

    /// Wait until the gate settles or `timeout` elapses. Resolves `true` only
    /// when the gate is ready.
    pub async fn await_ready(&self, timeout: Duration) -> bool {
        self.await_handles(timeout).await.is_some()
    }

    /// Like [`await_ready`](Self::await_ready), returning the published
    /// handles on success.
    pub async fn await_handles(&self, timeout: Duration) -> Option<Arc<H>> {
        {
            let current = self.tx.borrow();
            if current.is_terminal() {
                return current.handles();
            }
        }

        let mut rx = self.tx.subscribe();
        let outcome = tokio::time::timeout(timeout, rx.wait_for(Slot::is_terminal)).await;
        match outcome {
            Ok(Ok(slot)) => slot.handles(),
            // The sender lives as long as the gate, so the channel cannot close
            // while we hold `&self`.
            Ok(Err(_)) => None,
            Err(_) => {
                tracing::warn!(?timeout, "timed out waiting for readiness");
                None
            }
        }
    }
}
