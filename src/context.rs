use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use chrono::{DateTime, Utc};

use crate::readiness::{ReadinessGate, ReadinessState};
use crate::services::ServiceHandles;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// A user-facing message that stays visible until dismissed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub id: u64,
    pub level: NoticeLevel,
    pub message: String,
    pub posted_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct NoticeBoard {
    next_id: AtomicU64,
    notices: Mutex<Vec<Notice>>,
}

impl NoticeBoard {
    pub fn post(&self, level: NoticeLevel, message: impl Into<String>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let notice = Notice {
            id,
            level,
            message: message.into(),
            posted_at: Utc::now(),
        };
        self.lock().push(notice);
        id
    }

    /// Returns `false` when no active notice has this id.
    pub fn dismiss(&self, id: u64) -> bool {
        let mut guard = self.lock();
        let before = guard.len();
        guard.retain(|notice| notice.id != id);
        guard.len() != before
    }

    pub fn active(&self) -> Vec<Notice> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Notice>> {
        self.notices
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

/// Process-lifetime state shared by the initializer and every guarded
/// operation. Construct once and pass around behind an `Arc`.
#[derive(Debug, Default)]
pub struct AppContext {
    gate: ReadinessGate<ServiceHandles>,
    notices: NoticeBoard,
    init_claimed: AtomicBool,
}

impl AppContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the single initialization attempt. Only the first caller gets
    /// `true`.
    pub(crate) fn claim_initialization(&self) -> bool {
        !self.init_claimed.swap(true, Ordering::AcqRel)
    }

    pub fn gate(&self) -> &ReadinessGate<ServiceHandles> {
        &self.gate
    }

    pub fn notices(&self) -> &NoticeBoard {
        &self.notices
    }

    pub fn is_ready(&self) -> bool {
        self.gate.state() == ReadinessState::Ready
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notices_can_be_dismissed_once() {
        let board = NoticeBoard::default();
        let first = board.post(NoticeLevel::Error, "Unable to connect to the database.");
        let second = board.post(NoticeLevel::Info, "Signed in");
        assert_ne!(first, second);
        assert_eq!(board.active().len(), 2);

        assert!(board.dismiss(first));
        assert!(!board.dismiss(first));
        let remaining = board.active();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].message, "Signed in");
    }

    #[test]
    fn fresh_context_is_pending() {
        let ctx = AppContext::new();
        assert!(!ctx.is_ready());
        assert_eq!(ctx.gate().state(), ReadinessState::Pending);
        assert!(ctx.notices().active().is_empty());
    }
}
