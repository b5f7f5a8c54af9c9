//! Operator status line.
//!
//! Every handled outcome produces exactly one `StatusMessage`. The board keeps
//! only the most recent one; it is hidden once its TTL has elapsed.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

pub const DEFAULT_STATUS_TTL: Duration = Duration::from_secs(5);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusMessage {
    text: String,
    severity: Severity,
    issued_at: Instant,
    ttl: Duration,
    sequence: u64,
}

impl StatusMessage {
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn issued_at(&self) -> Instant {
        self.issued_at
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Monotonic issue number, distinguishes repeated identical texts.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.issued_at) > self.ttl
    }
}

#[derive(Default)]
struct BoardState {
    current: Option<StatusMessage>,
    issued: u64,
}

/// Latest status message, shared by the session and the acquisition thread.
pub struct StatusBoard {
    ttl: Duration,
    state: Mutex<BoardState>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        Self::new(DEFAULT_STATUS_TTL)
    }
}

impl StatusBoard {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            state: Mutex::new(BoardState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BoardState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the current message and log it.
    pub fn issue_at(&self, severity: Severity, text: impl Into<String>, now: Instant) {
        let text = text.into();
        match severity {
            Severity::Info => log::info!("{}", text),
            Severity::Warning => log::warn!("{}", text),
            Severity::Error => log::error!("{}", text),
        }
        let mut state = self.lock();
        state.issued += 1;
        let sequence = state.issued;
        state.current = Some(StatusMessage {
            text,
            severity,
            issued_at: now,
            ttl: self.ttl,
            sequence,
        });
    }

    pub fn info(&self, text: impl Into<String>) {
        self.issue_at(Severity::Info, text, Instant::now());
    }

    pub fn warn(&self, text: impl Into<String>) {
        self.issue_at(Severity::Warning, text, Instant::now());
    }

    pub fn error(&self, text: impl Into<String>) {
        self.issue_at(Severity::Error, text, Instant::now());
    }

    /// Current message, or `None` if nothing was issued or it expired.
    pub fn current(&self, now: Instant) -> Option<StatusMessage> {
        self.lock()
            .current
            .as_ref()
            .filter(|msg| !msg.is_expired(now))
            .cloned()
    }

    /// Number of messages issued so far.
    pub fn issued(&self) -> u64 {
        self.lock().issued
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_expires_after_ttl() {
        let board = StatusBoard::new(Duration::from_secs(5));
        let t0 = Instant::now();
        board.issue_at(Severity::Info, "Camera started successfully", t0);

        let shown = board.current(t0 + Duration::from_secs(5)).unwrap();
        assert_eq!(shown.text(), "Camera started successfully");
        assert!(board.current(t0 + Duration::from_millis(5001)).is_none());
    }

    #[test]
    fn newer_message_overwrites() {
        let board = StatusBoard::default();
        let t0 = Instant::now();
        board.issue_at(Severity::Info, "first", t0);
        board.issue_at(Severity::Error, "second", t0);

        let shown = board.current(t0).unwrap();
        assert_eq!(shown.text(), "second");
        assert_eq!(shown.severity(), Severity::Error);
        assert_eq!(shown.sequence(), 2);
        assert_eq!(board.issued(), 2);
    }

    #[test]
    fn empty_board_shows_nothing() {
        assert!(StatusBoard::default().current(Instant::now()).is_none());
    }
}
