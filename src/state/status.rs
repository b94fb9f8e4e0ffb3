use std::{
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use tokio::time::Instant;

use crate::auth::AuthError;

/// Advisory account status line plus the last provider failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub text: String,
    /// Whether automatic updates are currently suppressed.
    pub pinned: bool,
    pub last_error: Option<AuthError>,
}

struct BoardInner {
    text: String,
    pinned_until: Option<Instant>,
    last_error: Option<AuthError>,
}

/// Account status text with a "do not overwrite for N seconds" pin.
pub struct StatusBoard {
    inner: Mutex<BoardInner>,
}

impl StatusBoard {
    /// Unpinned board showing `text`.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            inner: Mutex::new(BoardInner {
                text: text.into(),
                pinned_until: None,
                last_error: None,
            }),
        }
    }

    /// Show `text` and suppress automatic updates for `duration`.
    pub fn pin(&self, text: impl Into<String>, duration: Duration) -> StatusSnapshot {
        let mut inner = self.lock();
        inner.text = text.into();
        inner.pinned_until = Some(Instant::now() + duration);
        snapshot_of(&inner)
    }

    /// Show `text` regardless of any pin, leaving the pin deadline as it is.
    pub fn show(&self, text: impl Into<String>) -> StatusSnapshot {
        let mut inner = self.lock();
        inner.text = text.into();
        snapshot_of(&inner)
    }

    /// Show `text` unless a pin is active. Returns the new snapshot when applied.
    pub fn auto(&self, text: impl Into<String>) -> Option<StatusSnapshot> {
        let mut inner = self.lock();
        if is_pinned(&inner) {
            return None;
        }
        inner.pinned_until = None;
        inner.text = text.into();
        Some(snapshot_of(&inner))
    }

    /// Remember the last provider error for the account panel.
    pub fn record_error(&self, error: AuthError) {
        self.lock().last_error = Some(error);
    }

    pub fn clear_error(&self) {
        self.lock().last_error = None;
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        snapshot_of(&self.lock())
    }

    fn lock(&self) -> MutexGuard<'_, BoardInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn is_pinned(inner: &BoardInner) -> bool {
    inner
        .pinned_until
        .is_some_and(|until| Instant::now() < until)
}

fn snapshot_of(inner: &BoardInner) -> StatusSnapshot {
    StatusSnapshot {
        text: inner.text.clone(),
        pinned: is_pinned(inner),
        last_error: inner.last_error.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn pin_blocks_automatic_updates_until_expiry() {
        let board = StatusBoard::new("Guest mode.");
        board.pin("Account created. Sync is on.", Duration::from_millis(2_500));

        assert!(board.auto("Signed in.").is_none());
        assert_eq!(board.snapshot().text, "Account created. Sync is on.");
        assert!(board.snapshot().pinned);

        tokio::time::advance(Duration::from_millis(2_500)).await;
        let applied = board.auto("Signed in.").unwrap();
        assert_eq!(applied.text, "Signed in.");
        assert!(!applied.pinned);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_text_overrides_but_keeps_the_pin() {
        let board = StatusBoard::new("");
        board.pin("pinned", Duration::from_secs(4));
        assert_eq!(board.show("Enter email and password.").text, "Enter email and password.");
        assert!(board.auto("auto").is_none());
        assert!(board.snapshot().pinned);
    }

    #[tokio::test(start_paused = true)]
    async fn a_newer_pin_replaces_an_older_one() {
        let board = StatusBoard::new("");
        board.pin("first", Duration::from_secs(5));
        board.pin("second", Duration::from_secs(1));
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(board.auto("auto").is_some());
    }
}
