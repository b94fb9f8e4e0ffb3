//! Advisory account status line shown next to the sign-in controls.

use std::time::Duration;

use tracing::debug;

use crate::{
    auth::AuthError,
    state::{Session, SharedState, StatusSnapshot, SyncEvent},
};

/// Shown when no identity provider is wired.
pub const NOT_CONFIGURED: &str = "Sync not configured yet. Progress saved on this device.";
/// Signed out, sync available.
pub const GUEST: &str = "Guest mode. Progress saved on this device.";
/// Anonymous session.
pub const GUEST_ANONYMOUS: &str =
    "Guest mode. Progress saved on this device. Sign in to sync across devices.";
/// Email form submitted with blank fields.
pub const ENTER_CREDENTIALS: &str = "Enter email and password.";
/// Sign-in refused while a linked session is active.
pub const ALREADY_SIGNED_IN: &str = "You are already signed in. Use Sign out to switch accounts.";
/// Email credential attached to the current account.
pub const EMAIL_LINKED: &str = "Email login added to your account.";
/// New email account created.
pub const ACCOUNT_CREATED: &str = "Account created. Sync is on.";
/// Linked session committed.
pub const SIGNED_IN: &str = "Signed in. Sync is on.";
/// Sign-out completed.
pub const SIGNED_OUT: &str = "Signed out. Progress saved on this device.";
/// Provider refused the sign-out.
pub const SIGN_OUT_FAILED: &str = "Sign out failed.";

/// How long a success message stays pinned.
pub const SUCCESS_PIN: Duration = Duration::from_millis(2_500);
/// How long a refusal stays pinned.
pub const REFUSAL_PIN: Duration = Duration::from_secs(4);
/// How long an email failure stays pinned.
pub const EMAIL_FAILURE_PIN: Duration = Duration::from_secs(5);

/// Text shown before any session has been observed.
pub fn initial_text(configured: bool) -> &'static str {
    if configured { GUEST } else { NOT_CONFIGURED }
}

/// Automatic status text for a committed session.
pub fn session_text(session: &Session) -> String {
    if session.account_id.is_none() {
        return GUEST.to_owned();
    }
    if session.is_anonymous {
        return GUEST_ANONYMOUS.to_owned();
    }
    match &session.email {
        Some(email) => format!("Signed in as {email}. Progress will sync across devices."),
        None => "Signed in. Progress will sync across devices.".to_owned(),
    }
}

/// Re-derive the automatic text from the committed session, unless a pin is active.
pub fn refresh(state: &SharedState) {
    if state.auth().is_none() {
        return;
    }
    let text = session_text(&state.session().current());
    match state.status().auto(text) {
        Some(snapshot) => publish(state, snapshot),
        None => debug!("account status pinned; automatic update skipped"),
    }
}

/// Show `text` immediately, without touching any active pin.
pub fn show(state: &SharedState, text: impl Into<String>) -> StatusSnapshot {
    let snapshot = state.status().show(text);
    publish(state, snapshot.clone());
    snapshot
}

/// Show `text` and hold it against automatic updates for `duration`.
pub fn pin(state: &SharedState, text: impl Into<String>, duration: Duration) -> StatusSnapshot {
    let snapshot = state.status().pin(text, duration);
    publish(state, snapshot.clone());
    snapshot
}

/// Record a provider failure and surface it as `"<context>: <code> - <message>"`.
pub fn report_failure(state: &SharedState, context: &str, error: &AuthError, hold: Option<Duration>) {
    state.status().record_error(error.clone());
    let text = error.status_text(context);
    match hold {
        Some(duration) => pin(state, text, duration),
        None => show(state, text),
    };
}

/// Forget the last provider error.
pub fn clear_failure(state: &SharedState) {
    state.status().clear_error();
}

fn publish(state: &SharedState, snapshot: StatusSnapshot) {
    state.events().publish(SyncEvent::AccountStatus(snapshot));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::AccountId;

    #[test]
    fn session_text_tracks_identity() {
        assert_eq!(session_text(&Session::default()), GUEST);

        let anonymous = Session {
            account_id: Some(AccountId::new("a")),
            is_anonymous: true,
            email: None,
        };
        assert_eq!(session_text(&anonymous), GUEST_ANONYMOUS);

        let linked = Session {
            account_id: Some(AccountId::new("a")),
            is_anonymous: false,
            email: Some("ada@example.com".into()),
        };
        assert_eq!(
            session_text(&linked),
            "Signed in as ada@example.com. Progress will sync across devices."
        );

        let no_email = Session { email: None, ..linked };
        assert_eq!(session_text(&no_email), "Signed in. Progress will sync across devices.");
    }

    #[test]
    fn unconfigured_engines_say_so() {
        assert_eq!(initial_text(false), NOT_CONFIGURED);
        assert_eq!(initial_text(true), GUEST);
    }
}
