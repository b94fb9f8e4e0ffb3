use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    auth::AuthError,
    dao::models::AccountId,
    services::account_service::{AccountStatus, SignInOutcome},
    state::{Session, StatusSnapshot},
};

/// Committed identity. `account_id` is absent while there is no session at all.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SessionView {
    pub account_id: Option<AccountId>,
    pub is_anonymous: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl From<Session> for SessionView {
    fn from(session: Session) -> Self {
        Self {
            account_id: session.account_id,
            is_anonymous: session.is_anonymous,
            email: session.email,
        }
    }
}

/// Last provider error, as shown to the player.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct AuthErrorView {
    pub code: String,
    pub message: String,
}

impl From<AuthError> for AuthErrorView {
    fn from(error: AuthError) -> Self {
        Self {
            code: error.code.as_str().to_owned(),
            message: error.message,
        }
    }
}

/// Advisory status line as shown next to the sign-in controls.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct StatusView {
    pub text: String,
    pub pinned: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<AuthErrorView>,
}

impl From<StatusSnapshot> for StatusView {
    fn from(snapshot: StatusSnapshot) -> Self {
        Self {
            text: snapshot.text,
            pinned: snapshot.pinned,
            last_error: snapshot.last_error.map(AuthErrorView::from),
        }
    }
}

/// Payload of `GET /account`.
#[derive(Debug, Serialize, ToSchema)]
pub struct AccountStatusResponse {
    /// Whether an identity provider is wired.
    pub configured: bool,
    /// `unauthenticated`, `anonymous` or `linked`.
    pub phase: String,
    pub session: SessionView,
    pub status: StatusView,
    /// Whether the remote mirror is currently unreachable.
    pub degraded: bool,
}

impl From<AccountStatus> for AccountStatusResponse {
    fn from(status: AccountStatus) -> Self {
        Self {
            configured: status.configured,
            phase: status.phase.to_owned(),
            session: status.session.into(),
            status: status.status.into(),
            degraded: status.degraded,
        }
    }
}

/// Email/password pair. Blank values are answered with an advisory status, so only
/// lengths are checked here.
#[derive(Deserialize, ToSchema, Validate)]
pub struct EmailCredentialsRequest {
    #[validate(length(max = 320))]
    #[serde(default)]
    pub email: String,
    #[validate(length(max = 4096))]
    #[serde(default)]
    pub password: String,
}

impl std::fmt::Debug for EmailCredentialsRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailCredentialsRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Caller-supplied status line and how long it stays.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct PinStatusRequest {
    #[validate(length(min = 1, max = 200))]
    pub text: String,
    /// How long automatic updates stay suppressed.
    #[validate(range(min = 1, max = 60_000))]
    pub duration_ms: u64,
}

/// How a sign-in request ended.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SignInState {
    /// Session committed.
    Completed,
    /// The browser is being sent to the provider.
    RedirectStarted,
    /// No redirect result was waiting.
    NothingPending,
}

/// Payload of the sign-in endpoints.
#[derive(Debug, Serialize, ToSchema)]
pub struct SignInResponse {
    pub outcome: SignInState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionView>,
}

impl From<SignInOutcome> for SignInResponse {
    fn from(outcome: SignInOutcome) -> Self {
        match outcome {
            SignInOutcome::Completed(session) => Self {
                outcome: SignInState::Completed,
                session: Some(session.into()),
            },
            SignInOutcome::RedirectStarted => Self {
                outcome: SignInState::RedirectStarted,
                session: None,
            },
            SignInOutcome::NothingPending => Self {
                outcome: SignInState::NothingPending,
                session: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn redirect_outcomes_carry_no_session() {
        let value = serde_json::to_value(SignInResponse::from(SignInOutcome::RedirectStarted)).unwrap();
        assert_eq!(value, json!({ "outcome": "redirect_started" }));
    }

    #[test]
    fn pins_are_bounded() {
        let too_long = PinStatusRequest {
            text: "hello".into(),
            duration_ms: 120_000,
        };
        assert!(too_long.validate().is_err());

        let blank = PinStatusRequest {
            text: String::new(),
            duration_ms: 1_000,
        };
        assert!(blank.validate().is_err());
    }

    #[test]
    fn credential_debug_hides_the_password() {
        let request = EmailCredentialsRequest {
            email: "ada@example.com".into(),
            password: "hunter2".into(),
        };
        assert!(!format!("{request:?}").contains("hunter2"));
    }
}
