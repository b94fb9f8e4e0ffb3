//! Identity provider seam.
//!
//! The sync engine never talks to a concrete identity service directly; it drives an
//! [`AuthProvider`] whose operations mirror the classic browser auth flows: anonymous
//! sessions, OAuth popup/redirect (with credential linking) and email/password.
//! Link operations always target the provider's *current* user.

pub mod memory;

use std::{fmt, str::FromStr};

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;
use utoipa::ToSchema;

use crate::dao::models::AccountId;

pub use self::memory::MemoryAuthProvider;

/// Result alias for identity provider calls.
pub type AuthResult<T> = Result<T, AuthError>;

/// User as reported by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub account_id: AccountId,
    pub is_anonymous: bool,
    pub email: Option<String>,
}

impl AuthUser {
    /// Guest user without linked credentials.
    pub fn anonymous(account_id: AccountId) -> Self {
        Self {
            account_id,
            is_anonymous: true,
            email: None,
        }
    }

    /// User holding at least one credential.
    pub fn linked(account_id: AccountId, email: Option<String>) -> Self {
        Self {
            account_id,
            is_anonymous: false,
            email,
        }
    }
}

/// Federated identity providers usable for popup/redirect flows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OAuthProvider {
    Google,
}

impl OAuthProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthProvider::Google => "google",
        }
    }
}

impl fmt::Display for OAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OAuthProvider {
    type Err = AuthError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "google" => Ok(OAuthProvider::Google),
            other => Err(AuthError::new(
                AuthErrorCode::OperationNotAllowed,
                format!("unsupported identity provider `{other}`"),
            )),
        }
    }
}

/// Email and password pair submitted by the user.
#[derive(Clone, PartialEq, Eq)]
pub struct EmailCredential {
    pub email: String,
    pub password: String,
}

impl EmailCredential {
    /// Trim the email; `None` when either part is blank.
    pub fn new(email: &str, password: &str) -> Option<Self> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return None;
        }
        Some(Self {
            email: email.to_owned(),
            password: password.to_owned(),
        })
    }
}

impl fmt::Debug for EmailCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmailCredential")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Provider error codes the engine reacts to; anything else is carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthErrorCode {
    PopupBlocked,
    PopupClosedByUser,
    CancelledPopupRequest,
    CredentialAlreadyInUse,
    EmailAlreadyInUse,
    InvalidCredential,
    OperationNotAllowed,
    NoCurrentUser,
    NetworkRequestFailed,
    Timeout,
    Other(String),
}

impl AuthErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            AuthErrorCode::PopupBlocked => "auth/popup-blocked",
            AuthErrorCode::PopupClosedByUser => "auth/popup-closed-by-user",
            AuthErrorCode::CancelledPopupRequest => "auth/cancelled-popup-request",
            AuthErrorCode::CredentialAlreadyInUse => "auth/credential-already-in-use",
            AuthErrorCode::EmailAlreadyInUse => "auth/email-already-in-use",
            AuthErrorCode::InvalidCredential => "auth/invalid-credential",
            AuthErrorCode::OperationNotAllowed => "auth/operation-not-allowed",
            AuthErrorCode::NoCurrentUser => "auth/no-current-user",
            AuthErrorCode::NetworkRequestFailed => "auth/network-request-failed",
            AuthErrorCode::Timeout => "auth/timeout",
            AuthErrorCode::Other(code) => code,
        }
    }

    /// Popup failures that should be retried through the redirect variant.
    pub fn requires_redirect(&self) -> bool {
        matches!(
            self,
            AuthErrorCode::PopupBlocked
                | AuthErrorCode::PopupClosedByUser
                | AuthErrorCode::CancelledPopupRequest
        )
    }
}

impl From<&str> for AuthErrorCode {
    fn from(code: &str) -> Self {
        match code {
            "auth/popup-blocked" => AuthErrorCode::PopupBlocked,
            "auth/popup-closed-by-user" => AuthErrorCode::PopupClosedByUser,
            "auth/cancelled-popup-request" => AuthErrorCode::CancelledPopupRequest,
            "auth/credential-already-in-use" => AuthErrorCode::CredentialAlreadyInUse,
            "auth/email-already-in-use" => AuthErrorCode::EmailAlreadyInUse,
            "auth/invalid-credential" => AuthErrorCode::InvalidCredential,
            "auth/operation-not-allowed" => AuthErrorCode::OperationNotAllowed,
            "auth/no-current-user" => AuthErrorCode::NoCurrentUser,
            "auth/network-request-failed" => AuthErrorCode::NetworkRequestFailed,
            "auth/timeout" => AuthErrorCode::Timeout,
            other => AuthErrorCode::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for AuthErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by an identity provider call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct AuthError {
    pub code: AuthErrorCode,
    pub message: String,
}

impl AuthError {
    pub fn new(code: AuthErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Human-readable status line: `"<context>: <code> - <message>"`.
    pub fn status_text(&self, context: &str) -> String {
        match (self.code.as_str().is_empty(), self.message.is_empty()) {
            (false, false) => format!("{context}: {} - {}", self.code, self.message),
            (false, true) => format!("{context}: {}", self.code),
            (true, false) => format!("{context}: {}", self.message),
            (true, true) => context.to_owned(),
        }
    }
}

/// Asynchronous identity provider (anonymous sessions, OAuth, email/password).
pub trait AuthProvider: Send + Sync {
    /// User the provider currently considers signed in.
    fn current_user(&self) -> Option<AuthUser>;
    fn sign_in_anonymously(&self) -> BoxFuture<'static, AuthResult<AuthUser>>;
    /// Attach `provider` to the current user, keeping its account id.
    fn link_with_popup(&self, provider: OAuthProvider) -> BoxFuture<'static, AuthResult<AuthUser>>;
    fn sign_in_with_popup(&self, provider: OAuthProvider) -> BoxFuture<'static, AuthResult<AuthUser>>;
    /// Start a link redirect; the outcome is collected by [`AuthProvider::redirect_result`].
    fn link_with_redirect(&self, provider: OAuthProvider) -> BoxFuture<'static, AuthResult<()>>;
    fn sign_in_with_redirect(&self, provider: OAuthProvider) -> BoxFuture<'static, AuthResult<()>>;
    /// Consume the outcome of a completed redirect, if any.
    fn redirect_result(&self) -> BoxFuture<'static, AuthResult<Option<AuthUser>>>;
    fn link_with_email(&self, credential: EmailCredential) -> BoxFuture<'static, AuthResult<AuthUser>>;
    fn create_user_with_email(&self, credential: EmailCredential) -> BoxFuture<'static, AuthResult<AuthUser>>;
    fn sign_in_with_email(&self, credential: EmailCredential) -> BoxFuture<'static, AuthResult<AuthUser>>;
    fn sign_out(&self) -> BoxFuture<'static, AuthResult<()>>;
    /// Signed-in user as the provider sees it, including changes the engine did not make.
    fn watch_user(&self) -> watch::Receiver<Option<AuthUser>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn popup_codes_require_redirect() {
        assert!(AuthErrorCode::from("auth/popup-blocked").requires_redirect());
        assert!(AuthErrorCode::from("auth/popup-closed-by-user").requires_redirect());
        assert!(AuthErrorCode::from("auth/cancelled-popup-request").requires_redirect());
        assert!(!AuthErrorCode::CredentialAlreadyInUse.requires_redirect());
        assert_eq!(
            AuthErrorCode::from("auth/weird"),
            AuthErrorCode::Other("auth/weird".into())
        );
    }

    #[test]
    fn status_text_includes_code_and_message() {
        let err = AuthError::new(AuthErrorCode::InvalidCredential, "wrong password");
        assert_eq!(
            err.status_text("Sign-in failed"),
            "Sign-in failed: auth/invalid-credential - wrong password"
        );
        let bare = AuthError::new(AuthErrorCode::Other(String::new()), "");
        assert_eq!(bare.status_text("Sign-in failed"), "Sign-in failed");
    }

    #[test]
    fn blank_email_credentials_are_rejected() {
        assert!(EmailCredential::new("  ", "pw").is_none());
        assert!(EmailCredential::new("a@b.c", "").is_none());
        assert_eq!(EmailCredential::new(" a@b.c ", "pw").unwrap().email, "a@b.c");
    }

    #[test]
    fn provider_names_parse_case_insensitively() {
        assert_eq!("Google".parse::<OAuthProvider>().unwrap(), OAuthProvider::Google);
        assert!("github".parse::<OAuthProvider>().is_err());
    }
}
