use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{
    auth::{AuthError, AuthErrorCode},
    state::{AbortError, ApplyError, PlanError},
};

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No identity provider is configured.
    #[error("sync not configured")]
    NotConfigured,
    /// Identity provider rejected the call.
    #[error("identity provider error: {0}")]
    Auth(#[source] AuthError),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("operation timed out")]
    Timeout,
}

impl From<AuthError> for ServiceError {
    fn from(err: AuthError) -> Self {
        ServiceError::Auth(err)
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("unauthorized: {message}")]
    Unauthorized { code: String, message: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {message}")]
    Conflict { code: Option<String>, message: String },
    #[error("bad gateway: {message}")]
    BadGateway { code: String, message: String },
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("gateway timeout")]
    Timeout,
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotConfigured => AppError::ServiceUnavailable("sync not configured".into()),
            ServiceError::Auth(auth) => auth.into(),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::Conflict {
                code: None,
                message,
            },
            ServiceError::Timeout => AppError::Timeout,
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        let code = err.code.as_str().to_owned();
        let message = err.message;
        match err.code {
            AuthErrorCode::InvalidCredential => AppError::Unauthorized { code, message },
            AuthErrorCode::CredentialAlreadyInUse | AuthErrorCode::EmailAlreadyInUse => {
                AppError::Conflict {
                    code: Some(code),
                    message,
                }
            }
            AuthErrorCode::Timeout => AppError::Timeout,
            _ => AppError::BadGateway { code, message },
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, code) = match &self {
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, None),
            AppError::Unauthorized { code, .. } => (StatusCode::UNAUTHORIZED, Some(code.clone())),
            AppError::NotFound(_) => (StatusCode::NOT_FOUND, None),
            AppError::Conflict { code, .. } => (StatusCode::CONFLICT, code.clone()),
            AppError::BadGateway { code, .. } => (StatusCode::BAD_GATEWAY, Some(code.clone())),
            AppError::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, None),
            AppError::Timeout => (StatusCode::GATEWAY_TIMEOUT, None),
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
            code,
        });

        (status, payload).into_response()
    }
}

impl From<PlanError> for ServiceError {
    fn from(err: PlanError) -> Self {
        match err {
            PlanError::AlreadyPending => {
                ServiceError::InvalidState("identity transition already pending".into())
            }
            PlanError::InvalidTransition(invalid) => ServiceError::InvalidState(invalid.to_string()),
        }
    }
}

impl From<ApplyError> for ServiceError {
    fn from(err: ApplyError) -> Self {
        match err {
            ApplyError::NoPending => ServiceError::InvalidState("no transition is pending".into()),
            ApplyError::IdMismatch { .. } => {
                ServiceError::InvalidState("pending transition does not match".into())
            }
            ApplyError::PhaseMismatch { expected, actual } => ServiceError::InvalidState(format!(
                "identity changed during transition (expected {expected:?}, got {actual:?})"
            )),
            ApplyError::VersionMismatch { expected, actual } => {
                ServiceError::InvalidState(format!(
                    "identity version mismatch during transition (expected {expected}, got {actual})"
                ))
            }
        }
    }
}

impl From<AbortError> for ServiceError {
    fn from(err: AbortError) -> Self {
        match err {
            AbortError::NoPending => ServiceError::InvalidState("no pending transition".into()),
            AbortError::IdMismatch { .. } => {
                ServiceError::InvalidState("transition plan does not match".into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_codes_map_to_http_statuses() {
        let conflict: AppError =
            AuthError::new(AuthErrorCode::CredentialAlreadyInUse, "taken").into();
        assert_eq!(conflict.into_response().status(), StatusCode::CONFLICT);

        let denied: AppError = AuthError::new(AuthErrorCode::InvalidCredential, "nope").into();
        assert_eq!(denied.into_response().status(), StatusCode::UNAUTHORIZED);

        let other: AppError = AuthError::new(AuthErrorCode::NetworkRequestFailed, "down").into();
        assert_eq!(other.into_response().status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn not_configured_is_service_unavailable() {
        let err: AppError = ServiceError::NotConfigured.into();
        assert_eq!(err.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
