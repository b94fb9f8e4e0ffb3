use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use validator::Validate;

use crate::{
    auth::{AuthError, OAuthProvider},
    dto::account::{
        AccountStatusResponse, EmailCredentialsRequest, PinStatusRequest, SessionView,
        SignInResponse, StatusView,
    },
    error::AppError,
    services::account_service,
    state::SharedState,
};

/// Routes driving the identity provider.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/account/status", get(account_status))
        .route("/account/status/pin", post(pin_status))
        .route("/account/providers/{provider}/sign-in", post(sign_in_with_provider))
        .route("/account/email/sign-in", post(sign_in_with_email))
        .route("/account/email/sign-up", post(sign_up_with_email))
        .route("/account/sign-out", post(sign_out))
        .route("/account/redirect/complete", post(complete_redirect))
}

#[utoipa::path(
    get,
    path = "/account/status",
    tag = "account",
    responses((status = 200, description = "Identity phase, session and advisory status", body = AccountStatusResponse))
)]
pub async fn account_status(State(state): State<SharedState>) -> Json<AccountStatusResponse> {
    Json(account_service::status(&state).await.into())
}

/// Show a status line and hold it against automatic updates.
#[utoipa::path(
    post,
    path = "/account/status/pin",
    tag = "account",
    request_body = PinStatusRequest,
    responses(
        (status = 200, description = "Status pinned", body = StatusView),
        (status = 400, description = "Invalid pin request")
    )
)]
pub async fn pin_status(
    State(state): State<SharedState>,
    Json(payload): Json<PinStatusRequest>,
) -> Result<Json<StatusView>, AppError> {
    payload.validate()?;
    let snapshot = account_service::pin_status(
        &state,
        &payload.text,
        Duration::from_millis(payload.duration_ms),
    )?;
    Ok(Json(snapshot.into()))
}

/// OAuth sign-in. Anonymous sessions are upgraded in place when the credential is free.
#[utoipa::path(
    post,
    path = "/account/providers/{provider}/sign-in",
    tag = "account",
    params(("provider" = String, Path, description = "Identity provider (`google`)")),
    responses(
        (status = 200, description = "Signed in, or redirect started", body = SignInResponse),
        (status = 409, description = "Already signed in, or credential conflict"),
        (status = 502, description = "Identity provider failure"),
        (status = 503, description = "Sync not configured")
    )
)]
pub async fn sign_in_with_provider(
    State(state): State<SharedState>,
    Path(provider): Path<String>,
) -> Result<Json<SignInResponse>, AppError> {
    let provider: OAuthProvider = provider
        .parse()
        .map_err(|err: AuthError| AppError::BadRequest(err.message))?;
    let outcome = account_service::sign_in_with_provider(&state, provider).await?;
    Ok(Json(outcome.into()))
}

#[utoipa::path(
    post,
    path = "/account/email/sign-in",
    tag = "account",
    request_body = EmailCredentialsRequest,
    responses(
        (status = 200, description = "Signed in", body = SessionView),
        (status = 400, description = "Missing email or password"),
        (status = 401, description = "Wrong email or password"),
        (status = 409, description = "Already signed in")
    )
)]
pub async fn sign_in_with_email(
    State(state): State<SharedState>,
    Json(payload): Json<EmailCredentialsRequest>,
) -> Result<Json<SessionView>, AppError> {
    payload.validate()?;
    let session = account_service::sign_in_with_email(&state, &payload.email, &payload.password).await?;
    Ok(Json(session.into()))
}

/// Add an email login to the current account, or create a new account.
#[utoipa::path(
    post,
    path = "/account/email/sign-up",
    tag = "account",
    request_body = EmailCredentialsRequest,
    responses(
        (status = 200, description = "Account created or email login added", body = SessionView),
        (status = 400, description = "Missing email or password"),
        (status = 409, description = "Email already in use")
    )
)]
pub async fn sign_up_with_email(
    State(state): State<SharedState>,
    Json(payload): Json<EmailCredentialsRequest>,
) -> Result<Json<SessionView>, AppError> {
    payload.validate()?;
    let session = account_service::sign_up_with_email(&state, &payload.email, &payload.password).await?;
    Ok(Json(session.into()))
}

/// Sign out and continue with a fresh anonymous session. Local progress is kept.
#[utoipa::path(
    post,
    path = "/account/sign-out",
    tag = "account",
    responses(
        (status = 200, description = "Signed out", body = SessionView),
        (status = 502, description = "Identity provider failure")
    )
)]
pub async fn sign_out(State(state): State<SharedState>) -> Result<Json<SessionView>, AppError> {
    let session = account_service::sign_out(&state).await?;
    Ok(Json(session.into()))
}

/// Collect the outcome of a redirect-based sign-in.
#[utoipa::path(
    post,
    path = "/account/redirect/complete",
    tag = "account",
    responses(
        (status = 200, description = "Redirect outcome", body = SignInResponse),
        (status = 502, description = "Identity provider failure")
    )
)]
pub async fn complete_redirect(State(state): State<SharedState>) -> Result<Json<SignInResponse>, AppError> {
    let outcome = account_service::complete_redirect(&state).await?;
    Ok(Json(outcome.into()))
}
