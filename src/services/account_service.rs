//! Account actions: readiness, OAuth and email sign-in, sign-up and sign-out.
//!
//! Every action runs behind the identity gate, so a sign-out issued while a slow sign-in
//! is in flight waits for it. Provider calls are bounded by the configured provider
//! timeout and every committed session change is followed by a reconciliation pass.

use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::{
    auth::{AuthError, AuthErrorCode, AuthProvider, AuthResult, AuthUser, EmailCredential, OAuthProvider},
    error::ServiceError,
    services::{account_status, reconciler},
    state::{
        Session, SharedState, StatusSnapshot,
        identity_machine::{IdentityEvent, IdentityPhase},
        transitions::{commit_identity, run_transition_with_broadcast},
    },
};

/// How an interactive sign-in ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInOutcome {
    /// A session was committed.
    Completed(Session),
    /// The provider navigated away; the outcome is collected by the redirect-complete action.
    RedirectStarted,
    /// No redirect outcome was waiting.
    NothingPending,
}

/// Everything the account panel needs in one read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountStatus {
    pub configured: bool,
    pub phase: &'static str,
    pub session: Session,
    pub status: StatusSnapshot,
    pub degraded: bool,
}

fn provider(state: &SharedState) -> Result<Arc<dyn AuthProvider>, ServiceError> {
    state.auth().ok_or(ServiceError::NotConfigured)
}

async fn call<T>(state: &SharedState, work: BoxFuture<'static, AuthResult<T>>) -> AuthResult<T> {
    match timeout(state.config().provider_timeout, work).await {
        Ok(result) => result,
        Err(_) => Err(AuthError::new(
            AuthErrorCode::Timeout,
            "the identity provider did not answer in time",
        )),
    }
}

/// Map a provider-reported user onto the identity edge it represents.
async fn event_for_user(state: &SharedState, user: AuthUser) -> IdentityEvent {
    if user.is_anonymous {
        return IdentityEvent::AnonymousSignedIn(user);
    }
    let phase = state.identity_phase().await;
    if phase.account_id() == Some(&user.account_id) {
        IdentityEvent::CredentialLinked(user)
    } else {
        IdentityEvent::SignedIn(user)
    }
}

async fn adopt(state: &SharedState, user: AuthUser) -> Session {
    let event = event_for_user(state, user).await;
    commit_identity(state, event).await;
    state.session().current()
}

/// First readiness check; later calls return immediately.
///
/// Consumes a pending redirect outcome, adopts an existing provider session or creates an
/// anonymous one, then reconciles. Provider failures leave the engine local-only.
pub async fn ensure_ready(state: &SharedState) -> Result<Session, ServiceError> {
    let auth = provider(state)?;
    state
        .ready()
        .get_or_init(|| initialise(state, auth))
        .await;
    Ok(state.session().current())
}

async fn initialise(state: &SharedState, auth: Arc<dyn AuthProvider>) {
    let _gate = state.identity_gate().lock().await;

    match call(state, auth.redirect_result()).await {
        Ok(Some(user)) => {
            info!(account_id = %user.account_id, "redirect sign-in completed");
            adopt(state, user).await;
        }
        Ok(None) => {}
        Err(err) => {
            warn!(error = %err, "redirect sign-in failed");
            account_status::report_failure(state, "Sign-in failed", &err, None);
        }
    }

    if state.session().account_id().is_none() {
        match auth.current_user() {
            Some(user) => {
                commit_identity(state, IdentityEvent::SessionObserved(Some(user))).await;
            }
            None => match call(state, auth.sign_in_anonymously()).await {
                Ok(user) => {
                    commit_identity(state, IdentityEvent::AnonymousSignedIn(user)).await;
                }
                Err(err) => {
                    warn!(error = %err, "anonymous session unavailable; continuing local-only");
                }
            },
        }
    }

    reconciler::reconcile(state).await;
}

/// Follow the provider's user and commit changes the engine did not make itself, such as
/// a sign-out in another tab or an expired session. Each such change is reconciled.
///
/// Runs until the provider drops its user channel.
pub async fn follow_provider(state: SharedState) {
    let Some(auth) = state.auth() else {
        return;
    };
    let mut users = auth.watch_user();
    if let Err(err) = ensure_ready(&state).await {
        debug!(error = %err, "not following identity provider");
        return;
    }

    loop {
        {
            // Actions commit under the gate, so anything still different afterwards came
            // from outside.
            let _gate = state.identity_gate().lock().await;
            let user = users.borrow_and_update().clone();
            if !session_matches(&state.session().current(), user.as_ref()) {
                info!(
                    account_id = ?user.as_ref().map(|user| &user.account_id),
                    "identity provider changed the session"
                );
                commit_identity(&state, IdentityEvent::SessionObserved(user)).await;
                reconciler::reconcile(&state).await;
            }
        }
        if users.changed().await.is_err() {
            break;
        }
    }
}

fn session_matches(session: &Session, user: Option<&AuthUser>) -> bool {
    match user {
        None => session.account_id.is_none(),
        Some(user) => {
            session.account_id.as_ref() == Some(&user.account_id)
                && session.is_anonymous == user.is_anonymous
        }
    }
}

/// OAuth sign-in, linking onto the anonymous account when there is one.
pub async fn sign_in_with_provider(
    state: &SharedState,
    oauth: OAuthProvider,
) -> Result<SignInOutcome, ServiceError> {
    let auth = provider(state)?;
    ensure_ready(state).await?;
    let _gate = state.identity_gate().lock().await;

    let attempt = match state.identity_phase().await {
        IdentityPhase::Linked { .. } => {
            account_status::pin(state, account_status::ALREADY_SIGNED_IN, account_status::REFUSAL_PIN);
            return Err(ServiceError::InvalidState(account_status::ALREADY_SIGNED_IN.into()));
        }
        IdentityPhase::Anonymous { .. } => link_or_sign_in(state, auth.as_ref(), oauth).await,
        IdentityPhase::Unauthenticated => sign_in_popup_or_redirect(state, auth.as_ref(), oauth).await,
    };

    match attempt {
        Ok(Some(user)) => {
            account_status::clear_failure(state);
            let session = adopt(state, user).await;
            reconciler::reconcile(state).await;
            Ok(SignInOutcome::Completed(session))
        }
        Ok(None) => {
            info!(provider = %oauth, "sign-in continues through redirect");
            Ok(SignInOutcome::RedirectStarted)
        }
        Err(err) => {
            account_status::report_failure(state, provider_failure_context(oauth), &err, None);
            Err(err.into())
        }
    }
}

fn provider_failure_context(oauth: OAuthProvider) -> &'static str {
    match oauth {
        OAuthProvider::Google => "Google sign-in failed",
    }
}

async fn link_or_sign_in(
    state: &SharedState,
    auth: &dyn AuthProvider,
    oauth: OAuthProvider,
) -> AuthResult<Option<AuthUser>> {
    match call(state, auth.link_with_popup(oauth)).await {
        Ok(user) => Ok(Some(user)),
        Err(err) if err.code == AuthErrorCode::CredentialAlreadyInUse => {
            info!(provider = %oauth, "credential belongs to another account; signing into it");
            sign_in_popup_or_redirect(state, auth, oauth).await
        }
        Err(err) if err.code.requires_redirect() => {
            debug!(provider = %oauth, code = %err.code, "link popup unavailable; using redirect");
            call(state, auth.link_with_redirect(oauth)).await?;
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

async fn sign_in_popup_or_redirect(
    state: &SharedState,
    auth: &dyn AuthProvider,
    oauth: OAuthProvider,
) -> AuthResult<Option<AuthUser>> {
    match call(state, auth.sign_in_with_popup(oauth)).await {
        Ok(user) => Ok(Some(user)),
        Err(err) if err.code.requires_redirect() => {
            debug!(provider = %oauth, code = %err.code, "sign-in popup unavailable; using redirect");
            call(state, auth.sign_in_with_redirect(oauth)).await?;
            Ok(None)
        }
        Err(err) => Err(err),
    }
}

fn credential(state: &SharedState, email: &str, password: &str) -> Result<EmailCredential, ServiceError> {
    EmailCredential::new(email, password).ok_or_else(|| {
        account_status::show(state, account_status::ENTER_CREDENTIALS);
        ServiceError::InvalidInput("email and password are required".into())
    })
}

/// Email sign-up: adds an email login to the current session, or creates a new account.
pub async fn sign_up_with_email(
    state: &SharedState,
    email: &str,
    password: &str,
) -> Result<Session, ServiceError> {
    let auth = provider(state)?;
    ensure_ready(state).await?;
    let credential = credential(state, email, password)?;
    let _gate = state.identity_gate().lock().await;

    let attempt = if state.session().account_id().is_some() {
        call(state, auth.link_with_email(credential))
            .await
            .map(|user| (user, account_status::EMAIL_LINKED))
    } else {
        call(state, auth.create_user_with_email(credential))
            .await
            .map(|user| (user, account_status::ACCOUNT_CREATED))
    };

    match attempt {
        Ok((user, text)) => {
            account_status::clear_failure(state);
            let session = adopt(state, user).await;
            account_status::pin(state, text, account_status::SUCCESS_PIN);
            reconciler::reconcile(state).await;
            Ok(session)
        }
        Err(err) => {
            account_status::report_failure(
                state,
                "Email sign-up failed",
                &err,
                Some(account_status::EMAIL_FAILURE_PIN),
            );
            Err(err.into())
        }
    }
}

/// Email sign-in. An anonymous session first tries to take the credential over; any
/// failure there falls back to signing into the email account.
pub async fn sign_in_with_email(
    state: &SharedState,
    email: &str,
    password: &str,
) -> Result<Session, ServiceError> {
    let auth = provider(state)?;
    ensure_ready(state).await?;
    let credential = credential(state, email, password)?;
    let _gate = state.identity_gate().lock().await;

    let attempt = match state.identity_phase().await {
        IdentityPhase::Linked { .. } => {
            account_status::pin(state, account_status::ALREADY_SIGNED_IN, account_status::REFUSAL_PIN);
            return Err(ServiceError::InvalidState(account_status::ALREADY_SIGNED_IN.into()));
        }
        IdentityPhase::Anonymous { .. } => {
            match call(state, auth.link_with_email(credential.clone())).await {
                Ok(user) => Ok(user),
                Err(err) => {
                    debug!(code = %err.code, "email link failed; signing into the email account");
                    call(state, auth.sign_in_with_email(credential)).await
                }
            }
        }
        IdentityPhase::Unauthenticated => call(state, auth.sign_in_with_email(credential)).await,
    };

    match attempt {
        Ok(user) => {
            account_status::clear_failure(state);
            let session = adopt(state, user).await;
            account_status::pin(state, account_status::SIGNED_IN, account_status::SUCCESS_PIN);
            reconciler::reconcile(state).await;
            Ok(session)
        }
        Err(err) => {
            account_status::report_failure(
                state,
                "Email sign-in failed",
                &err,
                Some(account_status::EMAIL_FAILURE_PIN),
            );
            Err(err.into())
        }
    }
}

/// Sign out, then fall back to a fresh anonymous session. Local progress stays put.
pub async fn sign_out(state: &SharedState) -> Result<Session, ServiceError> {
    let auth = provider(state)?;
    ensure_ready(state).await?;
    let _gate = state.identity_gate().lock().await;

    let signed_out = run_transition_with_broadcast(state, IdentityEvent::SignedOut, || {
        let work = auth.sign_out();
        async move { work.await.map_err(ServiceError::from) }
    })
    .await;

    if let Err(err) = signed_out {
        warn!(error = %err, "sign-out failed");
        if let ServiceError::Auth(auth_err) = &err {
            state.status().record_error(auth_err.clone());
        }
        account_status::show(state, account_status::SIGN_OUT_FAILED);
        return Err(err);
    }

    match call(state, auth.sign_in_anonymously()).await {
        Ok(user) => {
            commit_identity(state, IdentityEvent::AnonymousSignedIn(user)).await;
        }
        Err(err) => debug!(error = %err, "anonymous session after sign-out unavailable"),
    }
    account_status::clear_failure(state);
    account_status::show(state, account_status::SIGNED_OUT);
    reconciler::reconcile(state).await;
    Ok(state.session().current())
}

/// Collect the outcome of a redirect started by an earlier sign-in.
pub async fn complete_redirect(state: &SharedState) -> Result<SignInOutcome, ServiceError> {
    let auth = provider(state)?;
    let _gate = state.identity_gate().lock().await;

    match call(state, auth.redirect_result()).await {
        Ok(Some(user)) => {
            account_status::clear_failure(state);
            let session = adopt(state, user).await;
            reconciler::reconcile(state).await;
            Ok(SignInOutcome::Completed(session))
        }
        Ok(None) => Ok(SignInOutcome::NothingPending),
        Err(err) => {
            account_status::report_failure(state, "Sign-in failed", &err, None);
            Err(err.into())
        }
    }
}

/// Pin a caller-supplied status line.
pub fn pin_status(state: &SharedState, text: &str, duration: Duration) -> Result<StatusSnapshot, ServiceError> {
    let text = text.trim();
    if text.is_empty() {
        return Err(ServiceError::InvalidInput("status text must not be blank".into()));
    }
    Ok(account_status::pin(state, text, duration))
}

/// Snapshot the account panel state.
pub async fn status(state: &SharedState) -> AccountStatus {
    AccountStatus {
        configured: state.auth().is_some(),
        phase: state.identity_phase().await.label(),
        session: state.session().current(),
        status: state.status().snapshot(),
        degraded: state.is_degraded(),
    }
}
