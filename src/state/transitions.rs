use std::future::Future;

use tracing::{info, warn};

use crate::{
    auth::AuthUser,
    error::ServiceError,
    services::account_status,
    state::{
        SharedState, SyncEvent,
        identity_machine::{IdentityEvent, IdentityPhase},
        session::Session,
    },
};

/// Commit a provider-decided identity event, resynchronising when it is off the normal edges.
pub async fn commit_identity(state: &SharedState, event: IdentityEvent) -> IdentityPhase {
    let phase = match state.transition_now(event.clone()).await {
        Ok(phase) => phase,
        Err(err) => {
            warn!(event = ?event, error = %err, "identity event rejected; adopting provider session");
            let observed = IdentityEvent::SessionObserved(observed_user(event));
            match state.transition_now(observed).await {
                Ok(phase) => phase,
                Err(err) => {
                    warn!(error = %err, "failed to resynchronise identity state");
                    state.identity_phase().await
                }
            }
        }
    };
    publish_session(state, &phase);
    phase
}

/// Execute a planned transition around provider `work`, then publish the committed session.
pub async fn run_transition_with_broadcast<F, Fut, T>(
    state: &SharedState,
    event: IdentityEvent,
    work: F,
) -> Result<T, ServiceError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let (res, next) = state.run_transition(event, work).await?;
    publish_session(state, &next);
    Ok(res)
}

fn publish_session(state: &SharedState, phase: &IdentityPhase) {
    let session = Session::from(phase);
    if state.session().commit(session.clone()) {
        info!(
            phase = phase.label(),
            account_id = ?session.account_id,
            "identity session committed"
        );
        state.events().publish(SyncEvent::SessionChanged(session));
        account_status::refresh(state);
    }
}

fn observed_user(event: IdentityEvent) -> Option<AuthUser> {
    match event {
        IdentityEvent::AnonymousSignedIn(user)
        | IdentityEvent::CredentialLinked(user)
        | IdentityEvent::SignedIn(user) => Some(user),
        IdentityEvent::SignedOut => None,
        IdentityEvent::SessionObserved(user) => user,
    }
}
