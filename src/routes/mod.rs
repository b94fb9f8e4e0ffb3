use axum::Router;

use crate::state::SharedState;

/// Account and sign-in endpoints.
pub mod account;
/// Swagger UI.
pub mod docs;
/// Health check endpoint.
pub mod health;
/// Progress and recent-list endpoints.
pub mod progress;
/// Preference endpoints.
pub mod settings;
/// Server-sent event stream.
pub mod sse;
/// Manual reconcile and pending-write endpoints.
pub mod sync;

/// Compose all route trees, wiring in shared state and documentation routes.
pub fn router(state: SharedState) -> Router<()> {
    let api_router = health::router()
        .merge(sse::router())
        .merge(progress::router())
        .merge(settings::router())
        .merge(account::router())
        .merge(sync::router());

    let docs_router = docs::router(state.clone());

    api_router.merge(docs_router).with_state(state)
}
