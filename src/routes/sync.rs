use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};

use crate::{
    dto::sync::PendingWritesResponse,
    services::reconciler::{self, ReconcileReport},
    state::SharedState,
};

/// Routes exposing the sync engine itself.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/sync/reconcile", post(reconcile_now))
        .route("/sync/pending", get(pending_writes))
}

/// Run a reconciliation pass now and return its report.
#[utoipa::path(
    post,
    path = "/sync/reconcile",
    tag = "sync",
    responses((status = 200, description = "Pass report; skipped passes carry a reason", body = ReconcileReport))
)]
pub async fn reconcile_now(State(state): State<SharedState>) -> Json<ReconcileReport> {
    Json(reconciler::reconcile(&state).await)
}

#[utoipa::path(
    get,
    path = "/sync/pending",
    tag = "sync",
    responses((status = 200, description = "Slugs with an armed remote write", body = PendingWritesResponse))
)]
pub async fn pending_writes(State(state): State<SharedState>) -> Json<PendingWritesResponse> {
    let scheduler = state.writes();
    Json(PendingWritesResponse {
        slugs: scheduler.pending_slugs(),
        quiet_window_ms: u64::try_from(scheduler.quiet_window().as_millis()).unwrap_or(u64::MAX),
    })
}
