use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, post},
};
use serde_json::Value;
use tracing::debug;
use validator::Validate;

use crate::{
    dao::models::ProgressRecord,
    dto::{
        progress::{
            ProgressEntry, ProgressListResponse, ProgressWriteRequest, ProgressWriteResponse,
            RecentResponse,
        },
        validation::validate_key,
    },
    error::AppError,
    services::progress_service,
    state::SharedState,
};

/// Routes exposing per-game progress and the recently played list.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/progress", get(list_progress))
        .route(
            "/progress/{slug}",
            get(get_progress).put(put_progress).patch(patch_progress),
        )
        .route("/recent", get(list_recent))
        .route("/recent/{slug}", post(push_recent))
}

/// List every stored progress record.
#[utoipa::path(
    get,
    path = "/progress",
    tag = "progress",
    responses((status = 200, description = "All stored progress", body = ProgressListResponse))
)]
pub async fn list_progress(State(state): State<SharedState>) -> Json<ProgressListResponse> {
    let entries = progress_service::list(&state)
        .into_iter()
        .map(|(slug, record)| ProgressEntry::new(slug, record))
        .collect();
    Json(ProgressListResponse { entries })
}

#[utoipa::path(
    get,
    path = "/progress/{slug}",
    tag = "progress",
    params(("slug" = String, Path, description = "Game identifier")),
    responses(
        (status = 200, description = "Stored progress", body = ProgressEntry),
        (status = 404, description = "No progress stored for this game")
    )
)]
pub async fn get_progress(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
) -> Result<Json<ProgressEntry>, AppError> {
    let record = progress_service::record(&state, &slug)
        .ok_or_else(|| AppError::NotFound(format!("no progress stored for `{}`", slug.trim())))?;
    Ok(Json(ProgressEntry::new(slug.trim(), record)))
}

/// Replace a game's progress; the remote copy follows after the quiet window.
#[utoipa::path(
    put,
    path = "/progress/{slug}",
    tag = "progress",
    params(("slug" = String, Path, description = "Game identifier")),
    request_body = ProgressWriteRequest,
    responses((status = 200, description = "Write outcome; `applied` is false for rejected input", body = ProgressWriteResponse))
)]
pub async fn put_progress(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
    Json(payload): Json<ProgressWriteRequest>,
) -> Json<ProgressWriteResponse> {
    Json(write(&state, &slug, payload, progress_service::set))
}

/// Shallow-merge into a game's progress; absent records behave like a replace.
#[utoipa::path(
    patch,
    path = "/progress/{slug}",
    tag = "progress",
    params(("slug" = String, Path, description = "Game identifier")),
    request_body = ProgressWriteRequest,
    responses((status = 200, description = "Write outcome; `applied` is false for rejected input", body = ProgressWriteResponse))
)]
pub async fn patch_progress(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
    Json(payload): Json<ProgressWriteRequest>,
) -> Json<ProgressWriteResponse> {
    Json(write(&state, &slug, payload, progress_service::merge))
}

fn write<F>(state: &SharedState, slug: &str, payload: ProgressWriteRequest, apply: F) -> ProgressWriteResponse
where
    F: FnOnce(&SharedState, &str, Value) -> Option<ProgressRecord>,
{
    if let Err(err) = validate_key(slug) {
        debug!(error = %err, "ignoring progress write with invalid slug");
        return ProgressWriteResponse::rejected();
    }
    if let Err(err) = payload.validate() {
        debug!(error = %err, "ignoring invalid progress write");
        return ProgressWriteResponse::rejected();
    }

    let slug = slug.trim();
    match apply(state, slug, payload.data) {
        Some(record) => ProgressWriteResponse {
            applied: true,
            pending_write: state.writes().is_pending(slug),
            entry: Some(ProgressEntry::new(slug, record)),
        },
        None => ProgressWriteResponse::rejected(),
    }
}

#[utoipa::path(
    get,
    path = "/recent",
    tag = "progress",
    responses((status = 200, description = "Recently played games, newest first", body = RecentResponse))
)]
pub async fn list_recent(State(state): State<SharedState>) -> Json<RecentResponse> {
    Json(RecentResponse {
        slugs: progress_service::recent(&state),
    })
}

/// Move a game to the front of the recently played list.
#[utoipa::path(
    post,
    path = "/recent/{slug}",
    tag = "progress",
    params(("slug" = String, Path, description = "Game identifier")),
    responses((status = 200, description = "Updated list", body = RecentResponse))
)]
pub async fn push_recent(
    State(state): State<SharedState>,
    Path(slug): Path<String>,
) -> Json<RecentResponse> {
    Json(RecentResponse {
        slugs: progress_service::mark_played(&state, &slug),
    })
}
