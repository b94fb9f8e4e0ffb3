use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::get,
};
use tracing::debug;

use crate::{
    dto::{
        settings::{
            FallbackQuery, SettingResponse, SettingWriteRequest, SettingWriteResponse,
            SettingsResponse,
        },
        validation::validate_key,
    },
    services::settings_service,
    state::SharedState,
};

/// Routes exposing device-local preferences.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/settings", get(list_settings))
        .route("/settings/{key}", get(get_setting).put(put_setting))
}

#[utoipa::path(
    get,
    path = "/settings",
    tag = "settings",
    responses((status = 200, description = "All stored preferences", body = SettingsResponse))
)]
pub async fn list_settings(State(state): State<SharedState>) -> Json<SettingsResponse> {
    Json(SettingsResponse {
        settings: settings_service::all(&state),
        visual_mode: settings_service::visual_mode(&state),
    })
}

/// Read one preference, answering `fallback` (JSON) when it is unset.
#[utoipa::path(
    get,
    path = "/settings/{key}",
    tag = "settings",
    params(("key" = String, Path, description = "Preference key"), FallbackQuery),
    responses((status = 200, description = "Stored value or the fallback", body = SettingResponse))
)]
pub async fn get_setting(
    State(state): State<SharedState>,
    Path(key): Path<String>,
    Query(query): Query<FallbackQuery>,
) -> Json<SettingResponse> {
    let value = settings_service::get(&state, key.trim(), query.value());
    Json(SettingResponse {
        key: key.trim().to_owned(),
        value,
    })
}

#[utoipa::path(
    put,
    path = "/settings/{key}",
    tag = "settings",
    params(("key" = String, Path, description = "Preference key")),
    request_body = SettingWriteRequest,
    responses((status = 200, description = "Write outcome; `applied` is false for rejected keys", body = SettingWriteResponse))
)]
pub async fn put_setting(
    State(state): State<SharedState>,
    Path(key): Path<String>,
    Json(payload): Json<SettingWriteRequest>,
) -> Json<SettingWriteResponse> {
    let applied = match validate_key(&key) {
        Ok(()) => settings_service::set(&state, &key, payload.value),
        Err(err) => {
            debug!(error = %err, "ignoring setting write with invalid key");
            false
        }
    };
    Json(SettingWriteResponse {
        applied,
        visual_mode: settings_service::visual_mode(&state),
    })
}
