use serde::Serialize;
use utoipa::ToSchema;

/// Slugs whose remote write is still inside its quiet window.
#[derive(Debug, Serialize, ToSchema)]
pub struct PendingWritesResponse {
    pub slugs: Vec<String>,
    pub quiet_window_ms: u64,
}
