use serde::Serialize;
use utoipa::ToSchema;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Whether an identity provider is wired.
    pub sync_configured: bool,
    /// Number of remote writes waiting for their quiet window.
    pub pending_writes: usize,
}

impl HealthResponse {
    /// The remote mirror is installed and healthy.
    pub fn ok(sync_configured: bool, pending_writes: usize) -> Self {
        Self {
            status: "ok".to_string(),
            sync_configured,
            pending_writes,
        }
    }

    /// Running local-only: no reachable remote mirror.
    pub fn degraded(sync_configured: bool, pending_writes: usize) -> Self {
        Self {
            status: "degraded".to_string(),
            sync_configured,
            pending_writes,
        }
    }
}
