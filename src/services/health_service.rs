use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report mirror health while logging connectivity issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.mirror().await {
        Some(mirror) => {
            if let Err(err) = mirror.health_check().await {
                warn!(error = %err, "remote mirror health check failed");
            }
        }
        None => warn!("remote mirror unavailable (degraded mode)"),
    }

    let configured = state.auth().is_some();
    let pending = state.writes().pending_slugs().len();
    if state.is_degraded() {
        HealthResponse::degraded(configured, pending)
    } else {
        HealthResponse::ok(configured, pending)
    }
}
