use serde::Serialize;
use utoipa::ToSchema;

use crate::{
    dto::account::{SessionView, StatusView},
    services::write_scheduler::WriteOutcome,
    state::SyncEvent,
};

#[derive(Clone, Debug)]
/// Dispatched payload carried across the SSE channel.
pub struct ServerEvent {
    pub event: Option<String>,
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }

    /// Render an engine event under its SSE event name.
    pub fn from_sync_event(event: &SyncEvent) -> serde_json::Result<Self> {
        match event {
            SyncEvent::SessionChanged(session) => {
                Self::json(Some("session".to_string()), &SessionView::from(session.clone()))
            }
            SyncEvent::AccountStatus(snapshot) => {
                Self::json(Some("account_status".to_string()), &StatusView::from(snapshot.clone()))
            }
            SyncEvent::RemoteWrite { slug, outcome } => Self::json(
                Some("remote_write".to_string()),
                &RemoteWriteEvent {
                    slug: slug.clone(),
                    outcome: outcome.clone(),
                },
            ),
            SyncEvent::Reconciled(report) => Self::json(Some("reconciled".to_string()), report),
            SyncEvent::SettingChanged(change) => Self::json(Some("setting".to_string()), change),
            SyncEvent::MirrorStatus { degraded } => Self::json(
                Some("mirror_status".to_string()),
                &MirrorStatus {
                    degraded: *degraded,
                },
            ),
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Whether the engine is running without a remote mirror.
    pub degraded: bool,
    pub session: SessionView,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the remote mirror becomes unreachable or comes back.
pub struct MirrorStatus {
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast after every debounced remote write fires.
pub struct RemoteWriteEvent {
    pub slug: String,
    pub outcome: WriteOutcome,
}

#[cfg(test)]
mod tests {
    use serde_json::{Value, json};

    use super::*;
    use crate::dao::models::AccountId;

    #[test]
    fn remote_writes_are_tagged_by_outcome() {
        let event = ServerEvent::from_sync_event(&SyncEvent::RemoteWrite {
            slug: "snake".into(),
            outcome: WriteOutcome::Written {
                account_id: AccountId::new("acct"),
                updated_at: 7,
            },
        })
        .unwrap();

        assert_eq!(event.event.as_deref(), Some("remote_write"));
        let data: Value = serde_json::from_str(&event.data).unwrap();
        assert_eq!(
            data,
            json!({
                "slug": "snake",
                "outcome": { "status": "written", "account_id": "acct", "updated_at": 7 }
            })
        );
    }

    #[test]
    fn mirror_status_uses_its_own_event_name() {
        let event = ServerEvent::from_sync_event(&SyncEvent::MirrorStatus { degraded: true }).unwrap();
        assert_eq!(event.event.as_deref(), Some("mirror_status"));
        assert_eq!(event.data, r#"{"degraded":true}"#);
    }
}
