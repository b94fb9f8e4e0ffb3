use tokio::sync::broadcast;

use crate::{
    dao::settings_store::SettingChange,
    services::{reconciler::ReconcileReport, write_scheduler::WriteOutcome},
    state::{session::Session, status::StatusSnapshot},
};

/// Notifications fanned out to observers (SSE clients, tests, embedding code).
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    SessionChanged(Session),
    AccountStatus(StatusSnapshot),
    RemoteWrite { slug: String, outcome: WriteOutcome },
    Reconciled(ReconcileReport),
    SettingChanged(SettingChange),
    MirrorStatus { degraded: bool },
}

/// Broadcast hub carrying [`SyncEvent`]s.
pub struct EventHub {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventHub {
    /// Hub buffering up to `capacity` events per lagging subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a subscriber that receives every subsequent event.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Send to all current subscribers; having none is not an error.
    pub fn publish(&self, event: SyncEvent) {
        let _ = self.sender.send(event);
    }
}
