//! Per-slug debounce of outgoing remote writes.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::{DashMap, mapref::entry::Entry};
use serde::Serialize;
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{sleep, timeout},
};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::{
    dao::models::{AccountId, RemoteRecord},
    state::{SharedState, SyncEvent},
};

/// Result of one debounced write firing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WriteOutcome {
    /// The current local record was merge-upserted to the mirror.
    Written { account_id: AccountId, updated_at: i64 },
    /// No session with an account id; dropped.
    NoSession,
    /// No mirror installed; dropped.
    MirrorUnavailable,
    /// The slug has no local record any more; dropped.
    NoLocalRecord,
    /// The mirror call failed or timed out; dropped without retry.
    Failed { message: String },
}

struct PendingWrite {
    ticket: u64,
    handle: JoinHandle<()>,
}

/// Registry of armed per-slug timers, the single authority over pending writes.
///
/// A slug stays pending from the moment its timer is armed until its remote write has
/// returned. Writes for one slug go through a lane and never overlap, so a slow write can
/// not land after a newer one.
pub struct WriteScheduler {
    quiet_window: Duration,
    pending: DashMap<String, PendingWrite>,
    lanes: DashMap<String, Arc<Mutex<()>>>,
    next_ticket: AtomicU64,
}

impl WriteScheduler {
    /// Scheduler whose timers fire after `quiet_window` without a new mutation.
    pub fn new(quiet_window: Duration) -> Self {
        Self {
            quiet_window,
            pending: DashMap::new(),
            lanes: DashMap::new(),
            next_ticket: AtomicU64::new(0),
        }
    }

    /// Debounce window applied to every slug.
    pub fn quiet_window(&self) -> Duration {
        self.quiet_window
    }

    /// Whether `slug` has an armed timer or a write in flight.
    pub fn is_pending(&self, slug: &str) -> bool {
        self.pending.contains_key(slug) || self.in_flight(slug)
    }

    /// Slugs with an armed timer or a write in flight, sorted.
    pub fn pending_slugs(&self) -> Vec<String> {
        let mut slugs: Vec<String> = self
            .pending
            .iter()
            .map(|entry| entry.key().clone())
            .chain(
                self.lanes
                    .iter()
                    .filter(|lane| lane.value().try_lock().is_err())
                    .map(|lane| lane.key().clone()),
            )
            .collect();
        slugs.sort();
        slugs.dedup();
        slugs
    }

    fn in_flight(&self, slug: &str) -> bool {
        self.lanes
            .get(slug)
            .is_some_and(|lane| lane.try_lock().is_err())
    }

    fn lane(&self, slug: &str) -> Arc<Mutex<()>> {
        self.lanes.entry(slug.to_owned()).or_default().clone()
    }

    /// Disarm the timer for `slug`. Returns whether one was armed; a write already in
    /// flight runs to completion.
    pub fn cancel(&self, slug: &str) -> bool {
        match self.pending.remove(slug) {
            Some((_, pending)) => {
                pending.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Remove the entry for `slug` only if it still belongs to `ticket`.
    fn claim(&self, slug: &str, ticket: u64) -> bool {
        self.pending
            .remove_if(slug, |_, pending| pending.ticket == ticket)
            .is_some()
    }
}

/// Arm (or re-arm) the debounce timer for `slug`; the previous timer is cancelled.
pub fn schedule(state: &SharedState, slug: &str) {
    let scheduler = state.writes();
    let ticket = scheduler.next_ticket.fetch_add(1, Ordering::Relaxed);

    // The entry guard is held until the new handle is stored, so a timer can never
    // claim its slot before it has been registered.
    let entry = scheduler.pending.entry(slug.to_owned());
    let handle = tokio::spawn(fire(state.clone(), slug.to_owned(), ticket));
    let replaced = match entry {
        Entry::Occupied(mut occupied) => Some(occupied.insert(PendingWrite { ticket, handle })),
        Entry::Vacant(vacant) => {
            vacant.insert(PendingWrite { ticket, handle });
            None
        }
    };

    if let Some(previous) = replaced {
        previous.handle.abort();
        debug!(slug, "remote write re-armed");
    }
}

async fn fire(state: SharedState, slug: String, ticket: u64) {
    sleep(state.writes().quiet_window()).await;
    // The lane is taken before the timer gives up its slot, so the slug never looks idle
    // between the two.
    let lane = state.writes().lane(&slug);
    let in_flight = lane.lock().await;
    if !state.writes().claim(&slug, ticket) {
        return;
    }

    let outcome = push_current(&state, &slug).await;
    drop(in_flight);
    match &outcome {
        WriteOutcome::Written { account_id, updated_at } => {
            info!(slug = %slug, account_id = %account_id, updated_at, "remote progress written")
        }
        WriteOutcome::Failed { message } => {
            warn!(slug = %slug, error = %message, "remote progress write failed")
        }
        other => debug!(slug = %slug, outcome = ?other, "remote progress write dropped"),
    }
    state.events().publish(SyncEvent::RemoteWrite { slug, outcome });
}

/// Push the record current at call time, evaluated against the session current at call time.
pub async fn push_current(state: &SharedState, slug: &str) -> WriteOutcome {
    let Some(account_id) = state.session().account_id() else {
        return WriteOutcome::NoSession;
    };
    let Some(mirror) = state.mirror().await else {
        return WriteOutcome::MirrorUnavailable;
    };
    let Some(record) = state.progress().record(slug) else {
        return WriteOutcome::NoLocalRecord;
    };

    let updated_at = record.updated_at;
    let upsert = mirror.upsert(&account_id, RemoteRecord::from_local(slug, record));
    match timeout(state.config().remote_timeout, upsert).await {
        Ok(Ok(())) => WriteOutcome::Written {
            account_id,
            updated_at,
        },
        Ok(Err(err)) => WriteOutcome::Failed {
            message: err.to_string(),
        },
        Err(_) => WriteOutcome::Failed {
            message: "remote write timed out".into(),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::{
        config::SyncConfig,
        dao::{kv::LocalKv, mirror::memory::MemoryMirror},
        state::{AppState, Session},
    };

    async fn state_with_session(mirror: &MemoryMirror) -> SharedState {
        let state = AppState::new(SyncConfig::default(), LocalKv::in_memory(), None);
        state.session().commit(Session {
            account_id: Some(AccountId::new("acct")),
            is_anonymous: true,
            email: None,
        });
        state.install_mirror(Arc::new(mirror.clone())).await;
        state
    }

    fn data(value: serde_json::Value) -> crate::dao::models::ProgressData {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_sets_coalesce_into_one_write_with_last_data() {
        let mirror = MemoryMirror::new();
        let state = state_with_session(&mirror).await;
        let mut events = state.events().subscribe();

        for score in 1..=5 {
            state.progress().set("aim-pop", data(json!({ "best": score })));
            schedule(&state, "aim-pop");
            tokio::time::advance(Duration::from_millis(100)).await;
        }
        assert!(state.writes().is_pending("aim-pop"));

        let event = events.recv().await.unwrap();
        assert!(matches!(event, SyncEvent::RemoteWrite { ref slug, outcome: WriteOutcome::Written { .. } } if slug == "aim-pop"));

        let writes = mirror.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].1.data, data(json!({ "best": 5 })));
        assert!(!state.writes().is_pending("aim-pop"));
    }

    #[tokio::test(start_paused = true)]
    async fn no_session_means_no_remote_traffic() {
        let mirror = MemoryMirror::new();
        let state = AppState::new(SyncConfig::default(), LocalKv::in_memory(), None);
        state.install_mirror(Arc::new(mirror.clone())).await;
        let mut events = state.events().subscribe();

        state.progress().set("snake", data(json!({ "len": 3 })));
        schedule(&state, "snake");

        let event = loop {
            if let SyncEvent::RemoteWrite { outcome, .. } = events.recv().await.unwrap() {
                break outcome;
            }
        };
        assert_eq!(event, WriteOutcome::NoSession);
        assert!(mirror.writes().is_empty());
        assert_eq!(mirror.read_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_disarms_the_timer() {
        let mirror = MemoryMirror::new();
        let state = state_with_session(&mirror).await;
        state.progress().set("snake", data(json!({ "len": 3 })));
        schedule(&state, "snake");
        assert_eq!(state.writes().pending_slugs(), vec!["snake".to_string()]);

        assert!(state.writes().cancel("snake"));
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(mirror.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn slow_write_is_not_overtaken_by_the_next_one() {
        let mirror = MemoryMirror::new();
        mirror.delay_next_write(Duration::from_secs(2));
        let state = state_with_session(&mirror).await;

        state.progress().set("snake", data(json!({ "v": 1 })));
        schedule(&state, "snake");
        tokio::time::sleep(Duration::from_millis(600)).await;
        // First write is still on the wire.
        assert!(state.writes().is_pending("snake"));
        assert!(mirror.writes().is_empty());

        state.progress().set("snake", data(json!({ "v": 2 })));
        schedule(&state, "snake");
        tokio::time::sleep(Duration::from_secs(5)).await;

        let local = state.progress().record("snake").unwrap();
        let remote = mirror.record(&AccountId::new("acct"), "snake").unwrap();
        assert_eq!(remote.data, data(json!({ "v": 2 })));
        assert_eq!(remote.updated_at, local.updated_at);

        let writes = mirror.writes();
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].1.data, data(json!({ "v": 1 })));
        assert!(writes[0].1.updated_at < writes[1].1.updated_at);
        assert!(!state.writes().is_pending("snake"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_writes_are_reported_and_not_retried() {
        let mirror = MemoryMirror::new();
        mirror.fail_writes_for("snake");
        let state = state_with_session(&mirror).await;
        let mut events = state.events().subscribe();

        state.progress().set("snake", data(json!({ "len": 3 })));
        schedule(&state, "snake");

        match events.recv().await.unwrap() {
            SyncEvent::RemoteWrite { outcome: WriteOutcome::Failed { .. }, .. } => {}
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(!state.writes().is_pending("snake"));
    }
}
