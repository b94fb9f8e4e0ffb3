/// Broadcast hub for sync events.
pub mod events;
/// Plan/apply/abort state machine for identity transitions.
pub mod identity_machine;
/// Committed session and its watchers.
pub mod session;
/// Account status board.
pub mod status;
/// Helpers running planned identity transitions.
pub mod transitions;

use std::{future::Future, sync::Arc};

use tokio::sync::{Mutex, OnceCell, RwLock, watch};
use tokio::time::timeout;
use tracing::warn;

use crate::{
    auth::AuthProvider,
    config::SyncConfig,
    dao::{
        kv::LocalKv, mirror::RemoteMirror, progress_store::ProgressStore, recent::RecentList,
        settings_store::SettingsStore,
    },
    error::ServiceError,
    services::{account_status, write_scheduler::WriteScheduler},
};

pub use self::events::{EventHub, SyncEvent};
pub use self::identity_machine::{AbortError, ApplyError, PlanError, Snapshot};
pub use self::session::{Session, SessionContext};
pub use self::status::{StatusBoard, StatusSnapshot};
use self::identity_machine::{IdentityEvent, IdentityPhase, IdentityStateMachine, Plan, PlanId};

/// Handle passed to handlers and background tasks.
pub type SharedState = Arc<AppState>;

const EVENT_CAPACITY: usize = 64;

/// Central application state: local stores, the mirror slot, identity and scheduling.
pub struct AppState {
    config: SyncConfig,
    progress: ProgressStore,
    settings: SettingsStore,
    recent: RecentList,
    mirror: RwLock<Option<Arc<dyn RemoteMirror>>>,
    degraded: watch::Sender<bool>,
    auth: Option<Arc<dyn AuthProvider>>,
    session: SessionContext,
    identity: RwLock<IdentityStateMachine>,
    identity_gate: Mutex<()>,
    reconcile_gate: Mutex<()>,
    ready: OnceCell<()>,
    status: StatusBoard,
    writes: WriteScheduler,
    events: EventHub,
}

impl AppState {
    /// Construct the shared state on top of `kv`.
    ///
    /// The mirror slot starts empty (degraded) until a backend is installed; without
    /// an `auth` provider every account action reports that sync is not configured.
    pub fn new(config: SyncConfig, kv: LocalKv, auth: Option<Arc<dyn AuthProvider>>) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let status = StatusBoard::new(account_status::initial_text(auth.is_some()));
        Arc::new(Self {
            progress: ProgressStore::new(kv.clone()),
            settings: SettingsStore::new(kv.clone()),
            recent: RecentList::new(kv),
            mirror: RwLock::new(None),
            degraded: degraded_tx,
            auth,
            session: SessionContext::new(),
            identity: RwLock::new(IdentityStateMachine::new()),
            identity_gate: Mutex::new(()),
            reconcile_gate: Mutex::new(()),
            ready: OnceCell::new(),
            status,
            writes: WriteScheduler::new(config.write_quiet_window),
            events: EventHub::new(EVENT_CAPACITY),
            config,
        })
    }

    /// Runtime configuration loaded at startup.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Device-local progress records.
    pub fn progress(&self) -> &ProgressStore {
        &self.progress
    }

    /// Device-local preferences.
    pub fn settings(&self) -> &SettingsStore {
        &self.settings
    }

    /// Recently played slugs.
    pub fn recent(&self) -> &RecentList {
        &self.recent
    }

    /// Committed session; the reconciler and write scheduler read it at use time.
    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    /// Account status line, last provider error and pin.
    pub fn status(&self) -> &StatusBoard {
        &self.status
    }

    /// Debounced remote writes.
    pub fn writes(&self) -> &WriteScheduler {
        &self.writes
    }

    /// Broadcast hub feeding SSE subscribers.
    pub fn events(&self) -> &EventHub {
        &self.events
    }

    /// Identity provider, absent when sync is not configured.
    pub fn auth(&self) -> Option<Arc<dyn AuthProvider>> {
        self.auth.clone()
    }

    /// Single-flight gate serialising identity actions.
    pub fn identity_gate(&self) -> &Mutex<()> {
        &self.identity_gate
    }

    /// Gate ensuring two reconciliation passes never overlap.
    pub fn reconcile_gate(&self) -> &Mutex<()> {
        &self.reconcile_gate
    }

    /// One-shot marker for the first readiness check.
    pub fn ready(&self) -> &OnceCell<()> {
        &self.ready
    }

    /// Obtain a handle to the installed mirror, if any.
    pub async fn mirror(&self) -> Option<Arc<dyn RemoteMirror>> {
        self.mirror.read().await.as_ref().cloned()
    }

    /// Install a mirror backend and leave degraded mode.
    pub async fn install_mirror(&self, mirror: Arc<dyn RemoteMirror>) {
        {
            let mut guard = self.mirror.write().await;
            *guard = Some(mirror);
        }
        self.update_degraded(false);
    }

    /// Drop the mirror backend and enter degraded mode.
    pub async fn clear_mirror(&self) {
        {
            let mut guard = self.mirror.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Whether the engine currently runs without a remote mirror.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded-mode changes.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub(crate) fn update_degraded(&self, value: bool) {
        let changed = self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
        if changed {
            self.events.publish(SyncEvent::MirrorStatus { degraded: value });
        }
    }

    /// Phase the identity state machine is committed to.
    pub async fn identity_phase(&self) -> IdentityPhase {
        self.identity.read().await.phase()
    }

    async fn plan_transition(&self, event: IdentityEvent) -> Result<Plan, PlanError> {
        let mut sm = self.identity.write().await;
        sm.plan(event)
    }

    async fn apply_planned_transition(&self, plan_id: PlanId) -> Result<IdentityPhase, ApplyError> {
        let mut sm = self.identity.write().await;
        sm.apply(plan_id)
    }

    async fn abort_transition(&self, plan_id: PlanId) -> Result<(), AbortError> {
        let mut sm = self.identity.write().await;
        sm.abort(plan_id)
    }

    /// Plan and apply `event` in one step, for outcomes already decided by the provider.
    pub(crate) async fn transition_now(&self, event: IdentityEvent) -> Result<IdentityPhase, ServiceError> {
        let mut sm = self.identity.write().await;
        let plan = sm.plan(event)?;
        Ok(sm.apply(plan.id)?)
    }

    /// Plan `event`, run `work` under the provider timeout, then apply or abort.
    ///
    /// Callers are expected to hold [`AppState::identity_gate`].
    pub async fn run_transition<F, Fut, T>(
        &self,
        event: IdentityEvent,
        work: F,
    ) -> Result<(T, IdentityPhase), ServiceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let Plan { id: plan_id, .. } = self.plan_transition(event.clone()).await?;

        let outcome = match timeout(self.config.provider_timeout, work()).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout),
        };

        match outcome {
            Ok(value) => {
                let next = self.apply_planned_transition(plan_id).await?;
                Ok((value, next))
            }
            Err(err) => {
                if let Err(abort_err) = self.abort_transition(plan_id).await {
                    warn!(
                        event = ?event,
                        plan_id = %plan_id,
                        error = ?abort_err,
                        "failed to abort identity transition after work error"
                    );
                }
                Err(err)
            }
        }
    }
}
