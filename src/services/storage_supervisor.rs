use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{mirror::RemoteMirror, storage::StorageError},
    services::reconciler,
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Keep a remote mirror installed, falling back to degraded (local-only) mode while it is unreachable.
///
/// Every (re)connection kicks off a reconciliation pass so writes dropped while degraded
/// are caught up.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn RemoteMirror>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(mirror) => {
                state.install_mirror(mirror.clone()).await;
                info!("remote mirror connected; leaving degraded mode");
                spawn_reconcile(&state);
                delay = INITIAL_DELAY;

                watch_health(&state, mirror.as_ref()).await;

                state.clear_mirror().await;
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, "remote mirror connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

/// Poll `mirror` until it fails and cannot be revived in place.
async fn watch_health(state: &SharedState, mirror: &dyn RemoteMirror) {
    loop {
        match mirror.health_check().await {
            Ok(()) => {
                if state.is_degraded() {
                    info!("remote mirror healthy again; leaving degraded mode");
                    state.update_degraded(false);
                }
                sleep(HEALTH_POLL_INTERVAL).await;
            }
            Err(_) => {
                let mut attempt = 0;
                let mut reconnect_delay = INITIAL_DELAY;
                let mut reconnected = false;

                while attempt < MAX_RECONNECT_ATTEMPTS {
                    match mirror.try_reconnect().await {
                        Ok(()) => {
                            info!("remote mirror reconnected after health check failure");
                            reconnected = true;
                            break;
                        }
                        Err(reconnect_err) => {
                            if attempt == 0 {
                                warn!(
                                    attempt, error = %reconnect_err,
                                    "remote mirror reconnect first attempt failed; entering degraded mode"
                                );
                                state.update_degraded(true);
                            } else {
                                warn!(attempt, error = %reconnect_err, "remote mirror reconnect attempt failed");
                            }
                            attempt += 1;
                            sleep(reconnect_delay).await;
                            reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
                        }
                    }
                }

                if !reconnected {
                    warn!("exhausted remote mirror reconnect attempts; staying in degraded mode");
                    return;
                }
                if state.is_degraded() {
                    state.update_degraded(false);
                    spawn_reconcile(state);
                }
                sleep(HEALTH_POLL_INTERVAL).await;
            }
        }
    }
}

fn spawn_reconcile(state: &SharedState) {
    let state = state.clone();
    tokio::spawn(async move {
        reconciler::reconcile(&state).await;
    });
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{
        config::SyncConfig,
        dao::{
            kv::LocalKv,
            mirror::memory::MemoryMirror,
            models::AccountId,
        },
        state::{AppState, Session, SyncEvent},
    };

    fn signed_in_state() -> SharedState {
        let state = AppState::new(SyncConfig::default(), LocalKv::in_memory(), None);
        state.session().commit(Session {
            account_id: Some(AccountId::new("acct")),
            is_anonymous: true,
            email: None,
        });
        state
    }

    #[tokio::test(start_paused = true)]
    async fn connecting_installs_the_mirror_and_reconciles() {
        let state = signed_in_state();
        state
            .progress()
            .set("snake", json!({ "len": 5 }).as_object().cloned().unwrap());
        let mirror = MemoryMirror::new();
        let mut events = state.events().subscribe();

        let connect_to = mirror.clone();
        let supervisor = tokio::spawn(run(state.clone(), move || {
            let mirror = connect_to.clone();
            async move { Ok(Arc::new(mirror) as Arc<dyn RemoteMirror>) }
        }));

        loop {
            if let SyncEvent::Reconciled(report) = events.recv().await.unwrap() {
                assert_eq!(report.pushed, vec!["snake"]);
                break;
            }
        }
        assert!(!state.is_degraded());
        assert!(mirror.record(&AccountId::new("acct"), "snake").is_some());
        supervisor.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_mirror_enters_degraded_mode() {
        let state = signed_in_state();
        let mirror = MemoryMirror::new();
        let mut degraded = state.degraded_watcher();

        let connect_to = mirror.clone();
        let supervisor = tokio::spawn(run(state.clone(), move || {
            let mirror = connect_to.clone();
            async move { Ok(Arc::new(mirror) as Arc<dyn RemoteMirror>) }
        }));

        degraded.wait_for(|value| !*value).await.unwrap();
        mirror.set_offline(true);
        degraded.wait_for(|value| *value).await.unwrap();

        mirror.set_offline(false);
        degraded.wait_for(|value| !*value).await.unwrap();
        supervisor.abort();
    }
}
