//! Last-writer-wins reconciliation of the local progress store against the remote mirror.

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info, warn};
use utoipa::ToSchema;

use crate::{
    dao::models::{AccountId, ProgressRecord, RemoteRecord, normalize_slug},
    state::{SharedState, SyncEvent},
};

/// What a pass did for one slug.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Remote is newer or the slug is missing locally.
    Pull,
    /// Local is newer or the slug is missing remotely.
    Push,
    /// Equal timestamps; neither side is touched.
    Unchanged,
}

/// Compare one slug's copies. Ties favour neither side.
pub fn decide(local: Option<&ProgressRecord>, remote: Option<&RemoteRecord>) -> Decision {
    match (local, remote) {
        (None, None) => Decision::Unchanged,
        (None, Some(_)) => Decision::Pull,
        (Some(_), None) => Decision::Push,
        (Some(local), Some(remote)) if remote.updated_at > local.updated_at => Decision::Pull,
        (Some(local), Some(remote)) if local.updated_at > remote.updated_at => Decision::Push,
        (Some(_), Some(_)) => Decision::Unchanged,
    }
}

/// Why a pass did not touch any slug.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum SkipReason {
    /// No session with an account id.
    NoSession,
    /// No remote mirror is installed (degraded mode).
    MirrorUnavailable,
    /// Reading the account's remote records failed or timed out.
    RemoteReadFailed { message: String },
}

/// A slug whose pull or push failed; the rest of the pass carried on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct SlugFailure {
    pub slug: String,
    pub message: String,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReconcileReport {
    /// Account the pass ran against, read when it started.
    pub account_id: Option<AccountId>,
    /// Set when the pass touched nothing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<SkipReason>,
    /// Slugs overwritten locally with the newer remote copy.
    pub pulled: Vec<String>,
    /// Slugs merge-upserted to the mirror.
    pub pushed: Vec<String>,
    /// Slugs with equal timestamps on both sides.
    pub unchanged: Vec<String>,
    pub failed: Vec<SlugFailure>,
    /// Slugs left for the next pass (budget exhausted or session changed mid-pass).
    pub deferred: Vec<String>,
    /// Pulled slugs that appear in the recently played list.
    pub recent_pulled: Vec<String>,
}

impl ReconcileReport {
    fn skipped(account_id: Option<AccountId>, reason: SkipReason) -> Self {
        Self {
            account_id,
            skipped: Some(reason),
            ..Self::default()
        }
    }
}

/// Run one pass to completion and publish its report.
///
/// Passes are serialised; a pass waiting on the gate reads the session committed
/// when it starts.
pub async fn reconcile(state: &SharedState) -> ReconcileReport {
    let report = {
        let _gate = state.reconcile_gate().lock().await;
        run_pass(state).await
    };

    if let Some(reason) = &report.skipped {
        debug!(reason = ?reason, "reconciliation skipped");
    } else {
        info!(
            account_id = ?report.account_id,
            pulled = report.pulled.len(),
            pushed = report.pushed.len(),
            unchanged = report.unchanged.len(),
            failed = report.failed.len(),
            deferred = report.deferred.len(),
            "reconciliation finished"
        );
    }
    state.events().publish(SyncEvent::Reconciled(report.clone()));
    report
}

async fn run_pass(state: &SharedState) -> ReconcileReport {
    let Some(account_id) = state.session().account_id() else {
        return ReconcileReport::skipped(None, SkipReason::NoSession);
    };
    let Some(mirror) = state.mirror().await else {
        return ReconcileReport::skipped(Some(account_id), SkipReason::MirrorUnavailable);
    };

    let config = state.config();
    let deadline = Instant::now() + config.reconcile_budget;
    let call_deadline = || (Instant::now() + config.remote_timeout).min(deadline);

    let remote = match timeout_at(call_deadline(), mirror.fetch_all(&account_id)).await {
        Ok(Ok(records)) => records,
        Ok(Err(err)) => {
            warn!(account_id = %account_id, error = %err, "remote progress read failed");
            return ReconcileReport::skipped(
                Some(account_id),
                SkipReason::RemoteReadFailed {
                    message: err.to_string(),
                },
            );
        }
        Err(_) => {
            warn!(account_id = %account_id, "remote progress read timed out");
            return ReconcileReport::skipped(
                Some(account_id),
                SkipReason::RemoteReadFailed {
                    message: "remote read timed out".into(),
                },
            );
        }
    };

    let remote: BTreeMap<String, RemoteRecord> = remote
        .into_iter()
        .filter_map(|record| {
            let slug = normalize_slug(&record.slug)?;
            Some((slug, record))
        })
        .collect();
    let slugs: BTreeSet<String> = state
        .progress()
        .list_slugs()
        .into_iter()
        .chain(remote.keys().cloned())
        .collect();

    let mut report = ReconcileReport {
        account_id: Some(account_id.clone()),
        ..ReconcileReport::default()
    };

    for slug in slugs {
        if Instant::now() >= deadline {
            report.deferred.push(slug);
            continue;
        }

        // Re-read per slug: earlier awaits may have let the game write newer data.
        let local = state.progress().record(&slug);
        let remote_record = remote.get(&slug);
        let decision = decide(local.as_ref(), remote_record);
        // Never apply another account's data, nor write to an account no longer signed in.
        if decision != Decision::Unchanged && state.session().account_id().as_ref() != Some(&account_id) {
            report.deferred.push(slug);
            continue;
        }

        match decision {
            Decision::Unchanged => report.unchanged.push(slug),
            Decision::Pull => {
                let Some(remote_record) = remote_record else {
                    report.unchanged.push(slug);
                    continue;
                };
                let pulled = state.progress().set_at(
                    &slug,
                    remote_record.data.clone(),
                    remote_record.updated_at,
                );
                match pulled {
                    Some(_) => report.pulled.push(slug),
                    None => report.failed.push(SlugFailure {
                        slug,
                        message: "local store rejected the pulled record".into(),
                    }),
                }
            }
            Decision::Push => {
                let Some(local) = local else {
                    report.unchanged.push(slug);
                    continue;
                };

                let upsert = mirror.upsert(&account_id, RemoteRecord::from_local(slug.clone(), local));
                match timeout_at(call_deadline(), upsert).await {
                    Ok(Ok(())) => report.pushed.push(slug),
                    Ok(Err(err)) => {
                        warn!(slug = %slug, error = %err, "remote progress push failed");
                        report.failed.push(SlugFailure {
                            slug,
                            message: err.to_string(),
                        });
                    }
                    Err(_) => {
                        warn!(slug = %slug, "remote progress push timed out");
                        report.failed.push(SlugFailure {
                            slug,
                            message: "remote write timed out".into(),
                        });
                    }
                }
            }
        }
    }

    let recent = state.recent();
    report.recent_pulled = report
        .pulled
        .iter()
        .filter(|slug| recent.contains(slug.as_str()))
        .cloned()
        .collect();
    report
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use serde_json::{Value, json};

    use super::*;
    use crate::{
        config::SyncConfig,
        dao::{kv::LocalKv, mirror::memory::MemoryMirror, models::ProgressData},
        state::{AppState, Session},
    };

    fn data(value: Value) -> ProgressData {
        value.as_object().cloned().unwrap()
    }

    fn local(updated_at: i64) -> ProgressRecord {
        ProgressRecord {
            data: data(json!({ "side": "local" })),
            updated_at,
        }
    }

    fn remote(slug: &str, updated_at: i64) -> RemoteRecord {
        RemoteRecord {
            slug: slug.into(),
            data: data(json!({ "side": "remote" })),
            updated_at,
        }
    }

    async fn signed_in_state(mirror: &MemoryMirror, config: SyncConfig) -> SharedState {
        let state = AppState::new(config, LocalKv::in_memory(), None);
        state.session().commit(Session {
            account_id: Some(AccountId::new("acct")),
            is_anonymous: false,
            email: None,
        });
        state.install_mirror(Arc::new(mirror.clone())).await;
        state
    }

    #[test]
    fn decide_follows_last_writer_wins() {
        assert_eq!(decide(Some(&local(5)), Some(&remote("a", 9))), Decision::Pull);
        assert_eq!(decide(Some(&local(9)), Some(&remote("a", 5))), Decision::Push);
        assert_eq!(decide(Some(&local(7)), Some(&remote("a", 7))), Decision::Unchanged);
        assert_eq!(decide(None, Some(&remote("a", 1))), Decision::Pull);
        assert_eq!(decide(Some(&local(1)), None), Decision::Push);
    }

    #[tokio::test]
    async fn pass_converges_both_sides_to_the_newest_copy() {
        let mirror = MemoryMirror::new();
        let account = AccountId::new("acct");
        mirror.seed(&account, remote("older-local", 200));
        mirror.seed(&account, remote("older-remote", 100));
        mirror.seed(&account, remote("remote-only", 50));
        let state = signed_in_state(&mirror, SyncConfig::default()).await;
        state.progress().set_at("older-local", data(json!({ "side": "local" })), 100);
        state.progress().set_at("older-remote", data(json!({ "side": "local" })), 200);
        state.progress().set_at("local-only", data(json!({ "side": "local" })), 10);
        state.recent().push("remote-only");

        let report = reconcile(&state).await;
        assert_eq!(report.pulled, vec!["older-local", "remote-only"]);
        assert_eq!(report.pushed, vec!["local-only", "older-remote"]);
        assert_eq!(report.recent_pulled, vec!["remote-only"]);

        let pulled = state.progress().record("older-local").unwrap();
        assert_eq!(pulled.updated_at, 200);
        assert_eq!(pulled.data, data(json!({ "side": "remote" })));
        let pushed = mirror.record(&account, "older-remote").unwrap();
        assert_eq!(pushed.updated_at, 200);
        assert_eq!(pushed.data, data(json!({ "side": "local" })));

        // Pulls never schedule remote writes.
        assert!(state.writes().pending_slugs().is_empty());
    }

    #[tokio::test]
    async fn equal_timestamps_leave_both_sides_alone() {
        let mirror = MemoryMirror::new();
        let account = AccountId::new("acct");
        mirror.seed(&account, remote("tie", 42));
        let state = signed_in_state(&mirror, SyncConfig::default()).await;
        state.progress().set_at("tie", data(json!({ "side": "local" })), 42);

        let report = reconcile(&state).await;
        assert_eq!(report.unchanged, vec!["tie"]);
        assert!(mirror.writes().is_empty());
        assert_eq!(
            state.progress().get("tie"),
            Some(data(json!({ "side": "local" })))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn session_switch_during_the_read_defers_pulls_and_pushes() {
        let mirror = MemoryMirror::new();
        mirror.seed(&AccountId::new("acct"), remote("from-old", 10));
        mirror.delay_next_read(Duration::from_secs(1));
        let state = signed_in_state(&mirror, SyncConfig::default()).await;
        state.progress().set_at("mine", data(json!({ "side": "local" })), 5);

        let pass = tokio::spawn({
            let state = state.clone();
            async move { reconcile(&state).await }
        });
        tokio::time::sleep(Duration::from_millis(500)).await;
        state.session().commit(Session {
            account_id: Some(AccountId::new("other")),
            is_anonymous: false,
            email: None,
        });
        let report = pass.await.unwrap();

        assert_eq!(report.account_id, Some(AccountId::new("acct")));
        assert_eq!(report.deferred, vec!["from-old", "mine"]);
        assert!(report.pulled.is_empty());
        assert!(report.pushed.is_empty());
        assert_eq!(state.progress().get("from-old"), None);
        assert!(mirror.writes().is_empty());
    }

    #[tokio::test]
    async fn per_slug_failures_do_not_abort_the_pass() {
        let mirror = MemoryMirror::new();
        mirror.fail_writes_for("bad");
        let state = signed_in_state(&mirror, SyncConfig::default()).await;
        state.progress().set_at("bad", data(json!({})), 1);
        state.progress().set_at("good", data(json!({})), 1);

        let report = reconcile(&state).await;
        assert_eq!(report.pushed, vec!["good"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].slug, "bad");
    }

    #[tokio::test]
    async fn no_session_skips_without_remote_traffic() {
        let mirror = MemoryMirror::new();
        let state = AppState::new(SyncConfig::default(), LocalKv::in_memory(), None);
        state.install_mirror(Arc::new(mirror.clone())).await;
        state.progress().set("snake", data(json!({ "len": 2 })));

        let report = reconcile(&state).await;
        assert_eq!(report.skipped, Some(SkipReason::NoSession));
        assert_eq!(mirror.read_count(), 0);
        assert!(mirror.writes().is_empty());
    }

    #[tokio::test]
    async fn failed_remote_read_skips_the_pass() {
        let mirror = MemoryMirror::new();
        mirror.set_fail_reads(true);
        let state = signed_in_state(&mirror, SyncConfig::default()).await;
        state.progress().set("snake", data(json!({ "len": 2 })));

        let report = reconcile(&state).await;
        assert!(matches!(report.skipped, Some(SkipReason::RemoteReadFailed { .. })));
        assert!(mirror.writes().is_empty());
    }

    #[tokio::test]
    async fn exhausted_budget_defers_remaining_slugs() {
        let mirror = MemoryMirror::new();
        let config = SyncConfig {
            reconcile_budget: Duration::ZERO,
            ..SyncConfig::default()
        };
        let state = signed_in_state(&mirror, config).await;
        state.progress().set("a", data(json!({})));
        state.progress().set("b", data(json!({})));

        let report = reconcile(&state).await;
        assert_eq!(report.skipped, None);
        assert_eq!(report.deferred, vec!["a", "b"]);
        assert!(mirror.writes().is_empty());
    }
}
