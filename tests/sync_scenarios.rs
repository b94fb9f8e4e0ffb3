use std::{sync::Arc, time::Duration};

use serde_json::{Value, json};

use playvex_sync::{
    auth::{MemoryAuthProvider, OAuthProvider},
    config::SyncConfig,
    dao::{
        kv::LocalKv,
        mirror::memory::MemoryMirror,
        models::{AccountId, ProgressData, RemoteRecord},
    },
    services::{
        account_service::{self, SignInOutcome},
        progress_service,
        reconciler::{self, Decision},
    },
    state::{AppState, SharedState},
};

fn data(value: Value) -> ProgressData {
    value.as_object().cloned().unwrap()
}

fn remote(slug: &str, value: Value, updated_at: i64) -> RemoteRecord {
    RemoteRecord {
        slug: slug.into(),
        data: data(value),
        updated_at,
    }
}

async fn engine() -> (SharedState, MemoryAuthProvider, MemoryMirror) {
    let auth = MemoryAuthProvider::new();
    let mirror = MemoryMirror::new();
    let state = AppState::new(
        SyncConfig::default(),
        LocalKv::in_memory(),
        Some(Arc::new(auth.clone())),
    );
    state.install_mirror(Arc::new(mirror.clone())).await;
    (state, auth, mirror)
}

fn session_id(state: &SharedState) -> AccountId {
    state.session().account_id().unwrap()
}

#[tokio::test(start_paused = true)]
async fn rapid_progress_writes_reach_the_mirror_once() {
    let (state, _, mirror) = engine().await;
    account_service::ensure_ready(&state).await.unwrap();
    let account = session_id(&state);

    for level in 1..=10 {
        progress_service::merge(&state, "aim-pop", json!({ "level": level })).unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    let writes: Vec<_> = mirror
        .writes()
        .into_iter()
        .filter(|(_, record)| record.slug == "aim-pop")
        .collect();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].0, account);
    assert_eq!(writes[0].1.data, data(json!({ "level": 10 })));
    assert_eq!(
        writes[0].1.updated_at,
        state.progress().record("aim-pop").unwrap().updated_at
    );
}

#[tokio::test(start_paused = true)]
async fn local_only_mode_never_touches_the_mirror() {
    let (state, auth, mirror) = engine().await;
    auth.set_anonymous_enabled(false);
    account_service::ensure_ready(&state).await.unwrap();

    progress_service::set(&state, "snake", json!({ "len": 3 })).unwrap();
    tokio::time::sleep(Duration::from_secs(2)).await;
    reconciler::reconcile(&state).await;

    assert!(mirror.writes().is_empty());
    assert_eq!(mirror.read_count(), 0);
    assert_eq!(progress_service::get(&state, "snake"), Some(data(json!({ "len": 3 }))));
}

#[tokio::test(start_paused = true)]
async fn upgrading_an_anonymous_account_keeps_its_id_and_remote_data() {
    let (state, auth, mirror) = engine().await;
    auth.set_google_identity("ada@example.com");
    account_service::ensure_ready(&state).await.unwrap();
    let anonymous = session_id(&state);

    progress_service::set(&state, "snake", json!({ "len": 12 })).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(mirror.record(&anonymous, "snake").is_some());

    let outcome = account_service::sign_in_with_provider(&state, OAuthProvider::Google)
        .await
        .unwrap();
    let SignInOutcome::Completed(session) = outcome else {
        panic!("expected a completed sign-in, got {outcome:?}");
    };
    assert_eq!(session.account_id.as_ref(), Some(&anonymous));
    assert!(!session.is_anonymous);
    assert_eq!(session.email.as_deref(), Some("ada@example.com"));

    assert_eq!(
        mirror.record(&anonymous, "snake").unwrap().data,
        data(json!({ "len": 12 }))
    );
    assert_eq!(progress_service::get(&state, "snake"), Some(data(json!({ "len": 12 }))));
}

#[tokio::test]
async fn credential_in_use_signs_into_the_owner_and_merges_with_it() {
    let (state, auth, mirror) = engine().await;
    let owner = auth.seed_google_account("ada@example.com");
    auth.set_google_identity("ada@example.com");
    mirror.seed(&owner, remote("aim-pop", json!({ "best": 40 }), 1_000));

    account_service::ensure_ready(&state).await.unwrap();
    let anonymous = session_id(&state);
    progress_service::set(&state, "snake", json!({ "len": 7 })).unwrap();

    let outcome = account_service::sign_in_with_provider(&state, OAuthProvider::Google)
        .await
        .unwrap();
    assert!(matches!(outcome, SignInOutcome::Completed(_)));
    assert_eq!(session_id(&state), owner);
    assert_ne!(owner, anonymous);

    // Pulled from the owner's account, and local progress pushed to it.
    assert_eq!(progress_service::get(&state, "aim-pop"), Some(data(json!({ "best": 40 }))));
    assert_eq!(
        mirror.record(&owner, "snake").unwrap().data,
        data(json!({ "len": 7 }))
    );
}

#[tokio::test]
async fn reconciliation_keeps_the_newest_copy_on_both_sides() {
    let (state, auth, mirror) = engine().await;
    let owner = auth.seed_email_account("ada@example.com", "pw");
    account_service::ensure_ready(&state).await.unwrap();

    state.progress().set_at("a", data(json!({ "v": "local" })), 300);
    state.progress().set_at("b", data(json!({ "v": "local" })), 100);
    state.progress().set_at("tie", data(json!({ "v": "local" })), 200);
    mirror.seed(&owner, remote("a", json!({ "v": "remote" }), 200));
    mirror.seed(&owner, remote("b", json!({ "v": "remote" }), 400));
    mirror.seed(&owner, remote("tie", json!({ "v": "remote" }), 200));

    account_service::sign_in_with_email(&state, "ada@example.com", "pw")
        .await
        .unwrap();

    for slug in ["a", "b", "tie"] {
        let local = state.progress().record(slug).unwrap();
        let remote = mirror.record(&owner, slug).unwrap();
        assert_eq!(local.updated_at, remote.updated_at, "timestamps of `{slug}`");
        assert_eq!(
            reconciler::decide(Some(&local), Some(&remote)),
            Decision::Unchanged
        );
    }
    assert_eq!(state.progress().record("a").unwrap().updated_at, 300);
    assert_eq!(state.progress().get("b"), Some(data(json!({ "v": "remote" }))));
    // Ties keep both sides as they were.
    assert_eq!(state.progress().get("tie"), Some(data(json!({ "v": "local" }))));
    assert_eq!(
        mirror.record(&owner, "tie").unwrap().data,
        data(json!({ "v": "remote" }))
    );

    let second = reconciler::reconcile(&state).await;
    assert!(second.pulled.is_empty());
    assert!(second.pushed.is_empty());
}

#[tokio::test]
async fn merging_nothing_keeps_data_and_moves_the_clock() {
    let (state, _, _) = engine().await;
    let first = progress_service::set(&state, "snake", json!({ "len": 5 })).unwrap();
    let merged = progress_service::merge(&state, "snake", json!({})).unwrap();
    let again = progress_service::merge(&state, "snake", json!({})).unwrap();

    assert_eq!(merged.data, first.data);
    assert_eq!(again.data, first.data);
    assert!(first.updated_at < merged.updated_at);
    assert!(merged.updated_at < again.updated_at);
}

#[tokio::test]
async fn remote_documents_keep_fields_the_engine_never_sends() {
    let (state, _, mirror) = engine().await;
    account_service::ensure_ready(&state).await.unwrap();
    let account = session_id(&state);
    let mut document = serde_json::Map::new();
    document.insert("data".into(), json!({ "len": 1 }));
    document.insert("updatedAt".into(), json!(1));
    document.insert("platform".into(), json!("web"));
    mirror.seed_raw(&account, "snake", document);

    progress_service::set(&state, "snake", json!({ "len": 2 })).unwrap();
    reconciler::reconcile(&state).await;

    let stored = mirror.document(&account, "snake").unwrap();
    assert_eq!(stored.get("platform"), Some(&json!("web")));
    assert_eq!(stored.get("data"), Some(&json!({ "len": 2 })));
}
