//! Game-facing progress operations: local write first, remote write debounced.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::debug;

use crate::{
    dao::models::{ProgressData, ProgressRecord},
    services::write_scheduler,
    state::SharedState,
};

/// Copy of the stored data for `slug`.
pub fn get(state: &SharedState, slug: &str) -> Option<ProgressData> {
    state.progress().get(slug)
}

/// Stored record for `slug`, including its local timestamp.
pub fn record(state: &SharedState, slug: &str) -> Option<ProgressRecord> {
    state.progress().record(slug)
}

pub fn list(state: &SharedState) -> BTreeMap<String, ProgressRecord> {
    state.progress().records()
}

/// Replace the progress for `slug` and arm its remote write.
///
/// Non-object payloads and blank slugs are ignored; the return value tells whether the
/// write was applied.
pub fn set(state: &SharedState, slug: &str, data: Value) -> Option<ProgressRecord> {
    let Value::Object(data) = data else {
        debug!(slug, "ignoring progress write with non-object data");
        return None;
    };
    let slug = state.progress().set(slug, data)?;
    write_scheduler::schedule(state, &slug);
    state.progress().record(&slug)
}

/// Shallow-merge `patch` into the progress for `slug` and arm its remote write.
pub fn merge(state: &SharedState, slug: &str, patch: Value) -> Option<ProgressRecord> {
    let Value::Object(patch) = patch else {
        debug!(slug, "ignoring progress merge with non-object patch");
        return None;
    };
    let slug = state.progress().merge(slug, patch)?;
    write_scheduler::schedule(state, &slug);
    state.progress().record(&slug)
}

/// Remember `slug` as just played.
pub fn mark_played(state: &SharedState, slug: &str) -> Vec<String> {
    state.recent().push(slug)
}

/// Recently played slugs, newest first.
pub fn recent(state: &SharedState) -> Vec<String> {
    state.recent().list()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{config::SyncConfig, dao::kv::LocalKv, state::AppState};

    fn state() -> SharedState {
        AppState::new(SyncConfig::default(), LocalKv::in_memory(), None)
    }

    #[tokio::test]
    async fn set_then_merge_arms_a_single_write() {
        let state = state();
        set(&state, "aim-pop", json!({ "best": 3, "level": 1 })).unwrap();
        let merged = merge(&state, " aim-pop ", json!({ "level": 2 })).unwrap();

        assert_eq!(merged.data, json!({ "best": 3, "level": 2 }).as_object().cloned().unwrap());
        assert_eq!(state.writes().pending_slugs(), vec!["aim-pop".to_string()]);
    }

    #[tokio::test]
    async fn invalid_writes_are_ignored() {
        let state = state();
        assert!(set(&state, "snake", json!([1, 2, 3])).is_none());
        assert!(merge(&state, "snake", json!("oops")).is_none());
        assert!(set(&state, "   ", json!({})).is_none());

        assert!(list(&state).is_empty());
        assert!(state.writes().pending_slugs().is_empty());
    }

    #[tokio::test]
    async fn empty_merge_keeps_data_and_advances_the_timestamp() {
        let state = state();
        let first = set(&state, "snake", json!({ "len": 3 })).unwrap();
        let merged = merge(&state, "snake", json!({})).unwrap();

        assert_eq!(merged.data, first.data);
        assert!(merged.updated_at > first.updated_at);
    }

    #[test]
    fn recent_list_tracks_plays() {
        let state = state();
        mark_played(&state, "snake");
        mark_played(&state, "aim-pop");
        assert_eq!(recent(&state), vec!["aim-pop", "snake"]);
    }
}
