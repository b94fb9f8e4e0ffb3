use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Mutex,
};

use serde_json::{Map, Value};
use tracing::debug;

use crate::dao::{
    kv::LocalKv,
    models::{ProgressData, ProgressRecord, normalize_slug, now_millis},
};

/// Storage key of the persisted progress map.
pub const PROGRESS_KEY: &str = "playvex_progress_v1";

/// Device-local progress keyed by game slug.
///
/// Every mutation rewrites the whole persisted map; the internal lock keeps the
/// read-modify-write from interleaving with another caller.
pub struct ProgressStore {
    kv: LocalKv,
    lock: Mutex<()>,
}

impl ProgressStore {
    /// Build a store persisting through `kv`.
    pub fn new(kv: LocalKv) -> Self {
        Self {
            kv,
            lock: Mutex::new(()),
        }
    }

    /// Copy of the data stored for `slug`.
    pub fn get(&self, slug: &str) -> Option<ProgressData> {
        self.record(slug).map(|record| record.data)
    }

    /// Copy of the full record (data and timestamp) stored for `slug`.
    pub fn record(&self, slug: &str) -> Option<ProgressRecord> {
        let slug = normalize_slug(slug)?;
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.load().remove(&slug)
    }

    /// Replace the record for `slug`, stamping it with a fresh local timestamp.
    ///
    /// Returns the normalized slug when the write was accepted.
    pub fn set(&self, slug: &str, data: ProgressData) -> Option<String> {
        self.write(slug, |previous| {
            let updated_at = next_local_timestamp(previous);
            Some(ProgressRecord { data, updated_at })
        })
    }

    /// Replace the record for `slug` keeping the caller's timestamp (used when pulling remote copies).
    pub fn set_at(&self, slug: &str, data: ProgressData, updated_at: i64) -> Option<String> {
        self.write(slug, |_| Some(ProgressRecord { data, updated_at }))
    }

    /// Shallow-merge `patch` into the current data; behaves like [`set`](Self::set) when absent.
    pub fn merge(&self, slug: &str, patch: ProgressData) -> Option<String> {
        self.write(slug, |previous| {
            let mut data = previous.map(|record| record.data.clone()).unwrap_or_default();
            data.extend(patch);
            let updated_at = next_local_timestamp(previous);
            Some(ProgressRecord { data, updated_at })
        })
    }

    /// Every slug with a stored record.
    pub fn list_slugs(&self) -> BTreeSet<String> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.load().into_keys().collect()
    }

    /// Snapshot of every stored record.
    pub fn records(&self) -> BTreeMap<String, ProgressRecord> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.load()
    }

    fn write<F>(&self, slug: &str, update: F) -> Option<String>
    where
        F: FnOnce(Option<&ProgressRecord>) -> Option<ProgressRecord>,
    {
        let Some(slug) = normalize_slug(slug) else {
            debug!("ignoring progress write with blank slug");
            return None;
        };

        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut records = self.load();
        let next = update(records.get(&slug))?;
        records.insert(slug.clone(), next);
        self.save(&records);
        Some(slug)
    }

    fn load(&self) -> BTreeMap<String, ProgressRecord> {
        let Some(raw) = self.kv.read_json::<Map<String, Value>>(PROGRESS_KEY) else {
            return BTreeMap::new();
        };

        raw.into_iter()
            .filter_map(|(slug, entry)| {
                let slug = normalize_slug(&slug)?;
                ProgressRecord::from_value(&entry).map(|record| (slug, record))
            })
            .collect()
    }

    fn save(&self, records: &BTreeMap<String, ProgressRecord>) {
        self.kv.write_json(PROGRESS_KEY, records);
    }
}

/// Wall-clock now, bumped past the previous stamp so local writes always advance.
///
/// A stamp already at `i64::MAX` stays there rather than wrapping.
fn next_local_timestamp(previous: Option<&ProgressRecord>) -> i64 {
    let now = now_millis();
    match previous {
        Some(record) if record.updated_at >= now => record.updated_at.saturating_add(1),
        _ => now,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::dao::kv::MemoryKv;

    fn data(value: Value) -> ProgressData {
        value.as_object().cloned().unwrap()
    }

    fn store() -> ProgressStore {
        ProgressStore::new(LocalKv::in_memory())
    }

    #[test]
    fn set_then_get_round_trips() {
        let store = store();
        store.set("aim-pop", data(json!({ "score": 5 })));
        assert_eq!(store.get("aim-pop"), Some(data(json!({ "score": 5 }))));
    }

    #[test]
    fn merge_keeps_existing_keys() {
        let store = store();
        store.set_at("aim-pop", data(json!({ "score": 5 })), 100);
        store.merge("aim-pop", data(json!({ "best": 5 })));
        assert_eq!(
            store.get("aim-pop"),
            Some(data(json!({ "score": 5, "best": 5 })))
        );
    }

    #[test]
    fn empty_merge_only_advances_timestamp() {
        let store = store();
        store.set_at("lane-sprint", data(json!({ "best": 9 })), 100);
        store.merge("lane-sprint", ProgressData::new());

        let record = store.record("lane-sprint").unwrap();
        assert_eq!(record.data, data(json!({ "best": 9 })));
        assert!(record.updated_at > 100);
    }

    #[test]
    fn local_timestamps_are_monotonic_even_with_future_stamps() {
        let store = store();
        let future = now_millis() + 60_000;
        store.set_at("tap", data(json!({})), future);
        store.merge("tap", data(json!({ "x": 1 })));
        assert_eq!(store.record("tap").unwrap().updated_at, future + 1);
    }

    #[test]
    fn a_maximal_stamp_saturates_instead_of_wrapping() {
        let store = store();
        store.set_at("g", data(json!({ "v": 1 })), i64::MAX);
        store.merge("g", data(json!({ "v": 2 })));

        let record = store.record("g").unwrap();
        assert_eq!(record.data, data(json!({ "v": 2 })));
        assert_eq!(record.updated_at, i64::MAX);
    }

    #[test]
    fn merge_without_record_behaves_like_set() {
        let store = store();
        store.merge("fresh", data(json!({ "best": 1 })));
        assert_eq!(store.get("fresh"), Some(data(json!({ "best": 1 }))));
    }

    #[test]
    fn blank_slugs_are_ignored() {
        let store = store();
        assert!(store.set("   ", data(json!({ "x": 1 }))).is_none());
        assert!(store.list_slugs().is_empty());
    }

    #[test]
    fn slugs_are_trimmed() {
        let store = store();
        assert_eq!(
            store.set("  neon-rail-3d ", data(json!({}))),
            Some("neon-rail-3d".to_string())
        );
        assert!(store.get("neon-rail-3d").is_some());
    }

    #[test]
    fn returned_data_is_a_copy() {
        let store = store();
        store.set("copy", data(json!({ "n": 1 })));
        let mut copy = store.get("copy").unwrap();
        copy.insert("n".into(), json!(99));
        assert_eq!(store.get("copy"), Some(data(json!({ "n": 1 }))));
    }

    #[test]
    fn malformed_entries_are_skipped_on_load() {
        let backend = Arc::new(MemoryKv::new());
        backend.insert_raw(
            PROGRESS_KEY,
            r#"{"ok":{"data":{"best":2},"updatedAt":7},"bad":{"data":3},"   ":{"data":{}}}"#,
        );
        let store = ProgressStore::new(LocalKv::new(backend));
        assert_eq!(store.list_slugs(), BTreeSet::from(["ok".to_string()]));
        assert_eq!(store.record("ok").unwrap().updated_at, 7);
    }

    #[test]
    fn storage_failure_never_panics() {
        let backend = Arc::new(MemoryKv::new());
        let store = ProgressStore::new(LocalKv::new(backend.clone()));
        backend.set_disabled(true);
        store.set("x", data(json!({ "a": 1 })));
        assert!(store.get("x").is_none());
    }
}
