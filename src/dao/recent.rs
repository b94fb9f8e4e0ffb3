use std::sync::Mutex;

use serde_json::Value;

use crate::dao::{kv::LocalKv, models::normalize_slug};

/// Storage key of the persisted recently-played list.
pub const RECENT_KEY: &str = "playvex_recent_v1";
/// Maximum number of slugs retained.
pub const RECENT_LIMIT: usize = 8;

/// Most-recently-played games, newest first.
pub struct RecentList {
    kv: LocalKv,
    lock: Mutex<()>,
}

impl RecentList {
    /// List persisted under the recent-games key of `kv`.
    pub fn new(kv: LocalKv) -> Self {
        Self {
            kv,
            lock: Mutex::new(()),
        }
    }

    /// Current list, dropping blank or non-string entries.
    pub fn list(&self) -> Vec<String> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.load()
    }

    /// Move `slug` to the front, de-duplicating and capping the list.
    pub fn push(&self, slug: &str) -> Vec<String> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let current = self.load();
        let Some(slug) = normalize_slug(slug) else {
            return current;
        };

        let next: Vec<String> = std::iter::once(slug.clone())
            .chain(current.into_iter().filter(|existing| *existing != slug))
            .take(RECENT_LIMIT)
            .collect();
        self.kv.write_json(RECENT_KEY, &next);
        next
    }

    /// Whether `slug` is currently listed.
    pub fn contains(&self, slug: &str) -> bool {
        self.list().iter().any(|existing| existing == slug)
    }

    fn load(&self) -> Vec<String> {
        let Some(Value::Array(items)) = self.kv.read_json::<Value>(RECENT_KEY) else {
            return Vec::new();
        };
        items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(slug) if !slug.trim().is_empty() => Some(slug),
                _ => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::dao::kv::MemoryKv;

    #[test]
    fn push_moves_existing_slug_to_front() {
        let recent = RecentList::new(LocalKv::in_memory());
        recent.push("a");
        recent.push("b");
        assert_eq!(recent.push("a"), vec!["a", "b"]);
    }

    #[test]
    fn list_is_capped() {
        let recent = RecentList::new(LocalKv::in_memory());
        for i in 0..12 {
            recent.push(&format!("game-{i}"));
        }
        let list = recent.list();
        assert_eq!(list.len(), RECENT_LIMIT);
        assert_eq!(list[0], "game-11");
        assert_eq!(list[RECENT_LIMIT - 1], "game-4");
    }

    #[test]
    fn junk_entries_are_dropped() {
        let backend = Arc::new(MemoryKv::new());
        backend.insert_raw(RECENT_KEY, r#"["a", 3, "  ", null, "b"]"#);
        let recent = RecentList::new(LocalKv::new(backend));
        assert_eq!(recent.list(), vec!["a", "b"]);
    }
}
