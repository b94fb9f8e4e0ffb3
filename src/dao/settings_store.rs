use std::sync::Mutex;

use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{broadcast, watch};
use utoipa::ToSchema;

use crate::dao::kv::LocalKv;

/// Storage key of the persisted settings map.
pub const SETTINGS_KEY: &str = "playvex_settings_v1";
/// Reserved preference toggling the reduced-motion visual mode.
pub const REDUCED_MOTION_KEY: &str = "reducedMotion";

const CHANGE_CHANNEL_CAPACITY: usize = 32;

/// Notification emitted after a preference was stored.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct SettingChange {
    pub key: String,
    pub value: Value,
}

/// Visual mode derived from the reduced-motion preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum VisualMode {
    Full,
    Reduced,
}

impl VisualMode {
    fn from_setting(value: Option<&Value>) -> Self {
        match value {
            Some(Value::Bool(true)) => VisualMode::Reduced,
            _ => VisualMode::Full,
        }
    }
}

/// User preferences persisted on this device only.
pub struct SettingsStore {
    kv: LocalKv,
    lock: Mutex<()>,
    changes: broadcast::Sender<SettingChange>,
    visual_mode: watch::Sender<VisualMode>,
}

impl SettingsStore {
    /// Build a store persisting through `kv`, seeding the visual mode from stored preferences.
    pub fn new(kv: LocalKv) -> Self {
        let (changes, _rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        let stored = kv.read_json::<Map<String, Value>>(SETTINGS_KEY);
        let mode = VisualMode::from_setting(stored.as_ref().and_then(|map| map.get(REDUCED_MOTION_KEY)));
        let (visual_mode, _rx) = watch::channel(mode);
        Self {
            kv,
            lock: Mutex::new(()),
            changes,
            visual_mode,
        }
    }

    /// Stored value for `key`, or `fallback` when unset.
    pub fn get(&self, key: &str, fallback: Value) -> Value {
        self.all().remove(key).unwrap_or(fallback)
    }

    /// Persist `value` under `key` and notify observers. Blank keys are ignored.
    pub fn set(&self, key: &str, value: Value) -> bool {
        let key = key.trim();
        if key.is_empty() {
            return false;
        }

        {
            let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            let mut settings = self.load();
            settings.insert(key.to_string(), value.clone());
            self.kv.write_json(SETTINGS_KEY, &settings);
        }

        if key == REDUCED_MOTION_KEY {
            self.visual_mode
                .send_replace(VisualMode::from_setting(Some(&value)));
        }

        let _ = self.changes.send(SettingChange {
            key: key.to_string(),
            value,
        });
        true
    }

    /// Copy of every stored preference.
    pub fn all(&self) -> Map<String, Value> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.load()
    }

    /// Receive every subsequent [`SettingChange`].
    pub fn subscribe(&self) -> broadcast::Receiver<SettingChange> {
        self.changes.subscribe()
    }

    /// Observe the visual mode; updated synchronously by `set` on [`REDUCED_MOTION_KEY`].
    pub fn visual_mode(&self) -> watch::Receiver<VisualMode> {
        self.visual_mode.subscribe()
    }

    fn load(&self) -> Map<String, Value> {
        self.kv.read_json(SETTINGS_KEY).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn get_returns_fallback_when_unset() {
        let store = SettingsStore::new(LocalKv::in_memory());
        assert_eq!(store.get("volume", json!(0.5)), json!(0.5));
        store.set("volume", json!(0.8));
        assert_eq!(store.get("volume", json!(0.5)), json!(0.8));
    }

    #[test]
    fn set_notifies_subscribers() {
        let store = SettingsStore::new(LocalKv::in_memory());
        let mut rx = store.subscribe();
        store.set("theme", json!("dark"));
        let change = rx.try_recv().unwrap();
        assert_eq!(change.key, "theme");
        assert_eq!(change.value, json!("dark"));
    }

    #[test]
    fn reduced_motion_flips_visual_mode_immediately() {
        let store = SettingsStore::new(LocalKv::in_memory());
        let mode = store.visual_mode();
        assert_eq!(*mode.borrow(), VisualMode::Full);

        store.set(REDUCED_MOTION_KEY, json!(true));
        assert_eq!(*mode.borrow(), VisualMode::Reduced);

        store.set(REDUCED_MOTION_KEY, json!(false));
        assert_eq!(*mode.borrow(), VisualMode::Full);
    }

    #[test]
    fn visual_mode_is_restored_from_storage() {
        let kv = LocalKv::in_memory();
        SettingsStore::new(kv.clone()).set(REDUCED_MOTION_KEY, json!(true));
        let reopened = SettingsStore::new(kv);
        assert_eq!(*reopened.visual_mode().borrow(), VisualMode::Reduced);
    }

    #[test]
    fn blank_keys_are_ignored() {
        let store = SettingsStore::new(LocalKv::in_memory());
        assert!(!store.set("  ", json!(1)));
        assert!(store.all().is_empty());
    }
}
