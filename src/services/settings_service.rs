//! Device preferences and the visual mode derived from them.

use serde_json::{Map, Value};

use crate::{
    dao::settings_store::{SettingChange, VisualMode},
    state::{SharedState, SyncEvent},
};

/// Stored preference for `key`, or `fallback`.
pub fn get(state: &SharedState, key: &str, fallback: Value) -> Value {
    state.settings().get(key, fallback)
}

pub fn all(state: &SharedState) -> Map<String, Value> {
    state.settings().all()
}

/// Persist a preference and fan the change out to event subscribers.
pub fn set(state: &SharedState, key: &str, value: Value) -> bool {
    if !state.settings().set(key, value.clone()) {
        return false;
    }
    state.events().publish(SyncEvent::SettingChanged(SettingChange {
        key: key.trim().to_owned(),
        value,
    }));
    true
}

/// Visual mode implied by the current preferences.
pub fn visual_mode(state: &SharedState) -> VisualMode {
    *state.settings().visual_mode().borrow()
}
