use std::{fmt, time::SystemTime};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;

/// Opaque per-game progress payload. Callers own its shape; the store only requires an object.
pub type ProgressData = Map<String, Value>;

/// Opaque identifier of an account at the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    /// Wrap a provider-issued account identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw identifier.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Current value of one game's progress on this device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Game-defined payload.
    pub data: ProgressData,
    /// Client clock (epoch millis) of the last write, used for last-writer-wins.
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
}

impl ProgressRecord {
    /// Decode a persisted entry, tolerating legacy or hand-edited blobs.
    ///
    /// Entries whose `data` is not an object are rejected; a missing or
    /// non-integer `updatedAt` reads as `0`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let entry = value.as_object()?;
        let data = entry.get("data")?.as_object()?.clone();
        let updated_at = entry
            .get("updatedAt")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        Some(Self { data, updated_at })
    }
}

/// Copy of a progress record held by the remote mirror for one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Game identifier, also the document key inside the account collection.
    pub slug: String,
    /// Game-defined payload.
    pub data: ProgressData,
    /// Client clock (epoch millis) of the write that produced this copy.
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
}

impl RemoteRecord {
    /// Build the remote copy of a local record.
    pub fn from_local(slug: impl Into<String>, record: ProgressRecord) -> Self {
        Self {
            slug: slug.into(),
            data: record.data,
            updated_at: record.updated_at,
        }
    }

    /// Split back into slug and local record form.
    pub fn into_local(self) -> (String, ProgressRecord) {
        (
            self.slug,
            ProgressRecord {
                data: self.data,
                updated_at: self.updated_at,
            },
        )
    }
}

/// Trim a caller-supplied slug, rejecting blank input.
pub fn normalize_slug(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_owned())
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn normalize_slug_trims_and_rejects_blank() {
        assert_eq!(normalize_slug("  aim-pop "), Some("aim-pop".to_string()));
        assert_eq!(normalize_slug("   "), None);
        assert_eq!(normalize_slug(""), None);
    }

    #[test]
    fn record_decoding_tolerates_missing_timestamp() {
        let record = ProgressRecord::from_value(&json!({ "data": { "best": 3 } })).unwrap();
        assert_eq!(record.updated_at, 0);
        assert_eq!(record.data.get("best"), Some(&json!(3)));
    }

    #[test]
    fn record_decoding_rejects_non_object_data() {
        assert!(ProgressRecord::from_value(&json!({ "data": [1, 2], "updatedAt": 5 })).is_none());
        assert!(ProgressRecord::from_value(&json!("garbage")).is_none());
    }

    #[test]
    fn record_serializes_with_camel_case_timestamp() {
        let record = ProgressRecord {
            data: ProgressData::new(),
            updated_at: 42,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value, json!({ "data": {}, "updatedAt": 42 }));
    }
}
