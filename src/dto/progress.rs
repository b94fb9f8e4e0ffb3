use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use validator::Validate;

use crate::dao::models::ProgressRecord;
use crate::dto::{format_epoch_millis, validation::validate_object};

/// One game's stored progress.
#[derive(Debug, Serialize, ToSchema)]
pub struct ProgressEntry {
    pub slug: String,
    /// Game-defined payload.
    #[schema(value_type = Object)]
    pub data: Value,
    /// Client clock of the last write, epoch milliseconds.
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
    /// Same instant rendered as RFC 3339.
    pub updated_at_iso: String,
}

impl ProgressEntry {
    pub fn new(slug: impl Into<String>, record: ProgressRecord) -> Self {
        Self {
            slug: slug.into(),
            data: Value::Object(record.data),
            updated_at: record.updated_at,
            updated_at_iso: format_epoch_millis(record.updated_at),
        }
    }
}

/// Every stored slug, sorted.
#[derive(Debug, Serialize, ToSchema)]
pub struct ProgressListResponse {
    pub entries: Vec<ProgressEntry>,
}

/// Body of `PUT` (replace) and `PATCH` (shallow merge) on a progress slug.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct ProgressWriteRequest {
    #[validate(custom(function = "validate_object"))]
    #[schema(value_type = Object)]
    pub data: Value,
}

/// Outcome of a progress mutation. Rejected input is reported, not raised.
#[derive(Debug, Serialize, ToSchema)]
pub struct ProgressWriteResponse {
    pub applied: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<ProgressEntry>,
    /// Whether a remote write is now waiting for its quiet window.
    pub pending_write: bool,
}

impl ProgressWriteResponse {
    /// Response for input that was not applied.
    pub fn rejected() -> Self {
        Self {
            applied: false,
            entry: None,
            pending_write: false,
        }
    }
}

/// Recently played slugs, newest first.
#[derive(Debug, Serialize, ToSchema)]
pub struct RecentResponse {
    pub slugs: Vec<String>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn non_object_payloads_fail_validation() {
        let request = ProgressWriteRequest { data: json!([1, 2]) };
        assert!(request.validate().is_err());

        let request = ProgressWriteRequest { data: json!({ "best": 2 }) };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn entries_serialize_with_camel_case_timestamp() {
        let record = ProgressRecord {
            data: json!({ "best": 2 }).as_object().cloned().unwrap(),
            updated_at: 0,
        };
        let value = serde_json::to_value(ProgressEntry::new("snake", record)).unwrap();
        assert_eq!(
            value,
            json!({
                "slug": "snake",
                "data": { "best": 2 },
                "updatedAt": 0,
                "updated_at_iso": "1970-01-01T00:00:00Z"
            })
        );
    }
}
