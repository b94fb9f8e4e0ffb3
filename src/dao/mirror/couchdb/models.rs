use serde::Deserialize;
use serde_json::{Map, Value};

use crate::dao::models::{AccountId, ProgressRecord, RemoteRecord};

pub const PROGRESS_PREFIX: &str = "progress::";
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    pub id: String,
    #[serde(default)]
    pub doc: Option<Value>,
}

/// Prefix shared by every progress document of `account`.
pub fn account_prefix(account: &AccountId) -> String {
    format!("{PROGRESS_PREFIX}{account}::")
}

/// Document id for one game of `account`.
pub fn progress_doc_id(account: &AccountId, slug: &str) -> String {
    format!("{}{slug}", account_prefix(account))
}

/// Overlay the record's fields onto an existing document body, keeping `_rev` and unknown fields.
pub fn merge_into(
    existing: Option<Map<String, Value>>,
    doc_id: &str,
    account: &AccountId,
    record: &RemoteRecord,
) -> Map<String, Value> {
    let mut document = existing.unwrap_or_default();
    document.insert("_id".into(), Value::String(doc_id.to_owned()));
    document.insert("account_id".into(), Value::String(account.to_string()));
    document.insert("slug".into(), Value::String(record.slug.clone()));
    document.insert("data".into(), Value::Object(record.data.clone()));
    document.insert("updatedAt".into(), Value::from(record.updated_at));
    document
}

/// Decode one `_all_docs` row into a remote record; `None` when the body is unusable.
pub fn decode_row(prefix: &str, row: AllDocsRow) -> Option<RemoteRecord> {
    let doc = row.doc?;
    let slug = doc
        .get("slug")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .or_else(|| row.id.strip_prefix(prefix).map(str::to_owned))?;
    let record = ProgressRecord::from_value(&doc)?;
    Some(RemoteRecord::from_local(slug, record))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn merge_keeps_revision_and_foreign_fields() {
        let account = AccountId::new("u1");
        let existing = json!({ "_rev": "3-abc", "device": "phone", "data": { "old": 1 } })
            .as_object()
            .cloned();
        let record = RemoteRecord {
            slug: "aim-pop".into(),
            data: json!({ "best": 9 }).as_object().cloned().unwrap(),
            updated_at: 42,
        };

        let doc_id = progress_doc_id(&account, "aim-pop");
        let merged = merge_into(existing, &doc_id, &account, &record);
        assert_eq!(merged["_rev"], json!("3-abc"));
        assert_eq!(merged["device"], json!("phone"));
        assert_eq!(merged["data"], json!({ "best": 9 }));
        assert_eq!(merged["updatedAt"], json!(42));
        assert_eq!(merged["_id"], json!("progress::u1::aim-pop"));
    }

    #[test]
    fn rows_fall_back_to_id_suffix_and_tolerate_missing_timestamp() {
        let prefix = account_prefix(&AccountId::new("u1"));
        let row = AllDocsRow {
            id: "progress::u1::snake".into(),
            doc: Some(json!({ "data": { "len": 4 } })),
        };
        let record = decode_row(&prefix, row).unwrap();
        assert_eq!(record.slug, "snake");
        assert_eq!(record.updated_at, 0);

        let broken = AllDocsRow {
            id: "progress::u1::bad".into(),
            doc: Some(json!({ "data": [1, 2] })),
        };
        assert!(decode_row(&prefix, broken).is_none());
    }
}
