use mongodb::bson::{Bson, Document, doc};
use serde::Deserialize;
use serde_json::Value;

use crate::dao::models::{AccountId, ProgressData, ProgressRecord, RemoteRecord};

pub const SLUG_FIELD: &str = "slug";

pub fn record_filter(account: &AccountId, slug: &str) -> Document {
    doc! { "account_id": account.as_str(), "slug": slug }
}

pub fn account_filter(account: &AccountId) -> Document {
    doc! { "account_id": account.as_str() }
}

/// `$set` update touching only `data` and `updatedAt`.
pub fn merge_update(data: &ProgressData, updated_at: i64) -> Result<Document, serde_json::Error> {
    let data = Bson::deserialize(Value::Object(data.clone()))?;
    Ok(doc! { "$set": { "data": data, "updatedAt": updated_at } })
}

/// Decode a stored document, skipping it when `slug` or `data` is unusable.
pub fn decode_document(document: &Document) -> Option<RemoteRecord> {
    let slug = document.get_str(SLUG_FIELD).ok()?.to_owned();
    let body = serde_json::to_value(document).ok()?;
    let record = ProgressRecord::from_value(&body)?;
    Some(RemoteRecord::from_local(slug, record))
}
