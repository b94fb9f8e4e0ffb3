//! In-process remote mirror used for local development and tests.

use std::{
    collections::BTreeMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use dashmap::{DashMap, DashSet};
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use tracing::warn;

use crate::dao::{
    mirror::RemoteMirror,
    models::{AccountId, ProgressRecord, RemoteRecord},
    storage::{StorageError, StorageResult},
};

type Document = Map<String, Value>;

#[derive(Default)]
struct MemoryInner {
    accounts: DashMap<AccountId, BTreeMap<String, Document>>,
    reads: AtomicUsize,
    writes: Mutex<Vec<(AccountId, RemoteRecord)>>,
    fail_reads: AtomicBool,
    failing_slugs: DashSet<String>,
    offline: AtomicBool,
    next_read_delay: Mutex<Option<Duration>>,
    next_write_delay: Mutex<Option<Duration>>,
}

/// Remote mirror held in memory, with failure injection and traffic accounting.
#[derive(Clone, Default)]
pub struct MemoryMirror {
    inner: Arc<MemoryInner>,
}

impl MemoryMirror {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a document directly, bypassing traffic accounting.
    pub fn seed(&self, account: &AccountId, record: RemoteRecord) {
        let mut docs = self.inner.accounts.entry(account.clone()).or_default();
        docs.insert(record.slug.clone(), to_document(&record));
    }

    /// Store a raw document (possibly malformed) for `slug`.
    pub fn seed_raw(&self, account: &AccountId, slug: &str, document: Document) {
        let mut docs = self.inner.accounts.entry(account.clone()).or_default();
        docs.insert(slug.to_string(), document);
    }

    /// Raw document currently stored for `slug`.
    pub fn document(&self, account: &AccountId, slug: &str) -> Option<Document> {
        self.inner
            .accounts
            .get(account)
            .and_then(|docs| docs.get(slug).cloned())
    }

    /// Decoded record currently stored for `slug`.
    pub fn record(&self, account: &AccountId, slug: &str) -> Option<RemoteRecord> {
        let document = self.document(account, slug)?;
        decode(slug, &document)
    }

    /// Number of `fetch_all` calls served so far.
    pub fn read_count(&self) -> usize {
        self.inner.reads.load(Ordering::SeqCst)
    }

    /// Every successful upsert, in order.
    pub fn writes(&self) -> Vec<(AccountId, RemoteRecord)> {
        self.lock_writes().clone()
    }

    /// Make `fetch_all` fail until reset.
    pub fn set_fail_reads(&self, fail: bool) {
        self.inner.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make upserts for `slug` fail.
    pub fn fail_writes_for(&self, slug: &str) {
        self.inner.failing_slugs.insert(slug.to_string());
    }

    /// Hold the next `fetch_all` for `delay` before it is served.
    pub fn delay_next_read(&self, delay: Duration) {
        *lock_delay(&self.inner.next_read_delay) = Some(delay);
    }

    /// Hold the next upsert for `delay` before it is applied.
    pub fn delay_next_write(&self, delay: Duration) {
        *lock_delay(&self.inner.next_write_delay) = Some(delay);
    }

    /// Simulate the whole backend being unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    fn lock_writes(&self) -> std::sync::MutexGuard<'_, Vec<(AccountId, RemoteRecord)>> {
        self.inner
            .writes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_online(&self) -> StorageResult<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StorageError::rejected("memory mirror is offline"));
        }
        Ok(())
    }

    fn fetch_all_now(&self, account: &AccountId) -> StorageResult<Vec<RemoteRecord>> {
        self.ensure_online()?;
        self.inner.reads.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::rejected(format!(
                "read of account `{account}` failed"
            )));
        }

        let Some(docs) = self.inner.accounts.get(account) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .iter()
            .filter_map(|(slug, document)| {
                let decoded = decode(slug, document);
                if decoded.is_none() {
                    warn!(%account, slug, "skipping malformed remote progress document");
                }
                decoded
            })
            .collect())
    }

    fn upsert_now(&self, account: &AccountId, record: RemoteRecord) -> StorageResult<()> {
        self.ensure_online()?;
        if self.inner.failing_slugs.contains(&record.slug) {
            return Err(StorageError::rejected(format!(
                "write of `{}` failed",
                record.slug
            )));
        }

        {
            let mut docs = self.inner.accounts.entry(account.clone()).or_default();
            let document = docs.entry(record.slug.clone()).or_default();
            document.extend(to_document(&record));
        }
        self.lock_writes().push((account.clone(), record));
        Ok(())
    }
}

impl RemoteMirror for MemoryMirror {
    fn fetch_all(&self, account: &AccountId) -> BoxFuture<'static, StorageResult<Vec<RemoteRecord>>> {
        let mirror = self.clone();
        let account = account.clone();
        let delay = lock_delay(&self.inner.next_read_delay).take();
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            mirror.fetch_all_now(&account)
        })
    }

    fn upsert(&self, account: &AccountId, record: RemoteRecord) -> BoxFuture<'static, StorageResult<()>> {
        let mirror = self.clone();
        let account = account.clone();
        let delay = lock_delay(&self.inner.next_write_delay).take();
        Box::pin(async move {
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            mirror.upsert_now(&account, record)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let mirror = self.clone();
        Box::pin(async move { mirror.ensure_online() })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let mirror = self.clone();
        Box::pin(async move { mirror.ensure_online() })
    }
}

fn lock_delay(slot: &Mutex<Option<Duration>>) -> std::sync::MutexGuard<'_, Option<Duration>> {
    slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn to_document(record: &RemoteRecord) -> Document {
    let mut document = Document::new();
    document.insert("data".into(), Value::Object(record.data.clone()));
    document.insert("updatedAt".into(), Value::from(record.updated_at));
    document
}

fn decode(slug: &str, document: &Document) -> Option<RemoteRecord> {
    let record = ProgressRecord::from_value(&Value::Object(document.clone()))?;
    Some(RemoteRecord::from_local(slug, record))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn record(slug: &str, data: Value, updated_at: i64) -> RemoteRecord {
        RemoteRecord {
            slug: slug.into(),
            data: data.as_object().cloned().unwrap(),
            updated_at,
        }
    }

    #[tokio::test]
    async fn upsert_leaves_unsent_fields_untouched() {
        let mirror = MemoryMirror::new();
        let account = AccountId::new("acct");
        let mut raw = Document::new();
        raw.insert("data".into(), json!({ "old": true }));
        raw.insert("updatedAt".into(), json!(1));
        raw.insert("device".into(), json!("tablet"));
        mirror.seed_raw(&account, "aim-pop", raw);

        mirror
            .upsert(&account, record("aim-pop", json!({ "best": 3 }), 5))
            .await
            .unwrap();

        let doc = mirror.document(&account, "aim-pop").unwrap();
        assert_eq!(doc.get("device"), Some(&json!("tablet")));
        assert_eq!(doc.get("data"), Some(&json!({ "best": 3 })));
        assert_eq!(doc.get("updatedAt"), Some(&json!(5)));
    }

    #[tokio::test]
    async fn fetch_all_is_scoped_per_account_and_skips_malformed_docs() {
        let mirror = MemoryMirror::new();
        let a = AccountId::new("a");
        let b = AccountId::new("b");
        mirror.seed(&a, record("one", json!({}), 1));
        mirror.seed(&b, record("two", json!({}), 2));
        let mut broken = Document::new();
        broken.insert("data".into(), json!("not an object"));
        mirror.seed_raw(&a, "broken", broken);

        let records = mirror.fetch_all(&a).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].slug, "one");
        assert_eq!(mirror.read_count(), 1);
    }
}
