/// CouchDB-backed mirror.
#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
/// MongoDB-backed mirror.
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use futures::future::BoxFuture;

use crate::dao::{
    models::{AccountId, RemoteRecord},
    storage::StorageResult,
};

/// Per-account, per-slug copy of progress records held off-device.
///
/// `upsert` is a merge-upsert: fields carried by the record (`data`, `updatedAt`)
/// replace their remote counterparts, any other field already stored is left untouched.
pub trait RemoteMirror: Send + Sync {
    fn fetch_all(&self, account: &AccountId) -> BoxFuture<'static, StorageResult<Vec<RemoteRecord>>>;
    fn upsert(&self, account: &AccountId, record: RemoteRecord) -> BoxFuture<'static, StorageResult<()>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
