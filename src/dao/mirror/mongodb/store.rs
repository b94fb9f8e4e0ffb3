use std::sync::Arc;

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::{Document, doc},
    options::IndexOptions,
};
use tokio::sync::RwLock;
use tracing::warn;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{account_filter, decode_document, merge_update, record_filter},
};
use crate::dao::{
    mirror::RemoteMirror,
    models::{AccountId, RemoteRecord},
    storage::StorageResult,
};

const PROGRESS_COLLECTION_NAME: &str = "progress";

/// Remote mirror backed by MongoDB, one document per `(account_id, slug)`.
#[derive(Clone)]
pub struct MongoMirror {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.state.read().await.database.clone();
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoMirror {
    /// Connect to MongoDB and ensure the `(account_id, slug)` index exists.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let mirror = Self {
            inner: Arc::new(MongoInner {
                state: RwLock::new(MongoState { client, database }),
                config,
            }),
        };
        mirror.ensure_indexes().await?;
        Ok(mirror)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let index = IndexModel::builder()
            .keys(doc! { "account_id": 1, "slug": 1 })
            .options(
                IndexOptions::builder()
                    .name(Some("progress_account_slug_idx".to_owned()))
                    .unique(Some(true))
                    .build(),
            )
            .build();

        self.collection()
            .await
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: PROGRESS_COLLECTION_NAME,
                index: "account_id,slug",
                source,
            })?;
        Ok(())
    }

    async fn collection(&self) -> Collection<Document> {
        let guard = self.inner.state.read().await;
        guard.database.collection::<Document>(PROGRESS_COLLECTION_NAME)
    }

    async fn list_account(&self, account: &AccountId) -> MongoResult<Vec<RemoteRecord>> {
        let list_error = |source| MongoDaoError::ListProgress {
            account: account.to_string(),
            source,
        };
        let documents: Vec<Document> = self
            .collection()
            .await
            .find(account_filter(account))
            .await
            .map_err(list_error)?
            .try_collect()
            .await
            .map_err(list_error)?;

        Ok(documents
            .iter()
            .filter_map(|document| {
                let decoded = decode_document(document);
                if decoded.is_none() {
                    warn!(%account, "skipping malformed remote progress document");
                }
                decoded
            })
            .collect())
    }

    async fn merge_upsert(&self, account: &AccountId, record: RemoteRecord) -> MongoResult<()> {
        let update = merge_update(&record.data, record.updated_at).map_err(|source| {
            MongoDaoError::EncodeProgress {
                account: account.to_string(),
                slug: record.slug.clone(),
                source,
            }
        })?;

        self.collection()
            .await
            .update_one(record_filter(account, &record.slug), update)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveProgress {
                account: account.to_string(),
                slug: record.slug.clone(),
                source,
            })?;
        Ok(())
    }
}

impl RemoteMirror for MongoMirror {
    fn fetch_all(&self, account: &AccountId) -> BoxFuture<'static, StorageResult<Vec<RemoteRecord>>> {
        let mirror = self.clone();
        let account = account.clone();
        Box::pin(async move { mirror.list_account(&account).await.map_err(Into::into) })
    }

    fn upsert(&self, account: &AccountId, record: RemoteRecord) -> BoxFuture<'static, StorageResult<()>> {
        let mirror = self.clone();
        let account = account.clone();
        Box::pin(async move { mirror.merge_upsert(&account, record).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let inner = self.inner.clone();
        Box::pin(async move { inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let mirror = self.clone();
        Box::pin(async move {
            mirror.inner.reconnect().await?;
            mirror.ensure_indexes().await?;
            Ok(())
        })
    }
}
