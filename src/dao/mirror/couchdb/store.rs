use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{Client, Method, StatusCode, Url};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use tracing::warn;

use crate::dao::{
    mirror::RemoteMirror,
    models::{AccountId, RemoteRecord},
    storage::StorageResult,
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{AllDocsResponse, END_SUFFIX, account_prefix, decode_row, merge_into, progress_doc_id},
};

const ALL_DOCS: &str = "_all_docs";

/// Remote mirror backed by a CouchDB database, one document per account and game.
#[derive(Clone)]
pub struct CouchMirror {
    client: Client,
    base_url: Arc<Url>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl CouchMirror {
    /// Connect to CouchDB and create the database when missing.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let raw_url = config.base_url.trim_end_matches('/').to_owned();
        let base_url = Url::parse(&raw_url).map_err(|err| CouchDaoError::InvalidBaseUrl {
            url: raw_url.clone(),
            reason: err.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(CouchDaoError::InvalidBaseUrl {
                url: raw_url,
                reason: "URL cannot carry a path".into(),
            });
        }

        let auth = config
            .username
            .zip(config.password)
            .map(|(u, p)| (Arc::<str>::from(u), Arc::<str>::from(p)));

        let mirror = Self {
            client,
            base_url: Arc::new(base_url),
            database: Arc::<str>::from(config.database),
            auth,
        };
        mirror.ensure_database().await?;
        Ok(mirror)
    }

    /// URL of `segments` below the database, each segment percent-encoded.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = (*self.base_url).clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().push(&self.database).extend(segments);
        }
        url
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, url);
        match self.auth {
            Some((ref user, ref pass)) => builder.basic_auth(user.as_ref(), Some(pass.as_ref())),
            None => builder,
        }
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let response = self
            .request(Method::GET, self.url(&[]))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .request(Method::PUT, self.url(&[]))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                // 412 means another writer created it first.
                if create.status().is_success() || create.status() == StatusCode::PRECONDITION_FAILED {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, self.url(&[doc_id]))
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<()>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, self.url(&[doc_id]))
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: response.status(),
            })
        }
    }

    async fn list_account(&self, account: &AccountId) -> CouchResult<Vec<RemoteRecord>> {
        let prefix = account_prefix(account);
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", Value::String(prefix.clone()).to_string()),
            ("endkey", Value::String(format!("{prefix}{END_SUFFIX}")).to_string()),
        ];

        let response = self
            .request(Method::GET, self.url(&[ALL_DOCS]))
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_string(),
                source,
            }
        })?;

        let mut records = Vec::with_capacity(payload.rows.len());
        for row in payload.rows {
            let id = row.id.clone();
            match decode_row(&prefix, row) {
                Some(record) => records.push(record),
                None => warn!(doc_id = %id, "skipping malformed remote progress document"),
            }
        }
        Ok(records)
    }

    async fn merge_upsert(&self, account: &AccountId, record: RemoteRecord) -> CouchResult<()> {
        let doc_id = progress_doc_id(account, &record.slug);
        let existing = self.get_document::<Map<String, Value>>(&doc_id).await?;
        let document = merge_into(existing, &doc_id, account, &record);
        self.put_document(&doc_id, &document).await
    }
}

impl RemoteMirror for CouchMirror {
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
        let mirror = self.clone();
        Box::pin(async move {
            let url = mirror.url(&[]);
            let path = url.to_string();
            let response = mirror
                .request(Method::GET, url)
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: path.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let mirror = self.clone();
        Box::pin(async move { mirror.ensure_database().await.map_err(Into::into) })
    }
}
