//! Error types raised by the MongoDB mirror.

use mongodb::error::Error as MongoError;
use thiserror::Error;

/// Convenient result alias returning [`MongoDaoError`] failures.
pub type MongoResult<T> = std::result::Result<T, MongoDaoError>;

/// Failures that can occur while talking to MongoDB.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// Required environment variable is missing.
    #[error("missing MongoDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    /// Connection string could not be parsed.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        uri: String,
        #[source]
        source: MongoError,
    },
    /// Client construction from parsed options failed.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        #[source]
        source: MongoError,
    },
    /// Every startup ping failed.
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        attempts: u32,
        #[source]
        source: MongoError,
    },
    /// Periodic health ping failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        #[source]
        source: MongoError,
    },
    /// Index creation was rejected.
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        collection: &'static str,
        index: &'static str,
        #[source]
        source: MongoError,
    },
    /// Progress payload could not be serialized.
    #[error("failed to encode progress `{slug}` for account `{account}`")]
    EncodeProgress {
        account: String,
        slug: String,
        #[source]
        source: serde_json::Error,
    },
    /// Upsert of a progress document failed.
    #[error("failed to save progress `{slug}` for account `{account}`")]
    SaveProgress {
        account: String,
        slug: String,
        #[source]
        source: MongoError,
    },
    /// Listing an account's progress failed.
    #[error("failed to list progress for account `{account}`")]
    ListProgress {
        account: String,
        #[source]
        source: MongoError,
    },
}
