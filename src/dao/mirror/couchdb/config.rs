//! Connection settings for the CouchDB mirror.

use super::error::{CouchDaoError, CouchResult};

const DEFAULT_DATABASE: &str = "playvex_progress";

/// Runtime configuration describing how to reach the CouchDB mirror.
#[derive(Debug, Clone)]
pub struct CouchConfig {
    /// Server root, without the database segment.
    pub base_url: String,
    /// Database holding the progress documents.
    pub database: String,
    /// Basic-auth user.
    pub username: Option<String>,
    /// Basic-auth password.
    pub password: Option<String>,
}

impl CouchConfig {
    /// Anonymous access to `database` on `base_url`.
    pub fn new(base_url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            database: database.into(),
            username: None,
            password: None,
        }
    }

    /// Attach basic-auth credentials.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// Read `COUCH_BASE_URL`, optional `COUCH_DB` and optional `COUCH_USERNAME`/`COUCH_PASSWORD`.
    pub fn from_env() -> CouchResult<Self> {
        let base_url =
            std::env::var("COUCH_BASE_URL").map_err(|_| CouchDaoError::MissingEnvVar {
                var: "COUCH_BASE_URL",
            })?;
        let database = std::env::var("COUCH_DB").unwrap_or_else(|_| DEFAULT_DATABASE.to_owned());

        let mut config = Self::new(base_url, database);
        if let (Ok(username), Ok(password)) = (
            std::env::var("COUCH_USERNAME"),
            std::env::var("COUCH_PASSWORD"),
        ) {
            config = config.with_credentials(username, password);
        }
        Ok(config)
    }
}
