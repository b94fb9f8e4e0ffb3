//! Device-local key-value persistence.
//!
//! Backends are synchronous and may fail (quota exceeded, storage disabled, I/O errors).
//! Callers never see those failures: [`LocalKv`] turns a failed read into "absent" and a
//! failed write into a dropped write, logging both.

use std::{
    collections::HashMap,
    fs,
    io::{self, ErrorKind},
    path::PathBuf,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
};

use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::{debug, warn};

/// Failures raised by a [`KvBackend`].
#[derive(Debug, Error)]
pub enum KvError {
    /// Storage has been disabled on this device.
    #[error("local storage is disabled")]
    Disabled,
    /// The value does not fit in the configured quota.
    #[error("storing `{key}` would exceed the {limit} byte quota")]
    QuotaExceeded { key: String, limit: usize },
    /// Key contains characters that cannot be mapped onto the backend.
    #[error("invalid storage key `{key}`")]
    InvalidKey { key: String },
    /// Underlying filesystem operation failed.
    #[error("storage I/O failed for `{key}`")]
    Io {
        key: String,
        #[source]
        source: io::Error,
    },
}

/// Raw string storage keyed by string.
pub trait KvBackend: Send + Sync {
    /// Stored value for `key`, `None` when nothing was written yet.
    fn read(&self, key: &str) -> Result<Option<String>, KvError>;
    /// Replace the whole value stored under `key`.
    fn write(&self, key: &str, value: &str) -> Result<(), KvError>;
}

/// Best-effort JSON view over a [`KvBackend`].
#[derive(Clone)]
pub struct LocalKv {
    backend: Arc<dyn KvBackend>,
}

impl LocalKv {
    /// Wrap a backend.
    pub fn new(backend: Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    /// Ephemeral storage, handy for tests and for devices without writable storage.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryKv::new()))
    }

    /// Read and decode the blob stored under `key`.
    ///
    /// Missing blobs, backend failures and undecodable contents all read as `None`.
    pub fn read_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.read(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(key, error = %err, "local storage read failed; treating as empty");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(key, error = %err, "ignoring undecodable local blob");
                None
            }
        }
    }

    /// Encode and store `value` under `key`, returning whether the write landed.
    pub fn write_json<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> bool {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(key, error = %err, "failed to encode local blob");
                return false;
            }
        };

        match self.backend.write(key, &raw) {
            Ok(()) => true,
            Err(err) => {
                warn!(key, error = %err, "local storage write dropped");
                false
            }
        }
    }
}

/// One JSON file per key under a data directory.
pub struct FileKv {
    root: PathBuf,
    quota_bytes: Option<usize>,
}

impl FileKv {
    /// Store blobs under `root`, creating it lazily on first write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            quota_bytes: None,
        }
    }

    /// Reject any single blob larger than `limit` bytes.
    pub fn with_quota(mut self, limit: Option<usize>) -> Self {
        self.quota_bytes = limit;
        self
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, KvError> {
        let valid = !key.is_empty()
            && key
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
            && !key.starts_with('.');
        if !valid {
            return Err(KvError::InvalidKey {
                key: key.to_string(),
            });
        }
        Ok(self.root.join(format!("{key}.json")))
    }
}

impl KvBackend for FileKv {
    fn read(&self, key: &str) -> Result<Option<String>, KvError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(contents)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(source) => Err(KvError::Io {
                key: key.to_string(),
                source,
            }),
        }
    }

    fn write(&self, key: &str, value: &str) -> Result<(), KvError> {
        check_quota(key, value, self.quota_bytes)?;

        let path = self.path_for(key)?;
        let io_err = |source| KvError::Io {
            key: key.to_string(),
            source,
        };

        fs::create_dir_all(&self.root).map_err(io_err)?;
        // Write-then-rename keeps the previous blob intact if we crash mid-write.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value).map_err(io_err)?;
        fs::rename(&tmp, &path).map_err(io_err)
    }
}

/// In-process storage with switchable failure modes.
#[derive(Default)]
pub struct MemoryKv {
    entries: Mutex<HashMap<String, String>>,
    disabled: AtomicBool,
    quota_bytes: Option<usize>,
}

impl MemoryKv {
    /// Empty, enabled, unbounded storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject any single blob larger than `limit` bytes.
    pub fn with_quota(limit: usize) -> Self {
        Self {
            quota_bytes: Some(limit),
            ..Self::default()
        }
    }

    /// Simulate storage being blocked (every call fails while set).
    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::SeqCst);
    }

    /// Store a raw string, bypassing encoding (used to seed corrupt blobs).
    pub fn insert_raw(&self, key: &str, value: &str) {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), value.to_string());
    }
}

impl KvBackend for MemoryKv {
    fn read(&self, key: &str) -> Result<Option<String>, KvError> {
        if self.disabled.load(Ordering::SeqCst) {
            return Err(KvError::Disabled);
        }
        let entries = self
            .entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), KvError> {
        if self.disabled.load(Ordering::SeqCst) {
            return Err(KvError::Disabled);
        }
        check_quota(key, value, self.quota_bytes)?;
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(key.to_string(), value.to_string());
        Ok(())
    }
}

fn check_quota(key: &str, value: &str, quota: Option<usize>) -> Result<(), KvError> {
    match quota {
        Some(limit) if value.len() > limit => Err(KvError::QuotaExceeded {
            key: key.to_string(),
            limit,
        }),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn file_backend_round_trips_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let kv = LocalKv::new(Arc::new(FileKv::new(dir.path().join("nested"))));

        assert!(kv.read_json::<Value>("playvex_progress_v1").is_none());
        assert!(kv.write_json("playvex_progress_v1", &json!({ "a": 1 })));
        assert_eq!(
            kv.read_json::<Value>("playvex_progress_v1"),
            Some(json!({ "a": 1 }))
        );
    }

    #[test]
    fn file_backend_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileKv::new(dir.path());
        assert!(matches!(
            backend.write("../escape", "{}"),
            Err(KvError::InvalidKey { .. })
        ));
    }

    #[test]
    fn quota_failures_degrade_to_dropped_writes() {
        let backend = Arc::new(MemoryKv::with_quota(8));
        let kv = LocalKv::new(backend);
        assert!(!kv.write_json("k", &json!({ "too": "large for the quota" })));
        assert!(kv.read_json::<Value>("k").is_none());
    }

    #[test]
    fn disabled_storage_reads_as_empty() {
        let backend = Arc::new(MemoryKv::new());
        let kv = LocalKv::new(backend.clone());
        assert!(kv.write_json("k", &json!(1)));

        backend.set_disabled(true);
        assert!(kv.read_json::<Value>("k").is_none());
        assert!(!kv.write_json("k", &json!(2)));

        backend.set_disabled(false);
        assert_eq!(kv.read_json::<Value>("k"), Some(json!(1)));
    }

    #[test]
    fn corrupt_blob_reads_as_absent() {
        let backend = Arc::new(MemoryKv::new());
        backend.insert_raw("k", "{not json");
        let kv = LocalKv::new(backend);
        assert!(kv.read_json::<Value>("k").is_none());
    }
}
