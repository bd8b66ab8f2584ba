/// Durable conversation state on the local filesystem.
///
/// Layout:
///   {base_path}/{channel}/conversations/{conversationId}.json
///
/// Each file holds a single JSON record `{etag, updated, state}`. Writes
/// go to a sibling `.tmp` file and are renamed into place so a reader
/// never observes a half-written record. The store-wide write lock makes
/// the token check and the rename one atomic step per process.
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info};
use url::form_urlencoded;

use super::{ETag, Snapshot, StateStore, StoreError};

#[derive(Debug, Serialize, Deserialize)]
struct StateRecord {
    etag: String,
    updated: String,
    state: Value,
}

pub struct FileStore {
    base_path: PathBuf,
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        std::fs::create_dir_all(path)?;
        info!("State store opened at {}", path.display());
        Ok(Self {
            base_path: path.to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    /// Maps a state key onto a file path. Every `/`-separated segment
    /// becomes a directory, percent-encoded so distinct keys never share
    /// a file and a key can never escape the base directory.
    fn record_path(&self, key: &str) -> Result<PathBuf, StoreError> {
        let segments: Vec<String> = key
            .split('/')
            .map(|segment| form_urlencoded::byte_serialize(segment.as_bytes()).collect())
            .collect();

        if segments
            .iter()
            .any(|s| s.is_empty() || s == "." || s == "..")
        {
            return Err(StoreError::storage(key, anyhow!("invalid state key")));
        }

        let Some((file, dirs)) = segments.split_last() else {
            return Err(StoreError::storage(key, anyhow!("empty state key")));
        };
        let mut path = self.base_path.clone();
        for dir in dirs {
            path.push(dir);
        }
        path.push(format!("{file}.json"));
        Ok(path)
    }

    async fn read_record(&self, key: &str, path: &Path) -> Result<Option<StateRecord>, StoreError> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| StoreError::storage(key, e)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::storage(key, e)),
        }
    }
}

#[async_trait]
impl StateStore for FileStore {
    async fn load(&self, key: &str) -> Result<Snapshot, StoreError> {
        let path = self.record_path(key)?;
        Ok(match self.read_record(key, &path).await? {
            Some(record) => Snapshot {
                value: Some(record.state),
                etag: Some(ETag(record.etag)),
            },
            None => Snapshot::default(),
        })
    }

    async fn save(
        &self,
        key: &str,
        value: &Value,
        expected: Option<&ETag>,
    ) -> Result<ETag, StoreError> {
        let path = self.record_path(key)?;
        let _guard = self.write_lock.lock().await;

        let current = self
            .read_record(key, &path)
            .await?
            .map(|record| ETag(record.etag));
        if current.as_ref() != expected {
            debug!("CAS mismatch on {key}");
            return Err(StoreError::Conflict {
                key: key.to_string(),
            });
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StoreError::storage(key, e))?;
        }

        let etag = ETag::fresh();
        let record = StateRecord {
            etag: etag.0.clone(),
            updated: chrono::Utc::now().to_rfc3339(),
            state: value.clone(),
        };
        let json = serde_json::to_string(&record).map_err(|e| StoreError::storage(key, e))?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| StoreError::storage(key, e))?;
        tokio::fs::rename(&tmp, &path)
            .await
            .map_err(|e| StoreError::storage(key, e))?;

        Ok(etag)
    }

    fn backend(&self) -> &str {
        "file"
    }
}
