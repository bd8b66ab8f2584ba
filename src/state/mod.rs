//! Versioned conversation state with compare-and-swap saves.
//!
//! `load` hands back the stored blob together with its version token
//! (`ETag`). `save` only succeeds when the caller presents the token it
//! loaded; anything else is a [`StoreError::Conflict`] and leaves the
//! stored value untouched. A `None` token means "the key must not exist
//! yet" (first turn of a conversation).

pub mod file;
pub mod memory;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Opaque version token handed out by `load`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ETag(pub String);

impl ETag {
    pub fn fresh() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for ETag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    /// The presented token is stale (or the key appeared meanwhile).
    #[error("version conflict on {key}")]
    Conflict { key: String },
    #[error("storage failure on {key}: {source}")]
    Storage {
        key: String,
        #[source]
        source: anyhow::Error,
    },
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    fn storage(key: &str, source: impl Into<anyhow::Error>) -> Self {
        StoreError::Storage {
            key: key.to_string(),
            source: source.into(),
        }
    }
}

/// Loaded state: `None` value and token on the first turn.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub value: Option<Value>,
    pub etag: Option<ETag>,
}

#[async_trait]
pub trait StateStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Snapshot, StoreError>;

    /// Compare-and-swap write. Returns the new token on success.
    async fn save(
        &self,
        key: &str,
        value: &Value,
        expected: Option<&ETag>,
    ) -> Result<ETag, StoreError>;

    fn backend(&self) -> &str;
}

/// Builds `{channel}/conversations/{conversationId}`.
pub fn conversation_key(channel_id: &str, conversation_id: &str) -> String {
    format!("{channel_id}/conversations/{conversation_id}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_key_format() {
        assert_eq!(
            conversation_key("testchannel", "42"),
            "testchannel/conversations/42"
        );
    }

    #[test]
    fn test_store_error_kinds() {
        let conflict = StoreError::Conflict { key: "k".into() };
        assert!(conflict.is_conflict());
        assert_eq!(conflict.to_string(), "version conflict on k");

        let fault = StoreError::storage("k", anyhow::anyhow!("disk full"));
        assert!(!fault.is_conflict());
        assert!(fault.to_string().contains("disk full"));
    }

    #[test]
    fn test_fresh_etags_differ() {
        assert_ne!(ETag::fresh(), ETag::fresh());
    }
}
