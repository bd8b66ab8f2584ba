use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::{ETag, Snapshot, StateStore, StoreError};

/// Process-local, volatile store. The map lock makes each
/// compare-and-swap atomic per key.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, (Value, ETag)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Snapshot, StoreError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| StoreError::storage(key, anyhow::anyhow!("lock poisoned: {e}")))?;
        Ok(match entries.get(key) {
            Some((value, etag)) => Snapshot {
                value: Some(value.clone()),
                etag: Some(etag.clone()),
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
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| StoreError::storage(key, anyhow::anyhow!("lock poisoned: {e}")))?;

        let current = entries.get(key).map(|(_, etag)| etag);
        if current != expected {
            debug!("CAS mismatch on {key}: stored {current:?}, presented {expected:?}");
            return Err(StoreError::Conflict {
                key: key.to_string(),
            });
        }

        let etag = ETag::fresh();
        entries.insert(key.to_string(), (value.clone(), etag.clone()));
        Ok(etag)
    }

    fn backend(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_first_load_is_empty() {
        let store = MemoryStore::new();
        let snap = store.load("c/conversations/1").await.unwrap();
        assert!(snap.value.is_none());
        assert!(snap.etag.is_none());
    }

    #[tokio::test]
    async fn test_save_then_load_round() {
        let store = MemoryStore::new();
        let etag = store.save("k", &json!({"turn": 1}), None).await.unwrap();
        let snap = store.load("k").await.unwrap();
        assert_eq!(snap.value, Some(json!({"turn": 1})));
        assert_eq!(snap.etag, Some(etag));
    }

    #[tokio::test]
    async fn test_create_requires_absent_key() {
        let store = MemoryStore::new();
        store.save("k", &json!(1), None).await.unwrap();
        let err = store.save("k", &json!(2), None).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.load("k").await.unwrap().value, Some(json!(1)));
    }

    #[tokio::test]
    async fn test_stale_token_rejected_and_state_unchanged() {
        let store = MemoryStore::new();
        let first = store.save("k", &json!("a"), None).await.unwrap();
        store.save("k", &json!("b"), Some(&first)).await.unwrap();

        let err = store.save("k", &json!("c"), Some(&first)).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(store.load("k").await.unwrap().value, Some(json!("b")));
    }

    #[tokio::test]
    async fn test_concurrent_saves_exactly_one_wins() {
        let store = Arc::new(MemoryStore::new());
        let base = store.save("k", &json!(0), None).await.unwrap();

        let mut handles = Vec::new();
        for i in 1..=8 {
            let store = store.clone();
            let base = base.clone();
            handles.push(tokio::spawn(async move {
                store.save("k", &json!(i), Some(&base)).await
            }));
        }

        let mut wins = 0;
        let mut conflicts = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => wins += 1,
                Err(e) if e.is_conflict() => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(wins, 1);
        assert_eq!(conflicts, 7);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let store = MemoryStore::new();
        store.save("a", &json!(1), None).await.unwrap();
        store.save("b", &json!(2), None).await.unwrap();
        assert_eq!(store.len(), 2);
    }
}
