//! Conversation host: load → run the turn → compare-and-swap save.
//!
//! The same host drives a skill bot running in-process and a remote
//! skill reached over the channel. Replies are only released once the
//! new state is saved; a lost race on the version token fails the turn
//! and the replies are withheld.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::activity::Activity;
use crate::state::{StateStore, StoreError};

/// Outcome of one turn: replies plus the state to persist.
#[derive(Debug, Clone)]
pub struct TurnResponse {
    pub activities: Vec<Activity>,
    pub state: Value,
}

/// Something that can take a turn: a local skill bot or a remote skill.
#[async_trait]
pub trait TurnHandler: Send + Sync {
    /// `prior` is `None` on the first turn of a conversation.
    async fn on_turn(&self, activity: &Activity, prior: Option<Value>)
        -> anyhow::Result<TurnResponse>;
}

#[derive(Debug, Error)]
pub enum TurnError {
    #[error("turn failed: {0:#}")]
    Handler(anyhow::Error),
    #[error("turn timed out after {0:?}")]
    Timeout(Duration),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TurnError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, TurnError::Store(e) if e.is_conflict())
    }
}

pub struct ConversationHost {
    store: Arc<dyn StateStore>,
    handler: Arc<dyn TurnHandler>,
    timeout: Duration,
}

impl ConversationHost {
    pub fn new(store: Arc<dyn StateStore>, handler: Arc<dyn TurnHandler>, timeout: Duration) -> Self {
        Self {
            store,
            handler,
            timeout,
        }
    }

    /// Runs one turn for the conversation `activity` belongs to.
    pub async fn process(&self, activity: &Activity) -> Result<Vec<Activity>, TurnError> {
        let key = activity.conversation_key();
        let snapshot = self.store.load(&key).await?;
        debug!(
            "Loaded {key} ({})",
            snapshot
                .etag
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_else(|| "new".to_string())
        );

        // Dropping the handler future on timeout leaves the store untouched.
        let response = tokio::time::timeout(self.timeout, self.handler.on_turn(activity, snapshot.value))
            .await
            .map_err(|_| TurnError::Timeout(self.timeout))?
            .map_err(TurnError::Handler)?;

        match self
            .store
            .save(&key, &response.state, snapshot.etag.as_ref())
            .await
        {
            Ok(etag) => {
                info!(
                    "Turn on {key} saved ({etag}), {} activit{}",
                    response.activities.len(),
                    if response.activities.len() == 1 { "y" } else { "ies" }
                );
                Ok(response.activities)
            }
            Err(e) => {
                if e.is_conflict() {
                    warn!("Concurrent turn on {key}, withholding {} activities", response.activities.len());
                }
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;
    use crate::activity::ConversationAccount;
    use crate::state::MemoryStore;

    fn incoming(text: &str) -> Activity {
        let mut activity = Activity::message(text);
        activity.channel_id = "test".into();
        activity.conversation = ConversationAccount { id: "c1".into() };
        activity
    }

    /// Counts turns in the state and echoes the count.
    struct Counter;

    #[async_trait]
    impl TurnHandler for Counter {
        async fn on_turn(
            &self,
            _activity: &Activity,
            prior: Option<Value>,
        ) -> anyhow::Result<TurnResponse> {
            let turns = prior.and_then(|v| v["turns"].as_u64()).unwrap_or(0) + 1;
            Ok(TurnResponse {
                activities: vec![Activity::message(&format!("turn {turns}"))],
                state: json!({ "turns": turns }),
            })
        }
    }

    /// Writes the conversation behind the host's back while the turn runs.
    struct Racer {
        store: Arc<dyn StateStore>,
    }

    #[async_trait]
    impl TurnHandler for Racer {
        async fn on_turn(
            &self,
            activity: &Activity,
            _prior: Option<Value>,
        ) -> anyhow::Result<TurnResponse> {
            self.store
                .save(&activity.conversation_key(), &json!({ "winner": "other" }), None)
                .await?;
            Ok(TurnResponse {
                activities: vec![Activity::message("should not be seen")],
                state: json!({ "winner": "racer" }),
            })
        }
    }

    struct Failing(AtomicUsize);

    #[async_trait]
    impl TurnHandler for Failing {
        async fn on_turn(
            &self,
            _activity: &Activity,
            _prior: Option<Value>,
        ) -> anyhow::Result<TurnResponse> {
            self.0.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("skill unreachable")
        }
    }

    struct Slow;

    #[async_trait]
    impl TurnHandler for Slow {
        async fn on_turn(
            &self,
            _activity: &Activity,
            _prior: Option<Value>,
        ) -> anyhow::Result<TurnResponse> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(TurnResponse {
                activities: vec![],
                state: json!({}),
            })
        }
    }

    #[tokio::test]
    async fn test_state_threads_through_turns() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let host = ConversationHost::new(store.clone(), Arc::new(Counter), Duration::from_secs(1));

        let sent = host.process(&incoming("a")).await.unwrap();
        assert_eq!(sent[0].text(), "turn 1");
        let sent = host.process(&incoming("b")).await.unwrap();
        assert_eq!(sent[0].text(), "turn 2");

        let saved = store.load("test/conversations/c1").await.unwrap();
        assert_eq!(saved.value, Some(json!({ "turns": 2 })));
    }

    #[tokio::test]
    async fn test_conflict_withholds_activities() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let host = ConversationHost::new(
            store.clone(),
            Arc::new(Racer {
                store: store.clone(),
            }),
            Duration::from_secs(1),
        );

        let err = host.process(&incoming("go")).await.unwrap_err();
        assert!(err.is_conflict());
        let saved = store.load("test/conversations/c1").await.unwrap();
        assert_eq!(saved.value, Some(json!({ "winner": "other" })));
    }

    #[tokio::test]
    async fn test_handler_failure_saves_nothing() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let handler = Arc::new(Failing(AtomicUsize::new(0)));
        let host = ConversationHost::new(store.clone(), handler.clone(), Duration::from_secs(1));

        let err = host.process(&incoming("go")).await.unwrap_err();
        assert!(matches!(err, TurnError::Handler(_)));
        assert!(!err.is_conflict());
        assert_eq!(handler.0.load(Ordering::SeqCst), 1);
        assert!(store.load("test/conversations/c1").await.unwrap().value.is_none());
    }

    #[tokio::test]
    async fn test_timeout_saves_nothing() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        let host = ConversationHost::new(store.clone(), Arc::new(Slow), Duration::from_millis(100));

        let err = host.process(&incoming("go")).await.unwrap_err();
        assert!(matches!(err, TurnError::Timeout(_)));
        assert!(store.load("test/conversations/c1").await.unwrap().value.is_none());
    }
}
