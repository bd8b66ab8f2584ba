//! Host-side skill invocation.
//!
//! A [`RemoteSkill`] keeps one stream open to the skill named by a
//! manifest and reuses it across turns. A lost stream is re-established
//! on the next turn with exponential backoff; a turn in flight when the
//! stream drops fails and is never re-sent.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

use super::frames::{StreamPart, STATUS_OK};
use super::handler::ActivityCollector;
use super::manifest::SkillManifest;
use super::transport::{self, StreamConnection};
use super::{ensure_websocket_url, AppCredentials, ChannelError, MESSAGES_PATH};
use crate::activity::Activity;
use crate::backoff::{Backoff, ReconnectPolicy};
use crate::host::{TurnHandler, TurnResponse};

pub struct RemoteSkill {
    manifest: SkillManifest,
    endpoint: Url,
    credentials: Arc<AppCredentials>,
    policy: ReconnectPolicy,
    timeout: Duration,
    collector: Arc<ActivityCollector>,
    connection: Mutex<Option<StreamConnection>>,
}

impl RemoteSkill {
    /// Fails before any network attempt when the manifest endpoint is
    /// unusable.
    pub fn new(
        manifest: SkillManifest,
        credentials: Arc<AppCredentials>,
        policy: ReconnectPolicy,
        timeout: Duration,
    ) -> Result<Self, ChannelError> {
        let endpoint = ensure_websocket_url(&manifest.endpoint)?;
        Ok(Self {
            manifest,
            endpoint,
            credentials,
            policy,
            timeout,
            collector: Arc::new(ActivityCollector::new()),
            connection: Mutex::new(None),
        })
    }

    pub fn manifest(&self) -> &SkillManifest {
        &self.manifest
    }

    /// Posts one turn and waits for the skill's answer. Returns the
    /// activities the skill streamed back and its updated state.
    pub async fn invoke(
        &self,
        activity: &Activity,
        prior: Option<Value>,
    ) -> Result<(Vec<Activity>, Value), ChannelError> {
        let connection = self.connection().await?;
        let key = activity.conversation_key();

        let body = serde_json::to_value(activity)
            .map_err(|e| ChannelError::Protocol(format!("cannot encode activity: {e}")))?;
        let mut streams = vec![StreamPart::json(body)];
        if let Some(prior) = prior {
            streams.push(StreamPart::json(prior));
        }

        let started = Instant::now();
        let result = connection
            .request("POST", MESSAGES_PATH, streams, self.timeout)
            .await;
        // Whatever arrived belongs to this turn, kept or not.
        let activities = self.collector.drain(&key);

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                if connection.is_closed() || matches!(e, ChannelError::Timeout(_)) {
                    self.drop_connection().await;
                }
                return Err(e);
            }
        };
        debug!(
            "{} answered {} in {:?} with {} activit{}",
            self.manifest.name,
            response.status,
            started.elapsed(),
            activities.len(),
            if activities.len() == 1 { "y" } else { "ies" }
        );

        if response.status != STATUS_OK {
            return Err(ChannelError::Rejected(response.status));
        }
        let state = response
            .streams
            .into_iter()
            .next()
            .map(|s| s.body)
            .ok_or_else(|| ChannelError::Protocol("skill answered without state".into()))?;
        Ok((activities, state))
    }

    async fn connection(&self) -> Result<StreamConnection, ChannelError> {
        let mut slot = self.connection.lock().await;
        if let Some(connection) = slot.as_ref() {
            if !connection.is_closed() {
                return Ok(connection.clone());
            }
            info!("Stream to {} was lost, reconnecting", self.manifest.name);
        }
        let connection = self.connect_with_backoff().await?;
        *slot = Some(connection.clone());
        Ok(connection)
    }

    async fn drop_connection(&self) {
        if let Some(connection) = self.connection.lock().await.take() {
            connection.close().await;
        }
    }

    async fn connect_with_backoff(&self) -> Result<StreamConnection, ChannelError> {
        let mut backoff = Backoff::from_policy(&self.policy);
        loop {
            info!(
                "Connecting to skill {} at {} (attempt {})...",
                self.manifest.name,
                self.endpoint,
                backoff.attempt + 1
            );
            let attempt = async {
                let token = self.credentials.token(&self.manifest.msa_app_id).await?;
                transport::connect(&self.endpoint, token.as_deref(), self.collector.clone()).await
            };
            match attempt.await {
                Ok(connection) => return Ok(connection),
                Err(e) if e.is_retriable() => {
                    let delay = backoff.next_delay();
                    if backoff.exceeded_max_attempts(self.policy.max_attempts) {
                        warn!(
                            "Giving up on {} after {} attempts: {e}",
                            self.manifest.name, backoff.attempt
                        );
                        return Err(e);
                    }
                    warn!("Connection to {} failed: {e}, retrying in {delay:?}", self.manifest.name);
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl TurnHandler for RemoteSkill {
    async fn on_turn(&self, activity: &Activity, prior: Option<Value>) -> anyhow::Result<TurnResponse> {
        let (activities, state) = self.invoke(activity, prior).await?;
        Ok(TurnResponse { activities, state })
    }
}
