//! LUIS-style HTTP recognizer.
//!
//! Calls `GET {endpoint}/luis/v2.0/apps/{app_id}?q=...` with the
//! subscription key as a query parameter and maps the response onto
//! [`RecognizerResult`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use super::{Entities, EntityMatch, Intent, Recognizer, RecognizerResult};
use crate::config::RecognizerConfig;

// ── LUIS API types ───────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct LuisResponse {
    #[serde(default)]
    pub query: String,
    pub top_scoring_intent: Option<LuisIntent>,
    #[serde(default)]
    pub entities: Vec<LuisEntity>,
}

#[derive(Deserialize)]
pub(super) struct LuisIntent {
    pub intent: String,
    #[serde(default)]
    pub score: f64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct LuisEntity {
    pub entity: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub start_index: usize,
    pub end_index: usize,
}

impl LuisResponse {
    /// Entity spans are cut from the original query so casing survives
    /// (LUIS lowercases `entity`).
    pub fn into_result(self) -> RecognizerResult {
        let mut entities = Entities::default();
        for e in &self.entities {
            let text = self
                .query
                .get(e.start_index..=e.end_index)
                .map(str::to_string)
                .unwrap_or_else(|| e.entity.clone());
            entities.insert(
                &e.entity_type,
                EntityMatch {
                    text,
                    start: e.start_index,
                    end: e.end_index + 1,
                },
            );
        }

        let (top_intent, score) = match self.top_scoring_intent {
            Some(top) => (Intent::from_name(&top.intent), top.score),
            None => (Intent::None, 0.0),
        };

        RecognizerResult {
            text: self.query,
            top_intent,
            score,
            entities,
        }
    }
}

// ── LuisRecognizer ───────────────────────────────────────

pub struct LuisRecognizer {
    client: Client,
    endpoint: String,
    app_id: String,
    key: String,
}

impl LuisRecognizer {
    pub fn new(config: &RecognizerConfig) -> anyhow::Result<Self> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("recognizer.endpoint is required"))?;
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            app_id: config.app_id.clone().unwrap_or_default(),
            key: config.key.clone().unwrap_or_default(),
        })
    }

    fn url(&self) -> String {
        format!("{}/luis/v2.0/apps/{}", self.endpoint, self.app_id)
    }
}

#[async_trait]
impl Recognizer for LuisRecognizer {
    async fn recognize(&self, text: &str, _locale: &str) -> anyhow::Result<RecognizerResult> {
        if text.trim().is_empty() {
            return Ok(RecognizerResult::none(text));
        }

        let response = self
            .client
            .get(self.url())
            .query(&[
                ("q", text),
                ("subscription-key", self.key.as_str()),
                ("verbose", "true"),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("LUIS returned {status}: {body}");
        }

        let luis: LuisResponse = response.json().await?;
        let result = luis.into_result();
        debug!(
            "Recognized {:?} ({:.2}) with {} entity groups",
            result.top_intent,
            result.score,
            result.entities.0.len()
        );
        Ok(result)
    }

    fn name(&self) -> &str {
        "luis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_mapping() {
        let json = r#"{
            "query": "Meet Alice tomorrow about Budget",
            "topScoringIntent": {"intent": "CreateCalendarEntry", "score": 0.97},
            "entities": [
                {"entity": "alice", "type": "personName", "startIndex": 5, "endIndex": 9},
                {"entity": "tomorrow", "type": "FromDate", "startIndex": 11, "endIndex": 18},
                {"entity": "budget", "type": "Subject", "startIndex": 26, "endIndex": 31}
            ]
        }"#;
        let parsed: LuisResponse = serde_json::from_str(json).unwrap();
        let result = parsed.into_result();

        assert_eq!(result.top_intent, Intent::CreateCalendarEntry);
        assert!((result.score - 0.97).abs() < f64::EPSILON);
        assert_eq!(result.entities.first("personName"), Some("Alice"));
        assert_eq!(result.entities.first("FromDate"), Some("tomorrow"));
        assert_eq!(result.entities.first("Subject"), Some("Budget"));
        assert!(!result.entities.first("Location").is_some());
    }

    #[test]
    fn test_response_without_intent() {
        let parsed: LuisResponse = serde_json::from_str(r#"{"query": "hm"}"#).unwrap();
        let result = parsed.into_result();
        assert_eq!(result.top_intent, Intent::None);
        assert_eq!(result.entities, Entities::default());
    }

    #[test]
    fn test_out_of_range_span_falls_back_to_entity_text() {
        let json = r#"{
            "query": "short",
            "topScoringIntent": {"intent": "None", "score": 0.1},
            "entities": [{"entity": "far", "type": "Location", "startIndex": 40, "endIndex": 42}]
        }"#;
        let result = serde_json::from_str::<LuisResponse>(json).unwrap().into_result();
        assert_eq!(result.entities.first("Location"), Some("far"));
    }

    #[test]
    fn test_requires_endpoint() {
        let config = RecognizerConfig::default();
        assert!(LuisRecognizer::new(&config).is_err());
    }

    #[test]
    fn test_url_trims_trailing_slash() {
        let config = RecognizerConfig {
            endpoint: Some("https://westus.api.cognitive.microsoft.com/".to_string()),
            app_id: Some("app".to_string()),
            key: Some("k".to_string()),
            ..RecognizerConfig::default()
        };
        let luis = LuisRecognizer::new(&config).unwrap();
        assert_eq!(
            luis.url(),
            "https://westus.api.cognitive.microsoft.com/luis/v2.0/apps/app"
        );
    }
}
