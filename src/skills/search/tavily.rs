//! Answer provider backed by Tavily.
//!
//! The search dialog sends one short question per turn ("who directed
//! Inception", "how old is Ada Lovelace") and speaks a single sentence
//! back, so the request asks Tavily for its synthesized answer and only a
//! handful of supporting snippets.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{SearchProvider, SearchResponse, SearchResult};

const TAVILY_ENDPOINT: &str = "https://api.tavily.com/search";

/// The host times the whole turn out; the answer has to arrive well
/// before that.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Serialize)]
struct AnswerRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: &'static str,
    include_answer: bool,
    include_raw_content: bool,
    max_results: u8,
}

#[derive(Deserialize)]
struct AnswerPayload {
    #[serde(default)]
    answer: Option<String>,
    #[serde(default)]
    results: Vec<Hit>,
}

#[derive(Deserialize)]
struct Hit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

impl From<AnswerPayload> for SearchResponse {
    fn from(payload: AnswerPayload) -> Self {
        SearchResponse {
            summary: payload.answer,
            // Hits without text cannot be spoken.
            results: payload
                .results
                .into_iter()
                .filter(|hit| !hit.content.trim().is_empty())
                .map(|hit| SearchResult {
                    title: hit.title,
                    url: hit.url,
                    snippet: hit.content.trim().to_string(),
                })
                .collect(),
        }
    }
}

pub struct TavilyProvider {
    client: Client,
    api_key: String,
    max_results: u8,
    endpoint: String,
}

impl TavilyProvider {
    pub fn new(api_key: &str, max_results: u8) -> Self {
        Self::with_endpoint(api_key, max_results, TAVILY_ENDPOINT)
    }

    fn with_endpoint(api_key: &str, max_results: u8, endpoint: &str) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            api_key: api_key.to_string(),
            max_results: max_results.max(1),
            endpoint: endpoint.to_string(),
        }
    }
}

#[async_trait]
impl SearchProvider for TavilyProvider {
    async fn search(&self, query: &str) -> anyhow::Result<SearchResponse> {
        let request = AnswerRequest {
            api_key: &self.api_key,
            query,
            search_depth: "basic",
            include_answer: true,
            include_raw_content: false,
            max_results: self.max_results,
        };
        debug!("Asking tavily: {query}");

        let response = self.client.post(&self.endpoint).json(&request).send().await?;
        match response.status() {
            status if status.is_success() => {
                let payload: AnswerPayload = response.json().await?;
                Ok(payload.into())
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                anyhow::bail!("tavily rejected the configured api_key")
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                anyhow::bail!("tavily answered {status}: {body}")
            }
        }
    }

    fn provider_name(&self) -> &str {
        "tavily"
    }
}
