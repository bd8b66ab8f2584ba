//! Search skill: answers questions about movies and people.
//!
//! The triggering utterance is digested into [`SearchSlots`]; the dialog
//! asks for a question only when nothing was extracted, queries the
//! configured [`SearchProvider`] and speaks back the answer.

pub mod tavily;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::activity::SemanticAction;
use crate::config::SearchConfig;
use crate::dialog::{DialogSet, Prompt, Step, StepContext, StepOutcome, StepValue, Waterfall};
use crate::recognizer::{Intent, RecognizerResult};
use crate::responses;
use crate::skills::{Services, SkillState};

pub use tavily::TavilyProvider;

pub const SEARCH: &str = "search";

// ── Provider seam ────────────────────────────────────────

/// A single search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Provider answer: an optional synthesized summary plus the raw hits.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchResponse {
    pub summary: Option<String>,
    pub results: Vec<SearchResult>,
}

impl SearchResponse {
    /// What the skill says back: the summary, else the first snippet.
    pub fn spoken_answer(&self) -> Option<&str> {
        self.summary
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .or_else(|| {
                self.results
                    .iter()
                    .map(|r| r.snippet.trim())
                    .find(|s| !s.is_empty())
            })
    }
}

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &str) -> anyhow::Result<SearchResponse>;

    fn provider_name(&self) -> &str;
}

/// Builds the provider named in `[search]`.
pub fn from_config(config: &SearchConfig) -> anyhow::Result<Box<dyn SearchProvider>> {
    match config.provider.as_str() {
        "tavily" => Ok(Box::new(TavilyProvider::new(
            &config.api_key,
            config.max_results,
        ))),
        other => anyhow::bail!("Unsupported search provider: '{other}'"),
    }
}

// ── Slots ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchEntityType {
    Movie,
    Person,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchSlots {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_name: Option<String>,
    #[serde(default)]
    pub entity_type: SearchEntityType,
    /// Full question sent to the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
}

/// Pulls the movie or celebrity name out of the NLU result. Exact
/// entities win over their pattern-matched counterparts, movies over
/// people.
pub fn digest(slots: &mut SearchSlots, result: &RecognizerResult) {
    let e = &result.entities;
    let found = e
        .first("MovieTitle")
        .or_else(|| e.first("MovieTitlePatten"))
        .map(|name| (name, SearchEntityType::Movie))
        .or_else(|| {
            e.first("CelebrityName")
                .or_else(|| e.first("CelebrityNamePatten"))
                .map(|name| (name, SearchEntityType::Person))
        });

    match found {
        Some((name, kind)) => {
            slots.entity_name = Some(name.to_string());
            slots.entity_type = kind;
        }
        None => {
            slots.entity_type = match result.top_intent {
                Intent::SearchMovie => SearchEntityType::Movie,
                Intent::SearchPeople => SearchEntityType::Person,
                _ => SearchEntityType::Unknown,
            };
        }
    }

    let text = result.text.trim();
    if !text.is_empty() && (slots.entity_name.is_some() || slots.entity_type != SearchEntityType::Unknown)
    {
        slots.question = Some(text.to_string());
    }
}

/// Slots of a `Search` semantic action: `query`, optionally `movie` or
/// `person`.
pub fn digest_semantic_action(slots: &mut SearchSlots, action: &SemanticAction) {
    if let Some(movie) = action.slot_text("movie") {
        slots.entity_name = Some(movie.to_string());
        slots.entity_type = SearchEntityType::Movie;
    } else if let Some(person) = action.slot_text("person") {
        slots.entity_name = Some(person.to_string());
        slots.entity_type = SearchEntityType::Person;
    }
    slots.question = action
        .slot_text("query")
        .map(String::from)
        .or_else(|| slots.entity_name.clone());
}

// ── Dialog ───────────────────────────────────────────────

type Cx<'c> = StepContext<'c, Services, SkillState>;
type Out<'r> = BoxFuture<'r, anyhow::Result<StepOutcome>>;

pub fn register(set: &mut DialogSet<Services, SkillState>) {
    set.add(Waterfall::new(
        SEARCH,
        vec![
            Step::new("ask_question", ask_question),
            Step::new("show_result", show_result),
        ],
    ));
}

fn ask_question<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        if cx.values.search.question.is_some() {
            return Ok(StepOutcome::next());
        }
        Ok(StepOutcome::Prompt(Prompt::text(
            cx.services.say(responses::SEARCH_PROMPT),
        )))
    })
}

fn show_result<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        if let StepValue::Text(reply) = cx.take_result() {
            cx.values.search.question = Some(reply);
        }
        let question = cx.values.search.question.clone().unwrap_or_default();

        let reply = match &cx.services.search {
            None => {
                warn!("Search requested but no [search] provider is configured");
                cx.services.say(responses::ERROR_MESSAGE)
            }
            Some(provider) => match provider.search(&question).await {
                Ok(response) => {
                    debug!(
                        "{} returned {} result(s) for '{question}'",
                        provider.provider_name(),
                        response.results.len()
                    );
                    match response.spoken_answer() {
                        Some(answer) => answer.to_string(),
                        None => cx.services.say(responses::SEARCH_NO_RESULT),
                    }
                }
                Err(e) => {
                    warn!("{} search failed: {e:#}", provider.provider_name());
                    cx.services.say(responses::ERROR_MESSAGE)
                }
            },
        };
        cx.send(reply);

        cx.values.search = SearchSlots::default();
        Ok(StepOutcome::end())
    })
}

#[cfg(test)]
pub(crate) mod fakes {
    use std::sync::Mutex;

    use super::*;

    /// Canned provider that records the queries it was asked.
    pub struct CannedSearch {
        pub response: Option<SearchResponse>,
        pub queries: Mutex<Vec<String>>,
    }

    impl CannedSearch {
        pub fn answering(summary: Option<&str>, snippets: &[&str]) -> Self {
            Self {
                response: Some(SearchResponse {
                    summary: summary.map(String::from),
                    results: snippets
                        .iter()
                        .map(|s| SearchResult {
                            title: "hit".to_string(),
                            url: "https://example.org".to_string(),
                            snippet: s.to_string(),
                        })
                        .collect(),
                }),
                queries: Mutex::new(Vec::new()),
            }
        }

        pub fn failing() -> Self {
            Self {
                response: None,
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl SearchProvider for CannedSearch {
        async fn search(&self, query: &str) -> anyhow::Result<SearchResponse> {
            self.queries.lock().unwrap().push(query.to_string());
            self.response
                .clone()
                .ok_or_else(|| anyhow::anyhow!("provider unavailable"))
        }

        fn provider_name(&self) -> &str {
            "canned"
        }
    }
}
