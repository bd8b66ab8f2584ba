//! Recognizer adapter.
//!
//! Wraps the NLU service behind [`Recognizer`] and hands the dialogs a
//! typed [`RecognizerResult`]: top intent plus entity groups. An absent
//! group means "not extracted". Date/time strings inside entities are
//! left as text and parsed later by a [`datetime::DateTimeParser`].

pub mod datetime;
pub mod luis;
pub mod replies;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use datetime::{BasicDateTimeParser, DateTimeParser, DateTimeResolution, ParsedValue, UserZone};
pub use luis::LuisRecognizer;

// ── Intents ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Intent {
    CreateCalendarEntry,
    FindMeetingRoom,
    ChangeCalendarEntry,
    FindCalendarEntry,
    MakeCall,
    SearchMovie,
    SearchPeople,
    Cancel,
    None,
    Other(String),
}

impl Intent {
    pub fn from_name(name: &str) -> Self {
        match name {
            "CreateCalendarEntry" => Intent::CreateCalendarEntry,
            "FindMeetingRoom" => Intent::FindMeetingRoom,
            "ChangeCalendarEntry" => Intent::ChangeCalendarEntry,
            "FindCalendarEntry" => Intent::FindCalendarEntry,
            "OutgoingCall" | "MakeCall" => Intent::MakeCall,
            "SearchMovie" | "GetMovieInfo" => Intent::SearchMovie,
            "SearchPeople" | "GetCelebrityInfo" => Intent::SearchPeople,
            "Cancel" => Intent::Cancel,
            "" | "None" => Intent::None,
            other => Intent::Other(other.to_string()),
        }
    }
}

// ── Entities ─────────────────────────────────────────────

/// One extracted span of the utterance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMatch {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

#[cfg(test)]
impl EntityMatch {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            start: 0,
            end: text.len(),
        }
    }
}

/// Entity groups keyed by the NLU entity name (`Subject`, `FromDate`,
/// `personName`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entities(HashMap<String, Vec<EntityMatch>>);

impl Entities {
    pub fn insert(&mut self, group: &str, found: EntityMatch) {
        self.0.entry(group.to_string()).or_default().push(found);
    }

    #[cfg(test)]
    pub fn with(mut self, group: &str, text: &str) -> Self {
        self.insert(group, EntityMatch::new(text));
        self
    }

    pub fn first(&self, group: &str) -> Option<&str> {
        self.0
            .get(group)
            .and_then(|v| v.first())
            .map(|m| m.text.as_str())
    }

    pub fn all(&self, group: &str) -> Vec<&str> {
        self.0
            .get(group)
            .map(|v| v.iter().map(|m| m.text.as_str()).collect())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizerResult {
    pub text: String,
    pub top_intent: Intent,
    pub score: f64,
    pub entities: Entities,
}

impl RecognizerResult {
    pub fn none(text: &str) -> Self {
        Self {
            text: text.to_string(),
            top_intent: Intent::None,
            score: 0.0,
            entities: Entities::default(),
        }
    }
}

// ── Recognizer trait ─────────────────────────────────────

/// Black-box NLU service: utterance in, intent and entities out.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(&self, text: &str, locale: &str) -> anyhow::Result<RecognizerResult>;

    fn name(&self) -> &str;
}

/// Used when no NLU endpoint is configured. Only semantic actions can
/// start a dialog.
pub struct NullRecognizer;

#[async_trait]
impl Recognizer for NullRecognizer {
    async fn recognize(&self, text: &str, _locale: &str) -> anyhow::Result<RecognizerResult> {
        Ok(RecognizerResult::none(text))
    }

    fn name(&self) -> &str {
        "none"
    }
}
