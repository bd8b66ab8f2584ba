//! Recognizers for replies to prompts: yes/no, pick-one-of-N, and the
//! "what should I change" field-group question.

use serde::{Deserialize, Serialize};

const YES: &[&str] = &[
    "yes", "y", "yeah", "yep", "yup", "sure", "ok", "okay", "correct", "right", "confirm",
    "of course", "sounds good", "go ahead",
];
const NO: &[&str] = &["no", "n", "nope", "nah", "not really", "wrong", "incorrect", "don't"];

fn words(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '\'' { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    haystack == phrase
        || haystack.starts_with(&format!("{phrase} "))
        || haystack.ends_with(&format!(" {phrase}"))
        || haystack.contains(&format!(" {phrase} "))
}

/// `Some(true)` for yes, `Some(false)` for no, `None` when unclear.
pub fn recognize_confirm(text: &str) -> Option<bool> {
    let normalized = words(text);
    if normalized.is_empty() {
        return None;
    }
    let yes = YES.iter().any(|p| contains_phrase(&normalized, p));
    let no = NO.iter().any(|p| contains_phrase(&normalized, p));
    match (yes, no) {
        (true, false) => Some(true),
        (false, true) => Some(false),
        _ => None,
    }
}

/// An option offered by a choice prompt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub value: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub synonyms: Vec<String>,
}

impl ChoiceOption {
    pub fn new(value: &str) -> Self {
        Self {
            value: value.to_string(),
            synonyms: Vec::new(),
        }
    }

    pub fn with_synonyms(value: &str, synonyms: &[&str]) -> Self {
        Self {
            value: value.to_string(),
            synonyms: synonyms.iter().map(|s| s.to_string()).collect(),
        }
    }
}

const ORDINALS: &[&str] = &[
    "first", "second", "third", "fourth", "fifth", "sixth", "seventh", "eighth", "ninth", "tenth",
];

/// Index of the chosen option: by 1-based number, ordinal word, exact
/// value, or synonym.
pub fn recognize_choice(text: &str, options: &[ChoiceOption]) -> Option<usize> {
    let normalized = words(text);
    if normalized.is_empty() || options.is_empty() {
        return None;
    }

    if let Some(index) = options
        .iter()
        .position(|o| words(&o.value) == normalized)
    {
        return Some(index);
    }

    let numbers: Vec<usize> = normalized
        .split(' ')
        .filter_map(|w| w.parse::<usize>().ok())
        .collect();
    if let [n] = numbers.as_slice() {
        if (1..=options.len()).contains(n) {
            return Some(n - 1);
        }
    }

    if let Some(n) = ORDINALS
        .iter()
        .position(|o| contains_phrase(&normalized, o))
    {
        if n < options.len() {
            return Some(n);
        }
    }

    let hits: Vec<usize> = options
        .iter()
        .enumerate()
        .filter(|(_, o)| {
            let value = words(&o.value);
            (!value.is_empty() && contains_phrase(&normalized, &value))
                || o
                    .synonyms
                    .iter()
                    .any(|s| contains_phrase(&normalized, &words(s)))
        })
        .map(|(i, _)| i)
        .collect();
    match hits.as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}

/// Field group the user wants to change after declining a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecreateField {
    Subject,
    Content,
    Time,
    Duration,
    Location,
    Participants,
    Cancel,
}

impl RecreateField {
    pub const ALL: [RecreateField; 7] = [
        RecreateField::Subject,
        RecreateField::Content,
        RecreateField::Time,
        RecreateField::Duration,
        RecreateField::Location,
        RecreateField::Participants,
        RecreateField::Cancel,
    ];

    fn keywords(self) -> &'static [&'static str] {
        match self {
            RecreateField::Subject => &["subject", "title", "topic", "name"],
            RecreateField::Content => &["content", "description", "body", "notes", "detail"],
            RecreateField::Time => &["time", "date", "start", "when", "day"],
            RecreateField::Duration => &["duration", "length", "how long", "end"],
            RecreateField::Location => &["location", "place", "room", "where", "venue"],
            RecreateField::Participants => &[
                "participants",
                "participant",
                "attendees",
                "attendee",
                "people",
                "invitees",
                "who",
            ],
            RecreateField::Cancel => &["cancel", "nothing", "never mind", "forget it", "stop"],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RecreateField::Subject => "subject",
            RecreateField::Content => "content",
            RecreateField::Time => "time",
            RecreateField::Duration => "duration",
            RecreateField::Location => "location",
            RecreateField::Participants => "participants",
            RecreateField::Cancel => "cancel",
        }
    }
}

pub fn recognize_recreate(text: &str) -> Option<RecreateField> {
    let normalized = words(text);
    let hits: Vec<RecreateField> = RecreateField::ALL
        .into_iter()
        .filter(|f| f.keywords().iter().any(|k| contains_phrase(&normalized, k)))
        .collect();
    match hits.as_slice() {
        [only] => Some(*only),
        _ => None,
    }
}
