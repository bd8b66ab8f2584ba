//! Waterfall dialog engine.
//!
//! A dialog is a value: an identifier plus an ordered list of named
//! steps. One interpreter ([`DialogSet`]) walks the active frame of a
//! LIFO stack, suspends on prompts, and persists everything it needs to
//! resume in [`ConversationState`], which the host saves between turns.

pub mod prompt;
pub mod waterfall;

use serde::{Deserialize, Serialize};

use crate::recognizer::replies::{ChoiceOption, RecreateField};
use crate::recognizer::DateTimeResolution;

pub use prompt::ReplyRecognizer;
pub use waterfall::{DialogSet, Step, StepContext, TurnOutcome, TurnStatus, Waterfall};

/// Value handed from one step to the next, or from a finished child
/// dialog to its parent.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum StepValue {
    #[default]
    None,
    Text(String),
    Confirmed(bool),
    DateTimes(Vec<DateTimeResolution>),
    /// Seconds.
    Duration(i64),
    Choice(usize),
    Recreate(RecreateField),
}

/// What a step asks the engine to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Run the following step of the same dialog.
    Next(StepValue),
    /// Pop the current dialog and return the value to its parent.
    End(StepValue),
    /// Push a child dialog; this dialog resumes at its next step once
    /// the child ends.
    Begin {
        dialog: String,
        options: DialogOptions,
    },
    /// Suspend the turn until the user answers.
    Prompt(Prompt),
    /// Pop the current dialog and push a fresh frame in its place.
    Replace {
        dialog: String,
        options: DialogOptions,
    },
    /// Clear the whole stack.
    CancelAll,
}

impl StepOutcome {
    pub fn next() -> Self {
        StepOutcome::Next(StepValue::None)
    }

    pub fn end() -> Self {
        StepOutcome::End(StepValue::None)
    }

    pub fn begin(dialog: &str, options: DialogOptions) -> Self {
        StepOutcome::Begin {
            dialog: dialog.to_string(),
            options,
        }
    }

    pub fn replace(dialog: &str, options: DialogOptions) -> Self {
        StepOutcome::Replace {
            dialog: dialog.to_string(),
            options,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PromptKind {
    Text,
    Date,
    Time,
    Duration,
    Confirm,
    Choice { options: Vec<ChoiceOption> },
    Recreate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Prompt {
    pub kind: PromptKind,
    pub text: String,
    pub retry: Option<String>,
}

impl Prompt {
    pub fn new(kind: PromptKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            text: text.into(),
            retry: None,
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(PromptKind::Text, text)
    }

    pub fn confirm(text: impl Into<String>) -> Self {
        Self::new(PromptKind::Confirm, text)
    }

    pub fn choice(text: impl Into<String>, options: Vec<ChoiceOption>) -> Self {
        Self::new(PromptKind::Choice { options }, text)
    }

    pub fn with_retry(mut self, retry: impl Into<String>) -> Self {
        self.retry = Some(retry.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateReason {
    NotFound,
    NotADateTime,
    NoEvent,
}

/// Options a dialog was started with. Persisted in its frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DialogOptions {
    #[default]
    None,
    UpdateDateTime {
        reason: UpdateReason,
    },
    FindContact {
        /// Ask "who should I invite" when no names were extracted.
        ask_when_empty: bool,
    },
    ChooseEvent {
        reason: UpdateReason,
    },
}

/// Suspension marker of a frame waiting on user input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingPrompt {
    pub kind: PromptKind,
    pub retry_text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogFrame {
    pub dialog_id: String,
    pub next_step: usize,
    #[serde(default)]
    pub options: DialogOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingPrompt>,
}

impl DialogFrame {
    pub fn new(dialog_id: &str, options: DialogOptions) -> Self {
        Self {
            dialog_id: dialog_id.to_string(),
            next_step: 0,
            options,
            pending: None,
        }
    }
}

/// Everything persisted for one conversation: the dialog stack and the
/// skill's slot values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationState<S> {
    #[serde(default)]
    pub stack: Vec<DialogFrame>,
    #[serde(default)]
    pub values: S,
}

impl<S: Default> ConversationState<S> {
    pub fn is_active(&self) -> bool {
        !self.stack.is_empty()
    }

    pub fn active_dialog(&self) -> Option<&str> {
        self.stack.last().map(|f| f.dialog_id.as_str())
    }

    /// Drops the stack and every slot value.
    pub fn reset(&mut self) {
        self.stack.clear();
        self.values = S::default();
    }
}
