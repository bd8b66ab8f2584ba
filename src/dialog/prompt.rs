use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::{PromptKind, StepValue};
use crate::recognizer::replies::{recognize_choice, recognize_confirm, recognize_recreate};
use crate::recognizer::{DateTimeParser, UserZone};

/// Recognizes the user's answer to a suspended prompt. `None` means the
/// reply did not fit the prompt and the retry text should be sent.
#[derive(Clone)]
pub struct ReplyRecognizer {
    parser: Arc<dyn DateTimeParser>,
    zone: UserZone,
}

impl ReplyRecognizer {
    pub fn new(parser: Arc<dyn DateTimeParser>, zone: UserZone) -> Self {
        Self { parser, zone }
    }

    pub fn recognize(
        &self,
        kind: &PromptKind,
        text: &str,
        locale: &str,
        now: DateTime<Utc>,
    ) -> Option<StepValue> {
        let text = text.trim();
        if text.is_empty() {
            return None;
        }

        match kind {
            PromptKind::Text => Some(StepValue::Text(text.to_string())),
            PromptKind::Date => {
                let found = self.parser.parse(text, locale, self.zone.local(now));
                (!found.is_empty()).then_some(StepValue::DateTimes(found))
            }
            PromptKind::Time => {
                let found: Vec<_> = self
                    .parser
                    .parse(text, locale, self.zone.local(now))
                    .into_iter()
                    .filter(|r| r.contains_time())
                    .collect();
                (!found.is_empty()).then_some(StepValue::DateTimes(found))
            }
            PromptKind::Duration => self
                .parser
                .parse_duration(text, locale)
                .map(StepValue::Duration),
            PromptKind::Confirm => recognize_confirm(text).map(StepValue::Confirmed),
            PromptKind::Choice { options } => {
                recognize_choice(text, options).map(StepValue::Choice)
            }
            PromptKind::Recreate => recognize_recreate(text).map(StepValue::Recreate),
        }
    }
}
