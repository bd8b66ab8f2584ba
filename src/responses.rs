//! Response templates.
//!
//! Dialog steps never build user-facing sentences inline: they ask for a
//! template by key and pass the data to substitute (`{name}` placeholders
//! filled from a JSON object). Missing placeholders render as empty.

use std::collections::HashMap;

use serde_json::Value;

pub const NO_TITLE: &str = "NoTitle";
pub const NO_TITLE_SHORT: &str = "NoTitleShort";
pub const NO_CONTENT: &str = "NoContent";
pub const NO_LOCATION: &str = "NoLocation";
pub const NO_START_DATE: &str = "NoStartDate";
pub const NO_START_DATE_RETRY: &str = "NoStartDateRetry";
pub const NO_START_TIME: &str = "NoStartTime";
pub const NO_START_TIME_RETRY: &str = "NoStartTimeRetry";
pub const NO_DURATION: &str = "NoDuration";
pub const NO_DURATION_RETRY: &str = "NoDurationRetry";
pub const NO_ATTENDEES: &str = "NoAttendees";
pub const CONTACT_NOT_FOUND: &str = "ContactNotFound";
pub const CHOOSE_CONTACT: &str = "ChooseContact";
pub const CONFIRM_CREATE: &str = "ConfirmCreate";
pub const CONFIRM_CREATE_PROMPT: &str = "ConfirmCreatePrompt";
pub const CONFIRM_CREATE_FAILED: &str = "ConfirmCreateFailed";
pub const SHOW_REST_PARTICIPANTS: &str = "ShowRestParticipantsPrompt";
pub const EVENT_CREATED: &str = "EventCreated";
pub const EVENT_CREATION_FAILED: &str = "EventCreationFailed";
pub const GET_RECREATE_INFO: &str = "GetRecreateInfo";
pub const GET_RECREATE_INFO_RETRY: &str = "GetRecreateInfoRetry";
pub const NO_UPDATE_START_TIME: &str = "NoUpdateStartTime";
pub const EVENT_NOT_FOUND: &str = "EventWithStartTimeNotFound";
pub const MEETINGS_TO_CHOOSE: &str = "MultipleEventsStartAtSameTime";
pub const NOT_EVENT_ORGANIZER: &str = "NotEventOrganizer";
pub const NO_NEW_TIME: &str = "NoNewTime";
pub const NO_NEW_TIME_RETRY: &str = "NoNewTimeRetry";
pub const CONFIRM_UPDATE: &str = "ConfirmUpdate";
pub const CONFIRM_UPDATE_FAILED: &str = "ConfirmUpdateFailed";
pub const EVENT_UPDATED: &str = "EventUpdated";
pub const EVENT_UPDATE_FAILED: &str = "EventUpdateFailed";
pub const SEARCH_PROMPT: &str = "SearchPrompt";
pub const SEARCH_NO_RESULT: &str = "NoResultPrompt";
pub const CONTACT_PROMPT: &str = "ContactPrompt";
pub const CHOOSE_PHONE_NUMBER: &str = "ChoosePhoneNumber";
pub const CONTACT_HAS_NO_NUMBER: &str = "ContactHasNoPhoneNumber";
pub const EXECUTE_CALL: &str = "ExecuteCall";
pub const ACTION_ENDED: &str = "ActionEnded";
pub const DID_NOT_UNDERSTAND: &str = "DidntUnderstandMessage";
pub const ERROR_MESSAGE: &str = "ErrorMessage";
pub const CONFLICT_MESSAGE: &str = "ConflictMessage";

const DEFAULT_TEMPLATES: &[(&str, &str)] = &[
    (NO_TITLE, "What's the subject of your meeting with {participants}?"),
    (NO_TITLE_SHORT, "What's the subject of the meeting?"),
    (NO_CONTENT, "What's the meeting about? Say \"skip\" to leave it empty."),
    (NO_LOCATION, "Where will the meeting take place? Say \"skip\" if there is no location."),
    (NO_START_DATE, "What day should the meeting be on?"),
    (NO_START_DATE_RETRY, "Sorry, I didn't get the date. Which day?"),
    (NO_START_TIME, "What time should it start?"),
    (NO_START_TIME_RETRY, "Sorry, I didn't get the time. When should it start?"),
    (NO_DURATION, "How long should the meeting be?"),
    (NO_DURATION_RETRY, "Sorry, how long? For example \"30 minutes\" or \"an hour\"."),
    (NO_ATTENDEES, "Who would you like to invite?"),
    (CONTACT_NOT_FOUND, "I couldn't find anyone called {name}."),
    (CHOOSE_CONTACT, "Which {name} did you mean? {options}"),
    (
        CONFIRM_CREATE,
        "Here's the meeting: {subject}, {start} to {end}, at {location}, with {attendees}.",
    ),
    (CONFIRM_CREATE_PROMPT, "Shall I create it?"),
    (CONFIRM_CREATE_FAILED, "Please answer yes or no. Shall I create the meeting?"),
    (SHOW_REST_PARTICIPANTS, "Do you want to hear the other participants?"),
    (EVENT_CREATED, "Your meeting \"{subject}\" is booked for {start}."),
    (
        EVENT_CREATION_FAILED,
        "Sorry, I couldn't create the meeting. Let's go over it once more.",
    ),
    (
        GET_RECREATE_INFO,
        "What would you like to change: subject, content, time, duration, location or participants? You can also cancel.",
    ),
    (
        GET_RECREATE_INFO_RETRY,
        "Please pick subject, content, time, duration, location, participants or cancel.",
    ),
    (NO_UPDATE_START_TIME, "Which meeting do you want to move? Tell me its title or start time."),
    (EVENT_NOT_FOUND, "I couldn't find that meeting. What's its title or start time?"),
    (MEETINGS_TO_CHOOSE, "I found {count} meetings: {options}. Which one?"),
    (NOT_EVENT_ORGANIZER, "You're not the organizer of that meeting, so I can't move it."),
    (NO_NEW_TIME, "When should it start instead?"),
    (NO_NEW_TIME_RETRY, "Sorry, I didn't get the new time. When should it start?"),
    (CONFIRM_UPDATE, "I'll move \"{subject}\" to {start}. Is that right?"),
    (CONFIRM_UPDATE_FAILED, "Please answer yes or no. Should I move the meeting?"),
    (EVENT_UPDATED, "Done. \"{subject}\" now starts at {start}."),
    (EVENT_UPDATE_FAILED, "Sorry, I couldn't move the meeting. Let's try that again."),
    (SEARCH_PROMPT, "What would you like to know?"),
    (SEARCH_NO_RESULT, "Sorry, I couldn't find an answer to that."),
    (CONTACT_PROMPT, "Who would you like to call?"),
    (CHOOSE_PHONE_NUMBER, "{name} has several numbers: {options}. Which one?"),
    (CONTACT_HAS_NO_NUMBER, "{name} has no phone number I could call."),
    (EXECUTE_CALL, "Calling {recipient}."),
    (ACTION_ENDED, "Okay, I've cancelled that."),
    (DID_NOT_UNDERSTAND, "Sorry, I didn't understand that."),
    (ERROR_MESSAGE, "Sorry, something went wrong. Let's start over."),
    (CONFLICT_MESSAGE, "Sorry, that message crossed with another one. Please try again."),
];

#[derive(Debug, Clone)]
pub struct Templates {
    entries: HashMap<String, String>,
}

impl Default for Templates {
    fn default() -> Self {
        Self {
            entries: DEFAULT_TEMPLATES
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }
}

impl Templates {
    /// Overrides (or adds) a single template.
    pub fn set(&mut self, key: &str, template: &str) {
        self.entries.insert(key.to_string(), template.to_string());
    }

    /// Renders `key` with `data`. An unknown key renders as the key itself
    /// so a missing template shows up in the conversation instead of
    /// failing the turn.
    pub fn render(&self, key: &str, data: &Value) -> String {
        match self.entries.get(key) {
            Some(template) => substitute(template, data),
            None => key.to_string(),
        }
    }

    pub fn get(&self, key: &str) -> String {
        self.render(key, &Value::Null)
    }
}

fn substitute(template: &str, data: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let name = &after[..close];
                match data.get(name) {
                    Some(Value::String(s)) => out.push_str(s),
                    Some(Value::Null) | None => {}
                    Some(other) => out.push_str(&other.to_string()),
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// "a", "a and b", "a, b and c".
pub fn speech_list(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [one] => one.clone(),
        [init @ .., last] => format!("{} and {last}", init.join(", ")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_substitutes_placeholders() {
        let templates = Templates::default();
        let text = templates.render(CONTACT_NOT_FOUND, &json!({"name": "Zed"}));
        assert_eq!(text, "I couldn't find anyone called Zed.");
    }

    #[test]
    fn test_render_missing_value_is_empty() {
        let mut templates = Templates::default();
        templates.set("Greeting", "Hi {name}!");
        assert_eq!(templates.render("Greeting", &json!({})), "Hi !");
        assert_eq!(templates.render("Greeting", &json!({"name": 3})), "Hi 3!");
    }

    #[test]
    fn test_unknown_key_renders_key() {
        assert_eq!(Templates::default().get("Nope"), "Nope");
    }

    #[test]
    fn test_unclosed_brace_is_literal() {
        let mut templates = Templates::default();
        templates.set("Odd", "50% {off");
        assert_eq!(templates.get("Odd"), "50% {off");
    }

    #[test]
    fn test_speech_list() {
        let names = |v: &[&str]| v.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(speech_list(&names(&[])), "");
        assert_eq!(speech_list(&names(&["a"])), "a");
        assert_eq!(speech_list(&names(&["a", "b"])), "a and b");
        assert_eq!(speech_list(&names(&["a", "b", "c"])), "a, b and c");
    }
}
