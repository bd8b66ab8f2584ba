//! Phone skill: places an outgoing call.
//!
//! The recipient is either a literal phone number or a contact name. A
//! name is resolved through the contacts backend, then one of the
//! contact's numbers is picked. The skill does not dial itself: it emits
//! an `OutgoingCall` event activity for the client to act upon.

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::activity::{Activity, SemanticAction};
use crate::dialog::{
    DialogOptions, DialogSet, Prompt, Step, StepContext, StepOutcome, StepValue, Waterfall,
};
use crate::recognizer::replies::ChoiceOption;
use crate::recognizer::RecognizerResult;
use crate::responses::{self, speech_list};
use crate::skills::contacts::{Contact, PhoneNumber};
use crate::skills::{Services, SkillState};

pub const OUTGOING_CALL: &str = "outgoing_call";

/// Name of the event activity carrying the call.
pub const OUTGOING_CALL_EVENT: &str = "OutgoingCall";

/// A call to be placed by the client.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutgoingCall {
    pub number: String,
    /// `None` when the user dictated a number that is not in the
    /// directory. Its phone list is cut down to the number being called.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<Contact>,
    /// RFC 3966 URI, empty when the number has no country code.
    #[serde(default)]
    pub uri: String,
}

impl OutgoingCall {
    pub fn new(number: &str, contact: Option<Contact>) -> Self {
        let contact = contact.map(|mut c| {
            c.phones.retain(|p| p.number == number);
            c
        });
        Self {
            number: number.to_string(),
            contact,
            uri: tel_uri(number),
        }
    }

    /// Who the confirmation message names.
    pub fn recipient(&self) -> &str {
        self.contact
            .as_ref()
            .map(|c| c.name.as_str())
            .unwrap_or(&self.number)
    }
}

/// `tel:+<digits>` for a global number, `""` otherwise.
pub fn tel_uri(number: &str) -> String {
    let number = number.trim();
    let Some(rest) = number.strip_prefix('+') else {
        return String::new();
    };
    let digits: String = rest.chars().filter(char::is_ascii_digit).collect();
    let only_separators = rest
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, ' ' | '-' | '.' | '(' | ')'));
    if digits.is_empty() || !only_separators {
        return String::new();
    }
    format!("tel:+{digits}")
}

/// True when `text` reads as a dialable number rather than a name.
pub fn looks_like_number(text: &str) -> bool {
    let text = text.trim();
    let digits = text.chars().filter(char::is_ascii_digit).count();
    digits >= 3
        && text
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | ' ' | '-' | '.' | '(' | ')'))
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallSlots {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact_query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contact: Option<Contact>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contact_choices: Vec<Contact>,
}

impl CallSlots {
    fn set_recipient(&mut self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        if looks_like_number(text) {
            self.phone_number = Some(text.to_string());
        } else {
            self.contact_query = Some(text.to_string());
        }
    }

    fn has_recipient(&self) -> bool {
        self.contact_query.is_some() || self.phone_number.is_some() || self.contact.is_some()
    }
}

/// `contactName` / `phoneNumber` entities of the phone NLU model.
pub fn digest(slots: &mut CallSlots, result: &RecognizerResult) {
    if let Some(number) = result.entities.first("phoneNumber") {
        slots.phone_number = Some(number.trim().to_string());
    } else if let Some(name) = result.entities.first("contactName") {
        slots.contact_query = Some(name.trim().to_string());
    }
}

pub fn digest_semantic_action(slots: &mut CallSlots, action: &SemanticAction) {
    if let Some(number) = action.slot_text("phoneNumber") {
        slots.phone_number = Some(number.trim().to_string());
    } else if let Some(name) = action.slot_text("contactPerson") {
        slots.set_recipient(name);
    }
}

// ── Dialog ───────────────────────────────────────────────

type Cx<'c> = StepContext<'c, Services, SkillState>;
type Out<'r> = BoxFuture<'r, anyhow::Result<StepOutcome>>;

pub fn register(set: &mut DialogSet<Services, SkillState>) {
    set.add(Waterfall::new(
        OUTGOING_CALL,
        vec![
            Step::new("ask_recipient", ask_recipient),
            Step::new("resolve_contact", resolve_contact),
            Step::new("after_contact_choice", after_contact_choice),
            Step::new("choose_number", choose_number),
            Step::new("after_number_choice", after_number_choice),
            Step::new("execute_call", execute_call),
        ],
    ));
}

fn ask_recipient<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        if cx.values.call.has_recipient() {
            return Ok(StepOutcome::next());
        }
        Ok(StepOutcome::Prompt(Prompt::text(
            cx.services.say(responses::CONTACT_PROMPT),
        )))
    })
}

fn resolve_contact<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        if let StepValue::Text(reply) = cx.take_result() {
            cx.values.call.set_recipient(&reply);
        }
        let call = &mut cx.values.call;
        if call.phone_number.is_some() || call.contact.is_some() {
            return Ok(StepOutcome::next());
        }
        let Some(query) = call.contact_query.clone() else {
            return Ok(StepOutcome::replace(OUTGOING_CALL, DialogOptions::None));
        };

        let found = cx.services.contacts.find_contacts(&query).await?;
        debug!("{} contact(s) match '{query}'", found.len());
        match found.as_slice() {
            [] => {
                let text = cx
                    .services
                    .render(responses::CONTACT_NOT_FOUND, json!({ "name": query }));
                cx.send(text);
                cx.values.call = CallSlots::default();
                Ok(StepOutcome::replace(OUTGOING_CALL, DialogOptions::None))
            }
            [only] => {
                cx.values.call.contact = Some(only.clone());
                Ok(StepOutcome::next())
            }
            several => {
                let labels: Vec<String> = several
                    .iter()
                    .enumerate()
                    .map(|(i, c)| format!("{}. {}", i + 1, c.name))
                    .collect();
                let options = several.iter().map(|c| ChoiceOption::new(&c.name)).collect();
                let text = cx.services.render(
                    responses::CHOOSE_CONTACT,
                    json!({ "name": query, "options": speech_list(&labels) }),
                );
                cx.values.call.contact_choices = several.to_vec();
                Ok(StepOutcome::Prompt(Prompt::choice(text, options)))
            }
        }
    })
}

fn after_contact_choice<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        if let StepValue::Choice(index) = cx.take_result() {
            let choices = std::mem::take(&mut cx.values.call.contact_choices);
            let chosen = choices
                .into_iter()
                .nth(index)
                .ok_or_else(|| anyhow::anyhow!("contact choice {index} out of range"))?;
            cx.values.call.contact = Some(chosen);
        }
        Ok(StepOutcome::next())
    })
}

fn number_label(phone: &PhoneNumber) -> String {
    if phone.kind.is_empty() {
        phone.number.clone()
    } else {
        format!("{} {}", phone.kind, phone.number)
    }
}

fn choose_number<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        if cx.values.call.phone_number.is_some() {
            return Ok(StepOutcome::next());
        }
        let Some(contact) = cx.values.call.contact.clone() else {
            anyhow::bail!("no contact resolved before choosing a number");
        };
        match contact.phones.as_slice() {
            [] => {
                let text = cx.services.render(
                    responses::CONTACT_HAS_NO_NUMBER,
                    json!({ "name": contact.name }),
                );
                cx.send(text);
                cx.values.call = CallSlots::default();
                Ok(StepOutcome::end())
            }
            [only] => {
                cx.values.call.phone_number = Some(only.number.clone());
                Ok(StepOutcome::next())
            }
            several => {
                let labels: Vec<String> = several.iter().map(number_label).collect();
                let options = several
                    .iter()
                    .map(|p| ChoiceOption {
                        value: p.number.clone(),
                        synonyms: (!p.kind.is_empty())
                            .then(|| p.kind.clone())
                            .into_iter()
                            .collect(),
                    })
                    .collect();
                let text = cx.services.render(
                    responses::CHOOSE_PHONE_NUMBER,
                    json!({ "name": contact.name, "options": speech_list(&labels) }),
                );
                Ok(StepOutcome::Prompt(Prompt::choice(text, options)))
            }
        }
    })
}

fn after_number_choice<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        if let StepValue::Choice(index) = cx.take_result() {
            let number = cx
                .values
                .call
                .contact
                .as_ref()
                .and_then(|c| c.phones.get(index))
                .map(|p| p.number.clone())
                .ok_or_else(|| anyhow::anyhow!("phone choice {index} out of range"))?;
            cx.values.call.phone_number = Some(number);
        }
        Ok(StepOutcome::next())
    })
}

fn execute_call<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        let slots = std::mem::take(&mut cx.values.call);
        let Some(number) = slots.phone_number else {
            anyhow::bail!("no phone number resolved before calling");
        };
        let call = OutgoingCall::new(&number, slots.contact);
        info!("Placing call to {}", call.recipient());

        cx.send_activity(Activity::event(
            OUTGOING_CALL_EVENT,
            serde_json::to_value(&call)?,
        ));
        let text = cx.services.render(
            responses::EXECUTE_CALL,
            json!({ "recipient": call.recipient() }),
        );
        cx.send(text);
        Ok(StepOutcome::end())
    })
}
