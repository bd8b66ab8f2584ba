//! Resolves attendee names into addresses, one name per pass.

use futures::future::BoxFuture;
use serde_json::json;
use tracing::debug;

use super::service::Attendee;
use super::FIND_CONTACT;
use crate::dialog::{DialogOptions, Prompt, Step, StepContext, StepOutcome, StepValue, Waterfall};
use crate::recognizer::replies::ChoiceOption;
use crate::responses::{self, speech_list};
use crate::skills::contacts::Contact;
use crate::skills::{Services, SkillState};

type Cx<'c> = StepContext<'c, Services, SkillState>;
type Out<'r> = BoxFuture<'r, anyhow::Result<StepOutcome>>;

pub fn dialogs() -> Vec<Waterfall<Services, SkillState>> {
    vec![Waterfall::new(
        FIND_CONTACT,
        vec![
            Step::new("ask_names", ask_names),
            Step::new("take_names", take_names),
            Step::new("resolve_next", resolve_next),
            Step::new("after_choice", after_choice),
        ],
    )]
}

/// Splits "alice, bob and carol" into names.
pub fn split_names(text: &str) -> Vec<String> {
    text.replace(" and ", ",")
        .replace('&', ",")
        .split(',')
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(String::from)
        .collect()
}

fn continue_resolving() -> StepOutcome {
    StepOutcome::replace(
        FIND_CONTACT,
        DialogOptions::FindContact {
            ask_when_empty: false,
        },
    )
}

fn to_attendee(contact: &Contact) -> Attendee {
    Attendee {
        name: Some(contact.name.clone()),
        address: contact.email.clone().unwrap_or_else(|| contact.name.clone()),
    }
}

fn ask_names<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        if !cx.values.event.attendee_names.is_empty() {
            return Ok(StepOutcome::next());
        }
        match cx.options {
            DialogOptions::FindContact {
                ask_when_empty: true,
            } => Ok(StepOutcome::Prompt(Prompt::text(
                cx.services.say(responses::NO_ATTENDEES),
            ))),
            _ => Ok(StepOutcome::end()),
        }
    })
}

fn take_names<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        if let StepValue::Text(reply) = cx.take_result() {
            if cx.services.is_skip(&reply) {
                return Ok(StepOutcome::end());
            }
            cx.values.event.attendee_names = split_names(&reply);
        }
        Ok(StepOutcome::next())
    })
}

fn resolve_next<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        if cx.values.event.attendee_names.is_empty() {
            return Ok(StepOutcome::end());
        }
        let name = cx.values.event.attendee_names.remove(0);

        if name.contains('@') {
            cx.values.event.add_attendee(Attendee {
                name: None,
                address: name,
            });
            return Ok(continue_resolving());
        }

        let found = cx.services.contacts.find_contacts(&name).await?;
        debug!("{} contact(s) match '{name}'", found.len());
        match found.as_slice() {
            [] => {
                let text = cx
                    .services
                    .render(responses::CONTACT_NOT_FOUND, json!({ "name": name }));
                cx.send(text);
                Ok(continue_resolving())
            }
            [only] => {
                cx.values.event.add_attendee(to_attendee(only));
                Ok(continue_resolving())
            }
            several => {
                let labels: Vec<String> = several
                    .iter()
                    .enumerate()
                    .map(|(i, c)| match &c.email {
                        Some(email) => format!("{}. {} ({email})", i + 1, c.name),
                        None => format!("{}. {}", i + 1, c.name),
                    })
                    .collect();
                let options = several
                    .iter()
                    .map(|c| ChoiceOption {
                        value: c.name.clone(),
                        synonyms: c.email.iter().cloned().collect(),
                    })
                    .collect();
                let text = cx.services.render(
                    responses::CHOOSE_CONTACT,
                    json!({ "name": name, "options": speech_list(&labels) }),
                );
                cx.values.event.contact_choices = several.to_vec();
                Ok(StepOutcome::Prompt(Prompt::choice(text, options)))
            }
        }
    })
}

fn after_choice<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        let StepValue::Choice(index) = cx.take_result() else {
            anyhow::bail!("contact choice resumed without a selection");
        };
        let choices = std::mem::take(&mut cx.values.event.contact_choices);
        let chosen = choices
            .get(index)
            .ok_or_else(|| anyhow::anyhow!("contact choice {index} out of range"))?;
        cx.values.event.add_attendee(to_attendee(chosen));
        Ok(continue_resolving())
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::activity::Activity;
    use crate::dialog::{ConversationState, TurnStatus};
    use crate::skills::calendar::service::MemoryCalendar;
    use crate::skills::contacts::contact;
    use crate::skills::testing::{fixture, texts};

    fn directory() -> Vec<Contact> {
        vec![
            contact("Alice Smith", "alice@contoso.com", &[]),
            contact("Alice Jones", "ajones@contoso.com", &[]),
            contact("Bob Brown", "bob@contoso.com", &[]),
        ]
    }

    #[test]
    fn test_split_names() {
        assert_eq!(split_names("alice, bob and carol"), vec!["alice", "bob", "carol"]);
        assert_eq!(split_names("Bob & Eve"), vec!["Bob", "Eve"]);
        assert!(split_names(" , ").is_empty());
    }

    #[tokio::test]
    async fn test_resolves_unique_unknown_and_ambiguous_names() {
        let fx = fixture(Arc::new(MemoryCalendar::new()), directory());
        let now = Utc.with_ymd_and_hms(2024, 5, 15, 10, 0, 0).unwrap();
        let mut state = ConversationState::<SkillState>::default();

        let out = fx
            .dialogs
            .begin(
                &fx.services,
                &mut state,
                &Activity::message("invite"),
                now,
                FIND_CONTACT,
                DialogOptions::FindContact {
                    ask_when_empty: true,
                },
            )
            .await;
        assert_eq!(texts(&out.activities), vec![fx.services.say(responses::NO_ATTENDEES)]);

        let out = fx
            .dialogs
            .resume(
                &fx.services,
                &mut state,
                &Activity::message("bob, zed and alice"),
                now,
            )
            .await;
        assert_eq!(out.status, TurnStatus::Waiting);
        let sent = texts(&out.activities);
        assert_eq!(sent[0], "I couldn't find anyone called zed.");
        assert!(sent[1].starts_with("Which alice did you mean?"));
        assert_eq!(state.values.event.attendees.len(), 1);

        let out = fx
            .dialogs
            .resume(&fx.services, &mut state, &Activity::message("the second one"), now)
            .await;
        assert_eq!(out.status, TurnStatus::Complete(StepValue::None));
        let addresses: Vec<&str> = state
            .values
            .event
            .attendees
            .iter()
            .map(|a| a.address.as_str())
            .collect();
        assert_eq!(addresses, vec!["bob@contoso.com", "ajones@contoso.com"]);
        assert!(state.values.event.contact_choices.is_empty());
    }

    #[tokio::test]
    async fn test_email_address_and_skip() {
        let fx = fixture(Arc::new(MemoryCalendar::new()), directory());
        let now = Utc.with_ymd_and_hms(2024, 5, 15, 10, 0, 0).unwrap();
        let mut state = ConversationState::<SkillState>::default();
        state.values.event.attendee_names = vec!["carol@fabrikam.com".into()];

        let out = fx
            .dialogs
            .begin(
                &fx.services,
                &mut state,
                &Activity::message("invite"),
                now,
                FIND_CONTACT,
                DialogOptions::FindContact {
                    ask_when_empty: true,
                },
            )
            .await;
        assert_eq!(out.status, TurnStatus::Complete(StepValue::None));
        assert_eq!(state.values.event.attendees[0].address, "carol@fabrikam.com");

        let mut state = ConversationState::<SkillState>::default();
        fx.dialogs
            .begin(
                &fx.services,
                &mut state,
                &Activity::message("invite"),
                now,
                FIND_CONTACT,
                DialogOptions::FindContact {
                    ask_when_empty: true,
                },
            )
            .await;
        let out = fx
            .dialogs
            .resume(&fx.services, &mut state, &Activity::message("skip"), now)
            .await;
        assert_eq!(out.status, TurnStatus::Complete(StepValue::None));
        assert!(state.values.event.attendees.is_empty());
    }
}
