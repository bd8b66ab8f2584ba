//! Create-event waterfall and its sub-dialogs.
//!
//! Slot order: attendees, title, content, start date, start time,
//! duration, location, then a summary and an explicit yes/no before the
//! calendar backend is called. A "no" hands over to the recreate dialog,
//! which clears one field group and restarts this waterfall from the top.

use chrono::Duration;
use futures::future::BoxFuture;
use serde_json::json;
use tracing::{info, warn};

use super::resolve::{absorb, resolve_end, resolve_start};
use super::service::NewEvent;
use super::slots::{
    collect_slot, default_duration_secs, default_start_offset_days, Slot, SlotDecision,
    SUMMARY_ATTENDEE_LIMIT,
};
use super::{
    CREATE_EVENT, FIND_CONTACT, GET_RECREATE_INFO, SHOW_REST_PARTICIPANTS, UPDATE_DURATION,
    UPDATE_START_DATE, UPDATE_START_TIME,
};
use crate::dialog::{
    DialogOptions, Prompt, PromptKind, Step, StepContext, StepOutcome, StepValue, Waterfall,
};
use crate::recognizer::replies::RecreateField;
use crate::responses::{self, speech_list};
use crate::skills::{Services, SkillState};

type Cx<'c> = StepContext<'c, Services, SkillState>;
type Out<'r> = BoxFuture<'r, anyhow::Result<StepOutcome>>;

pub fn dialogs() -> Vec<Waterfall<Services, SkillState>> {
    vec![
        Waterfall::new(
            CREATE_EVENT,
            vec![
                Step::new("collect_attendees", collect_attendees),
                Step::new("collect_title", collect_title),
                Step::new("after_title", after_title),
                Step::new("collect_content", collect_content),
                Step::new("after_content", after_content),
                Step::new("collect_start_date", collect_start_date),
                Step::new("collect_start_time", collect_start_time),
                Step::new("collect_duration", collect_duration),
                Step::new("collect_location", collect_location),
                Step::new("after_location", after_location),
                Step::new("confirm_before_create", confirm_before_create),
                Step::new("confirm_prompt", confirm_prompt),
                Step::new("create", create),
            ],
        ),
        Waterfall::new(
            UPDATE_START_DATE,
            vec![
                Step::new("ask_start_date", ask_start_date),
                Step::new("after_start_date", after_start_date),
            ],
        ),
        Waterfall::new(
            UPDATE_START_TIME,
            vec![
                Step::new("ask_start_time", ask_start_time),
                Step::new("after_start_time", after_start_time),
            ],
        ),
        Waterfall::new(
            UPDATE_DURATION,
            vec![
                Step::new("ask_duration", ask_duration),
                Step::new("after_duration", after_duration),
            ],
        ),
        Waterfall::new(
            GET_RECREATE_INFO,
            vec![
                Step::new("ask_recreate", ask_recreate),
                Step::new("after_recreate", after_recreate),
            ],
        ),
        Waterfall::new(
            SHOW_REST_PARTICIPANTS,
            vec![
                Step::new("ask_show_rest", ask_show_rest),
                Step::new("show_rest", show_rest),
            ],
        ),
    ]
}

// ── Create-event steps ───────────────────────────────────

fn collect_attendees<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        let defaults = &cx.services.calendar_config.defaults;
        match collect_slot(Slot::Attendees, &cx.values.event, defaults) {
            SlotDecision::AlreadyFilled => Ok(StepOutcome::next()),
            _ => Ok(StepOutcome::begin(
                FIND_CONTACT,
                DialogOptions::FindContact {
                    ask_when_empty: true,
                },
            )),
        }
    })
}

fn collect_title<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        let config = &cx.services.calendar_config;
        match collect_slot(Slot::Title, &cx.values.event, &config.defaults) {
            SlotDecision::AlreadyFilled => Ok(StepOutcome::next()),
            SlotDecision::FillFromDefault => {
                cx.values.event.title = Some(cx.services.default_title());
                Ok(StepOutcome::next())
            }
            _ => {
                let names = cx.values.event.attendee_display_names();
                let text = if names.is_empty() {
                    cx.services.say(responses::NO_TITLE_SHORT)
                } else {
                    cx.services.render(
                        responses::NO_TITLE,
                        json!({ "participants": speech_list(&names) }),
                    )
                };
                Ok(StepOutcome::Prompt(Prompt::text(text)))
            }
        }
    })
}

fn after_title<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        if let StepValue::Text(reply) = cx.take_result() {
            cx.values.event.title = Some(if cx.services.is_skip(&reply) {
                cx.services.default_title()
            } else {
                reply
            });
        }
        Ok(StepOutcome::next())
    })
}

fn collect_content<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        let defaults = &cx.services.calendar_config.defaults;
        match collect_slot(Slot::Content, &cx.values.event, defaults) {
            SlotDecision::AlreadyFilled => Ok(StepOutcome::next()),
            SlotDecision::FillFromDefault => {
                cx.values.event.content = Some(defaults.content.value.clone().unwrap_or_default());
                Ok(StepOutcome::next())
            }
            _ => Ok(StepOutcome::Prompt(Prompt::text(
                cx.services.say(responses::NO_CONTENT),
            ))),
        }
    })
}

fn after_content<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        if let StepValue::Text(reply) = cx.take_result() {
            cx.values.event.content = Some(if cx.services.is_skip(&reply) {
                cx.services
                    .calendar_config
                    .defaults
                    .content
                    .value
                    .clone()
                    .unwrap_or_default()
            } else {
                reply
            });
        }
        Ok(StepOutcome::next())
    })
}

fn collect_start_date<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        let defaults = &cx.services.calendar_config.defaults;
        match collect_slot(Slot::StartDate, &cx.values.event, defaults) {
            SlotDecision::AlreadyFilled => Ok(StepOutcome::next()),
            SlotDecision::FillFromDefault => {
                let day = cx.services.zone.local(cx.now)
                    + Duration::days(default_start_offset_days(defaults));
                cx.values.event.start_date = vec![day];
                Ok(StepOutcome::next())
            }
            _ => Ok(StepOutcome::begin(UPDATE_START_DATE, DialogOptions::None)),
        }
    })
}

fn collect_start_time<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        let defaults = &cx.services.calendar_config.defaults;
        let decision = collect_slot(Slot::StartTime, &cx.values.event, defaults);
        if decision == SlotDecision::AlreadyFilled {
            return Ok(StepOutcome::next());
        }
        resolve_start(&mut cx.values.event, cx.services.zone, cx.now);
        if cx.values.event.start_utc.is_some() {
            return Ok(StepOutcome::next());
        }
        Ok(StepOutcome::begin(UPDATE_START_TIME, DialogOptions::None))
    })
}

fn collect_duration<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        let zone = cx.services.zone;
        if resolve_end(&mut cx.values.event, zone) {
            return Ok(StepOutcome::next());
        }
        let defaults = &cx.services.calendar_config.defaults;
        match collect_slot(Slot::Duration, &cx.values.event, defaults) {
            SlotDecision::FillFromDefault => {
                cx.values.event.duration_secs = default_duration_secs(defaults);
                resolve_end(&mut cx.values.event, zone);
                Ok(StepOutcome::next())
            }
            _ => Ok(StepOutcome::begin(UPDATE_DURATION, DialogOptions::None)),
        }
    })
}

fn collect_location<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        let defaults = &cx.services.calendar_config.defaults;
        match collect_slot(Slot::Location, &cx.values.event, defaults) {
            SlotDecision::AlreadyFilled => Ok(StepOutcome::next()),
            SlotDecision::FillFromDefault => {
                cx.values.event.location =
                    Some(defaults.location.value.clone().unwrap_or_default());
                Ok(StepOutcome::next())
            }
            _ => Ok(StepOutcome::Prompt(Prompt::text(
                cx.services.say(responses::NO_LOCATION),
            ))),
        }
    })
}

fn after_location<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        if let StepValue::Text(reply) = cx.take_result() {
            cx.values.event.location = Some(if cx.services.is_skip(&reply) {
                cx.services
                    .calendar_config
                    .defaults
                    .location
                    .value
                    .clone()
                    .unwrap_or_default()
            } else {
                reply
            });
        }
        Ok(StepOutcome::next())
    })
}

fn confirm_before_create<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        let event = &mut cx.values.event;
        event.recreate = None;
        let (Some(start), Some(end)) = (event.start_utc, event.end_utc) else {
            anyhow::bail!("reached confirmation without a resolved start and end");
        };

        let names = event.attendee_display_names();
        let shown: Vec<String> = names.iter().take(SUMMARY_ATTENDEE_LIMIT).cloned().collect();
        let summary = cx.services.render(
            responses::CONFIRM_CREATE,
            json!({
                "subject": event.title.clone().unwrap_or_default(),
                "start": cx.services.spoken_time(start),
                "end": cx.services.spoken_time(end),
                "location": event.location.clone().unwrap_or_default(),
                "attendees": speech_list(&shown),
            }),
        );
        cx.send(summary);

        if names.len() > SUMMARY_ATTENDEE_LIMIT {
            return Ok(StepOutcome::begin(SHOW_REST_PARTICIPANTS, DialogOptions::None));
        }
        Ok(StepOutcome::next())
    })
}

fn confirm_prompt<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        Ok(StepOutcome::Prompt(
            Prompt::confirm(cx.services.say(responses::CONFIRM_CREATE_PROMPT))
                .with_retry(cx.services.say(responses::CONFIRM_CREATE_FAILED)),
        ))
    })
}

fn create<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        if cx.take_result() != StepValue::Confirmed(true) {
            return Ok(StepOutcome::replace(GET_RECREATE_INFO, DialogOptions::None));
        }

        let event = &cx.values.event;
        let (Some(start), Some(end)) = (event.start_utc, event.end_utc) else {
            anyhow::bail!("confirmed an event without a resolved start and end");
        };
        let request = NewEvent {
            title: event.title.clone().unwrap_or_default(),
            content: event.content.clone().unwrap_or_default(),
            location: event.location.clone().unwrap_or_default(),
            start,
            end,
            attendees: event.attendees.clone(),
        };

        match cx.services.calendar.create_event(request).await {
            Ok(Some(created)) => {
                info!("Created event {} starting {}", created.id, created.start);
                let text = cx.services.render(
                    responses::EVENT_CREATED,
                    json!({
                        "subject": created.title,
                        "start": cx.services.spoken_time(created.start),
                    }),
                );
                cx.send(text);
                cx.values.event = Default::default();
                Ok(StepOutcome::end())
            }
            Ok(None) => {
                warn!("Calendar backend returned no event");
                cx.send(cx.services.say(responses::EVENT_CREATION_FAILED));
                Ok(StepOutcome::replace(CREATE_EVENT, DialogOptions::None))
            }
            Err(e) => {
                warn!("Calendar backend failed to create the event: {e:#}");
                cx.send(cx.services.say(responses::EVENT_CREATION_FAILED));
                Ok(StepOutcome::replace(CREATE_EVENT, DialogOptions::None))
            }
        }
    })
}

// ── Start date ───────────────────────────────────────────

fn ask_start_date<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        Ok(StepOutcome::Prompt(
            Prompt::new(PromptKind::Date, cx.services.say(responses::NO_START_DATE))
                .with_retry(cx.services.say(responses::NO_START_DATE_RETRY)),
        ))
    })
}

fn after_start_date<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        if let StepValue::DateTimes(found) = cx.take_result() {
            let local_now = cx.services.zone.local(cx.now);
            let absorbed = absorb(&found, cx.activity.text(), local_now);
            let event = &mut cx.values.event;
            if absorbed.dates.is_empty() {
                // "at 3" answered to the date question: today.
                event.start_date.push(local_now);
            }
            event.start_date.extend(absorbed.dates);
            event.start_time.extend(absorbed.times);
        }
        Ok(StepOutcome::end())
    })
}

// ── Start time ───────────────────────────────────────────

fn ask_start_time<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        Ok(StepOutcome::Prompt(
            Prompt::new(PromptKind::Time, cx.services.say(responses::NO_START_TIME))
                .with_retry(cx.services.say(responses::NO_START_TIME_RETRY)),
        ))
    })
}

fn after_start_time<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        if let StepValue::DateTimes(found) = cx.take_result() {
            let local_now = cx.services.zone.local(cx.now);
            let absorbed = absorb(&found, cx.activity.text(), local_now);
            let event = &mut cx.values.event;
            event.start_time.extend(absorbed.times);
            resolve_start(event, cx.services.zone, cx.now);
        }
        if cx.values.event.start_utc.is_none() {
            cx.values.event.start_time.clear();
            return Ok(StepOutcome::replace(UPDATE_START_TIME, DialogOptions::None));
        }
        Ok(StepOutcome::end())
    })
}

// ── Duration ─────────────────────────────────────────────

fn ask_duration<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        Ok(StepOutcome::Prompt(
            Prompt::new(PromptKind::Duration, cx.services.say(responses::NO_DURATION))
                .with_retry(cx.services.say(responses::NO_DURATION_RETRY)),
        ))
    })
}

fn after_duration<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        if let StepValue::Duration(secs) = cx.take_result() {
            if secs > 0 {
                cx.values.event.duration_secs = secs;
            }
        }
        if !resolve_end(&mut cx.values.event, cx.services.zone) {
            return Ok(StepOutcome::replace(UPDATE_DURATION, DialogOptions::None));
        }
        Ok(StepOutcome::end())
    })
}

// ── Recreate ─────────────────────────────────────────────

fn ask_recreate<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        Ok(StepOutcome::Prompt(
            Prompt::new(PromptKind::Recreate, cx.services.say(responses::GET_RECREATE_INFO))
                .with_retry(cx.services.say(responses::GET_RECREATE_INFO_RETRY)),
        ))
    })
}

fn after_recreate<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        let StepValue::Recreate(field) = cx.take_result() else {
            anyhow::bail!("recreate prompt resumed without a field");
        };
        if field == RecreateField::Cancel {
            cx.send(cx.services.say(responses::ACTION_ENDED));
            cx.values.event = Default::default();
            return Ok(StepOutcome::CancelAll);
        }
        info!("Re-collecting {}", field.label());
        cx.values.event.apply_recreate(field);
        Ok(StepOutcome::replace(CREATE_EVENT, DialogOptions::None))
    })
}

// ── Attendee overflow ────────────────────────────────────

fn ask_show_rest<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        Ok(StepOutcome::Prompt(Prompt::confirm(
            cx.services.say(responses::SHOW_REST_PARTICIPANTS),
        )))
    })
}

fn show_rest<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        if cx.take_result() == StepValue::Confirmed(true) {
            let rest: Vec<String> = cx
                .values
                .event
                .attendee_display_names()
                .into_iter()
                .skip(SUMMARY_ATTENDEE_LIMIT)
                .collect();
            cx.send(speech_list(&rest));
        }
        Ok(StepOutcome::end())
    })
}
