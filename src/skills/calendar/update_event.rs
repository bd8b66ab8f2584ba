//! Move-a-meeting waterfall: find the meeting, pick one, check the user
//! organizes it, collect the new start, confirm, update.

use chrono::{DateTime, Duration, NaiveDateTime, NaiveTime, Utc};
use futures::future::BoxFuture;
use serde_json::json;
use tracing::{info, warn};

use super::resolve::{absorb, earliest_future};
use super::service::CalendarEvent;
use super::slots::UpdateSlots;
use super::{FIND_EVENT, UPDATE_EVENT, UPDATE_NEW_START_TIME};
use crate::dialog::{
    DialogOptions, Prompt, Step, StepContext, StepOutcome, StepValue, UpdateReason, Waterfall,
};
use crate::recognizer::replies::ChoiceOption;
use crate::recognizer::{DateTimeParser, UserZone};
use crate::responses::{self, speech_list};
use crate::skills::{Services, SkillState};

type Cx<'c> = StepContext<'c, Services, SkillState>;
type Out<'r> = BoxFuture<'r, anyhow::Result<StepOutcome>>;

pub fn dialogs() -> Vec<Waterfall<Services, SkillState>> {
    vec![
        Waterfall::new(
            UPDATE_EVENT,
            vec![
                Step::new("find_event", find_event),
                Step::new("choose_event", choose_event),
                Step::new("check_organizer", check_organizer),
                Step::new("collect_new_start", collect_new_start),
                Step::new("resolve_new_start", resolve_new_start_step),
                Step::new("confirm_update", confirm_update),
                Step::new("update", update),
            ],
        ),
        Waterfall::new(
            FIND_EVENT,
            vec![
                Step::new("search", search),
                Step::new("after_search_reply", after_search_reply),
            ],
        ),
        Waterfall::new(
            UPDATE_NEW_START_TIME,
            vec![
                Step::new("ask_new_time", ask_new_time),
                Step::new("after_new_time", after_new_time),
            ],
        ),
    ]
}

/// New start for `original`. A relative move shifts the original start.
/// A date alone keeps the original clock time; a time alone keeps the
/// original day. Several candidates go through [`earliest_future`].
pub fn resolve_new_start(
    update: &UpdateSlots,
    original: &CalendarEvent,
    zone: UserZone,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    if update.move_secs != 0 {
        return Duration::try_seconds(update.move_secs)
            .and_then(|shift| original.start.checked_add_signed(shift));
    }
    let original_local = zone.local(original.start);
    let candidates: Vec<NaiveDateTime> =
        match (update.new_start_date.last(), update.new_start_time.is_empty()) {
            (None, true) => return None,
            (Some(_), true) => update
                .new_start_date
                .iter()
                .map(|d| d.date().and_time(original_local.time()))
                .collect(),
            (None, false) => update
                .new_start_time
                .iter()
                .map(|t| original_local.date().and_time(t.time()))
                .collect(),
            (Some(day), false) => update
                .new_start_time
                .iter()
                .map(|t| day.date().and_time(t.time()))
                .collect(),
        };
    let instants: Vec<DateTime<Utc>> = candidates.into_iter().map(|c| zone.to_utc(c)).collect();
    earliest_future(&instants, now)
}

/// Signed seconds for "an hour later" / "30 minutes earlier".
pub fn parse_move(parser: &dyn DateTimeParser, text: &str, locale: &str) -> Option<i64> {
    let secs = parser.parse_duration(text, locale)?;
    let lower = text.to_lowercase();
    let earlier = ["earlier", "sooner", "before"]
        .iter()
        .any(|w| lower.contains(w));
    Some(if earlier { -secs } else { secs })
}

fn describe(services: &Services, event: &CalendarEvent) -> String {
    format!("{} ({})", event.title, services.spoken_time(event.start))
}

// ── Update-event steps ───────────────────────────────────

fn find_event<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        if !cx.values.update.events.is_empty() {
            return Ok(StepOutcome::next());
        }
        Ok(StepOutcome::begin(
            FIND_EVENT,
            DialogOptions::ChooseEvent {
                reason: UpdateReason::NoEvent,
            },
        ))
    })
}

fn choose_event<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        let events = &cx.values.update.events;
        if events.len() <= 1 {
            return Ok(StepOutcome::next());
        }
        let labels: Vec<String> = events
            .iter()
            .enumerate()
            .map(|(i, e)| format!("{}. {}", i + 1, describe(cx.services, e)))
            .collect();
        let options = events.iter().map(|e| ChoiceOption::new(&e.title)).collect();
        let text = cx.services.render(
            responses::MEETINGS_TO_CHOOSE,
            json!({ "count": events.len(), "options": speech_list(&labels) }),
        );
        Ok(StepOutcome::Prompt(Prompt::choice(text, options)))
    })
}

fn check_organizer<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        if let StepValue::Choice(index) = cx.take_result() {
            let chosen = cx
                .values
                .update
                .events
                .get(index)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("meeting choice {index} out of range"))?;
            cx.values.update.events = vec![chosen];
        }

        let Some(event) = cx.values.update.events.first() else {
            anyhow::bail!("no meeting selected");
        };
        if !event.is_organizer {
            info!("Refusing to move {}: not the organizer", event.id);
            cx.send(cx.services.say(responses::NOT_EVENT_ORGANIZER));
            cx.values.update = UpdateSlots::default();
            return Ok(StepOutcome::end());
        }
        Ok(StepOutcome::next())
    })
}

fn collect_new_start<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        let update = &cx.values.update;
        if update.new_start_utc.is_some() || update.has_new_time() {
            return Ok(StepOutcome::next());
        }
        Ok(StepOutcome::begin(
            UPDATE_NEW_START_TIME,
            DialogOptions::UpdateDateTime {
                reason: UpdateReason::NotFound,
            },
        ))
    })
}

fn resolve_new_start_step<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        let update = &mut cx.values.update;
        if update.new_start_utc.is_none() {
            let Some(original) = update.events.first() else {
                anyhow::bail!("no meeting selected");
            };
            update.new_start_utc = resolve_new_start(update, original, cx.services.zone, cx.now);
        }
        if update.new_start_utc.is_none() {
            update.new_start_date.clear();
            update.new_start_time.clear();
            update.move_secs = 0;
            return Ok(StepOutcome::replace(UPDATE_EVENT, DialogOptions::None));
        }
        Ok(StepOutcome::next())
    })
}

fn confirm_update<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        let update = &cx.values.update;
        let (Some(event), Some(start)) = (update.events.first(), update.new_start_utc) else {
            anyhow::bail!("confirming a move without a meeting and new start");
        };
        let text = cx.services.render(
            responses::CONFIRM_UPDATE,
            json!({ "subject": event.title, "start": cx.services.spoken_time(start) }),
        );
        Ok(StepOutcome::Prompt(
            Prompt::confirm(text).with_retry(cx.services.say(responses::CONFIRM_UPDATE_FAILED)),
        ))
    })
}

fn update<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        if cx.take_result() != StepValue::Confirmed(true) {
            cx.send(cx.services.say(responses::ACTION_ENDED));
            cx.values.update = UpdateSlots::default();
            return Ok(StepOutcome::end());
        }

        let update = &cx.values.update;
        let (Some(event), Some(start)) = (update.events.first(), update.new_start_utc) else {
            anyhow::bail!("confirmed a move without a meeting and new start");
        };
        let id = event.id.clone();
        let end = start
            .checked_add_signed(event.end - event.start)
            .ok_or_else(|| anyhow::anyhow!("moved meeting ends out of range"))?;

        let result = cx.services.calendar.update_event_by_id(&id, start, end).await;
        match result {
            Ok(moved) => {
                info!("Moved event {} to {}", moved.id, moved.start);
                let text = cx.services.render(
                    responses::EVENT_UPDATED,
                    json!({
                        "subject": moved.title,
                        "start": cx.services.spoken_time(moved.start),
                    }),
                );
                cx.send(text);
                cx.values.update = UpdateSlots::default();
                Ok(StepOutcome::end())
            }
            Err(e) => {
                warn!("Calendar backend failed to move {id}: {e:#}");
                cx.send(cx.services.say(responses::EVENT_UPDATE_FAILED));
                Ok(StepOutcome::replace(UPDATE_EVENT, DialogOptions::None))
            }
        }
    })
}

// ── Find event ───────────────────────────────────────────

fn search<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        let zone = cx.services.zone;
        let update = &mut cx.values.update;
        let dates = std::mem::take(&mut update.original_start_date);
        let times = std::mem::take(&mut update.original_start_time);
        let title = update.title.take();

        if dates.is_empty() && times.is_empty() && title.is_none() {
            let key = match cx.options {
                DialogOptions::ChooseEvent {
                    reason: UpdateReason::NotFound,
                } => responses::EVENT_NOT_FOUND,
                _ => responses::NO_UPDATE_START_TIME,
            };
            return Ok(StepOutcome::Prompt(Prompt::text(cx.services.say(key))));
        }

        let calendar = &cx.services.calendar;
        let mut found: Vec<CalendarEvent> = Vec::new();
        if !times.is_empty() {
            let day = dates.last().map(NaiveDateTime::date);
            for time in &times {
                let at = zone.to_utc(day.unwrap_or(time.date()).and_time(time.time()));
                found.extend(calendar.get_events_by_time(at, at).await?);
            }
        } else {
            for date in &dates {
                let from = zone.to_utc(date.date().and_time(NaiveTime::MIN));
                let to = from + Duration::days(1) - Duration::seconds(1);
                found.extend(calendar.get_events_by_time(from, to).await?);
            }
        }
        if found.is_empty() {
            if let Some(title) = &title {
                found = calendar.get_events_by_title(title).await?;
            }
        }
        let mut seen = std::collections::HashSet::new();
        found.retain(|e| seen.insert(e.id.clone()));

        if found.is_empty() {
            return Ok(StepOutcome::replace(
                FIND_EVENT,
                DialogOptions::ChooseEvent {
                    reason: UpdateReason::NotFound,
                },
            ));
        }
        info!("Found {} candidate meeting(s)", found.len());
        cx.values.update.events = found;
        Ok(StepOutcome::end())
    })
}

fn after_search_reply<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        if let StepValue::Text(reply) = cx.take_result() {
            let local_now = cx.services.zone.local(cx.now);
            let found = cx.services.parser.parse(&reply, cx.locale(), local_now);
            let absorbed = absorb(&found, &reply, local_now);
            let update = &mut cx.values.update;
            if absorbed.dates.is_empty() && absorbed.times.is_empty() {
                update.title = Some(reply);
            } else {
                update.original_start_date = absorbed.dates;
                update.original_start_time = absorbed.times;
            }
        }
        Ok(StepOutcome::replace(FIND_EVENT, cx.options.clone()))
    })
}

// ── New start ────────────────────────────────────────────

fn ask_new_time<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        let key = match cx.options {
            DialogOptions::UpdateDateTime {
                reason: UpdateReason::NotADateTime,
            } => responses::NO_NEW_TIME_RETRY,
            _ => responses::NO_NEW_TIME,
        };
        Ok(StepOutcome::Prompt(Prompt::text(cx.services.say(key))))
    })
}

fn after_new_time<'r>(cx: &'r mut Cx<'_>) -> Out<'r> {
    Box::pin(async move {
        let StepValue::Text(reply) = cx.take_result() else {
            anyhow::bail!("new start prompt resumed without text");
        };
        let local_now = cx.services.zone.local(cx.now);
        let locale = cx.locale().to_string();
        let found = cx.services.parser.parse(&reply, &locale, local_now);
        let absorbed = absorb(&found, &reply, local_now);

        let update = &mut cx.values.update;
        if !absorbed.dates.is_empty() || !absorbed.times.is_empty() {
            update.new_start_date = absorbed.dates;
            update.new_start_time = absorbed.times;
            return Ok(StepOutcome::end());
        }
        if let Some(secs) = parse_move(cx.services.parser.as_ref(), &reply, &locale) {
            update.move_secs = secs;
            return Ok(StepOutcome::end());
        }
        Ok(StepOutcome::replace(
            UPDATE_NEW_START_TIME,
            DialogOptions::UpdateDateTime {
                reason: UpdateReason::NotADateTime,
            },
        ))
    })
}
