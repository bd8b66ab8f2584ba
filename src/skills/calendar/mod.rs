//! Calendar skill: create and move meetings.
//!
//! Everything the triggering utterance (or semantic action) already
//! carries is digested into slot state before a waterfall starts, so the
//! dialogs only ask for what is missing.

pub mod create_event;
pub mod find_contact;
pub mod resolve;
pub mod service;
pub mod slots;
pub mod update_event;

use chrono::{DateTime, NaiveDateTime, Utc};

use crate::activity::SemanticAction;
use crate::dialog::DialogSet;
use crate::recognizer::RecognizerResult;
use crate::skills::{Services, SkillState};

use resolve::absorb;
use slots::{EventSlots, UpdateSlots};

pub const CREATE_EVENT: &str = "create_event";
pub const FIND_CONTACT: &str = "find_contact";
pub const UPDATE_START_DATE: &str = "update_start_date";
pub const UPDATE_START_TIME: &str = "update_start_time";
pub const UPDATE_DURATION: &str = "update_duration";
pub const GET_RECREATE_INFO: &str = "get_recreate_info";
pub const SHOW_REST_PARTICIPANTS: &str = "show_rest_participants";
pub const UPDATE_EVENT: &str = "update_event";
pub const FIND_EVENT: &str = "find_event";
pub const UPDATE_NEW_START_TIME: &str = "update_new_start_time";

pub fn register(set: &mut DialogSet<Services, SkillState>) {
    for dialog in create_event::dialogs()
        .into_iter()
        .chain(find_contact::dialogs())
        .chain(update_event::dialogs())
    {
        set.add(dialog);
    }
}

/// Raw slot texts gathered from NLU entities or a semantic action.
#[derive(Debug, Default)]
pub struct EventHints {
    pub title: Option<String>,
    pub content: Option<String>,
    pub location: Option<String>,
    pub attendees: Vec<String>,
    pub start_date: Vec<String>,
    pub start_time: Vec<String>,
    pub end_date: Vec<String>,
    pub end_time: Vec<String>,
    pub duration: Option<String>,
    pub move_later: Option<String>,
    pub move_earlier: Option<String>,
}

impl EventHints {
    /// Entity groups of the calendar NLU model. `Location` overrides
    /// `MeetingRoom` when both are present.
    pub fn from_recognizer(result: &RecognizerResult) -> Self {
        let e = &result.entities;
        let owned = |group: &str| e.all(group).into_iter().map(String::from).collect();
        Self {
            title: e.first("Subject").map(String::from),
            content: None,
            location: e
                .first("Location")
                .or_else(|| e.first("MeetingRoom"))
                .map(String::from),
            attendees: owned("personName"),
            start_date: owned("FromDate"),
            start_time: owned("FromTime"),
            end_date: owned("ToDate"),
            end_time: owned("ToTime"),
            duration: e.first("Duration").map(String::from),
            move_later: e.first("MoveLaterTimeSpan").map(String::from),
            move_earlier: e.first("MoveEarlierTimeSpan").map(String::from),
        }
    }

    /// Slots of a `CreateEvent` / `UpdateEvent` semantic action.
    pub fn from_semantic_action(action: &SemanticAction) -> Self {
        let text = |name: &str| action.slot_text(name).map(String::from);
        let list = |name: &str| {
            action
                .entities
                .get(name)
                .map(|e| e.as_list())
                .unwrap_or_default()
        };
        Self {
            title: text("title"),
            content: text("content"),
            location: text("location"),
            attendees: list("attendees"),
            start_date: list("startDate"),
            start_time: list("startTime"),
            end_date: list("endDate"),
            end_time: list("endTime"),
            duration: text("duration"),
            move_later: text("moveLater"),
            move_earlier: text("moveEarlier"),
        }
    }
}

fn parse_candidates(
    services: &Services,
    texts: &[String],
    locale: &str,
    local_now: NaiveDateTime,
) -> resolve::Absorbed {
    let mut out = resolve::Absorbed::default();
    for text in texts {
        let found = services.parser.parse(text, locale, local_now);
        let absorbed = absorb(&found, text, local_now);
        out.dates.extend(absorbed.dates);
        out.times.extend(absorbed.times);
    }
    out
}

/// Pre-fills create-event slots. Marks `has_detail` when anything landed.
pub fn digest_create(
    slots: &mut EventSlots,
    hints: EventHints,
    services: &Services,
    locale: &str,
    now: DateTime<Utc>,
) {
    let local_now = services.zone.local(now);
    let mut detail = false;

    if let Some(title) = hints.title {
        slots.title = Some(title);
        detail = true;
    }
    if let Some(content) = hints.content {
        slots.content = Some(content);
        detail = true;
    }
    if let Some(location) = hints.location {
        slots.location = Some(location);
        detail = true;
    }
    if !hints.attendees.is_empty() {
        slots.attendee_names = hints.attendees;
        detail = true;
    }

    let start = parse_candidates(services, &hints.start_date, locale, local_now);
    let start_time = parse_candidates(services, &hints.start_time, locale, local_now);
    if !start.dates.is_empty() || !start.times.is_empty() || !start_time.times.is_empty() {
        detail = true;
    }
    slots.start_date.extend(start.dates);
    slots.start_time.extend(start.times);
    slots.start_time.extend(start_time.times);

    let end = parse_candidates(services, &hints.end_date, locale, local_now);
    let end_time = parse_candidates(services, &hints.end_time, locale, local_now);
    slots.end_date.extend(end.dates);
    slots.end_time.extend(end.times);
    slots.end_time.extend(end_time.times);

    if let Some(secs) = hints
        .duration
        .as_deref()
        .and_then(|d| services.parser.parse_duration(d, locale))
    {
        slots.duration_secs = secs;
        detail = true;
    }

    slots.has_detail |= detail;
}

/// Pre-fills move-event slots: the original start or title identifies
/// the meeting, the end entities or a move span describe the new start.
pub fn digest_update(
    slots: &mut UpdateSlots,
    hints: EventHints,
    services: &Services,
    locale: &str,
    now: DateTime<Utc>,
) {
    let local_now = services.zone.local(now);
    slots.title = hints.title;

    let original = parse_candidates(services, &hints.start_date, locale, local_now);
    let original_time = parse_candidates(services, &hints.start_time, locale, local_now);
    slots.original_start_date = original.dates;
    slots.original_start_time = original.times;
    slots.original_start_time.extend(original_time.times);

    let target = parse_candidates(services, &hints.end_date, locale, local_now);
    let target_time = parse_candidates(services, &hints.end_time, locale, local_now);
    slots.new_start_date = target.dates;
    slots.new_start_time = target.times;
    slots.new_start_time.extend(target_time.times);

    let span = |text: &Option<String>| {
        text.as_deref()
            .and_then(|t| services.parser.parse_duration(t, locale))
    };
    if let Some(secs) = span(&hints.move_later) {
        slots.move_secs = secs;
    } else if let Some(secs) = span(&hints.move_earlier) {
        slots.move_secs = -secs;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{NaiveDate, TimeZone};

    use super::*;
    use crate::activity::Entity;
    use crate::recognizer::{Entities, Intent};
    use crate::skills::calendar::service::MemoryCalendar;
    use crate::skills::testing::fixture;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 15, 10, 0, 0).unwrap()
    }

    fn local(d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_digest_recognizer_entities() {
        let fx = fixture(Arc::new(MemoryCalendar::new()), vec![]);
        let result = RecognizerResult {
            text: "meet alice tomorrow at 3pm in room 4 about budget".into(),
            top_intent: Intent::CreateCalendarEntry,
            score: 0.9,
            entities: Entities::default()
                .with("Subject", "budget")
                .with("personName", "alice")
                .with("FromDate", "tomorrow")
                .with("FromTime", "3pm")
                .with("MeetingRoom", "room 4")
                .with("Location", "building 2"),
        };
        let mut slots = EventSlots::default();
        digest_create(
            &mut slots,
            EventHints::from_recognizer(&result),
            &fx.services,
            "en-us",
            now(),
        );
        assert!(slots.has_detail);
        assert_eq!(slots.title.as_deref(), Some("budget"));
        assert_eq!(slots.location.as_deref(), Some("building 2"));
        assert_eq!(slots.attendee_names, vec!["alice"]);
        assert_eq!(slots.start_date, vec![local(16, 0)]);
        assert_eq!(slots.start_time, vec![local(15, 15)]);
    }

    #[test]
    fn test_empty_hints_leave_no_detail() {
        let fx = fixture(Arc::new(MemoryCalendar::new()), vec![]);
        let mut slots = EventSlots::default();
        digest_create(&mut slots, EventHints::default(), &fx.services, "en-us", now());
        assert_eq!(slots, EventSlots::default());
    }

    #[test]
    fn test_digest_semantic_action() {
        let fx = fixture(Arc::new(MemoryCalendar::new()), vec![]);
        let action = SemanticAction::new("CreateEvent")
            .with_slot("title", Entity::text("Planning Meeting"))
            .with_slot("duration", Entity::text("45 minutes"))
            .with_slot(
                "attendees",
                Entity {
                    entity_type: "list".into(),
                    properties: serde_json::json!({"values": ["bob", "carol"]}),
                },
            );
        let mut slots = EventSlots::default();
        digest_create(
            &mut slots,
            EventHints::from_semantic_action(&action),
            &fx.services,
            "en-us",
            now(),
        );
        assert_eq!(slots.title.as_deref(), Some("Planning Meeting"));
        assert_eq!(slots.duration_secs, 2700);
        assert_eq!(slots.attendee_names, vec!["bob", "carol"]);
        assert!(slots.has_detail);
    }

    #[test]
    fn test_digest_update_move_span() {
        let fx = fixture(Arc::new(MemoryCalendar::new()), vec![]);
        let result = RecognizerResult {
            text: "move my sync 30 minutes earlier".into(),
            top_intent: Intent::ChangeCalendarEntry,
            score: 0.8,
            entities: Entities::default()
                .with("Subject", "sync")
                .with("MoveEarlierTimeSpan", "30 minutes"),
        };
        let mut slots = UpdateSlots::default();
        digest_update(
            &mut slots,
            EventHints::from_recognizer(&result),
            &fx.services,
            "en-us",
            now(),
        );
        assert_eq!(slots.title.as_deref(), Some("sync"));
        assert_eq!(slots.move_secs, -1800);
        assert!(slots.has_new_time());
    }
}
