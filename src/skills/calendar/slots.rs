//! Slot state for event creation and the prompt-or-proceed decision.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use super::service::{Attendee, CalendarEvent};
use crate::config::{SlotDefault, SlotDefaults};
use crate::recognizer::datetime::MAX_DURATION_SECS;
use crate::recognizer::replies::RecreateField;
use crate::skills::contacts::Contact;

/// Fallback meeting length when nothing else is known.
pub const DEFAULT_DURATION_SECS: i64 = 1800;

/// Attendees listed in the confirmation summary before asking to show
/// the rest.
pub const SUMMARY_ATTENDEE_LIMIT: usize = 5;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventSlots {
    pub title: Option<String>,
    pub content: Option<String>,
    pub location: Option<String>,
    /// Candidates in the user's local time. Only the date part is used.
    #[serde(default)]
    pub start_date: Vec<NaiveDateTime>,
    /// Candidates in the user's local time. Only the time part is used.
    #[serde(default)]
    pub start_time: Vec<NaiveDateTime>,
    #[serde(default)]
    pub end_date: Vec<NaiveDateTime>,
    #[serde(default)]
    pub end_time: Vec<NaiveDateTime>,
    #[serde(default)]
    pub duration_secs: i64,
    pub start_utc: Option<DateTime<Utc>>,
    pub end_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attendees: Vec<Attendee>,
    /// Names extracted from the utterance, not yet resolved to contacts.
    #[serde(default)]
    pub attendee_names: Vec<String>,
    /// Contacts offered in an open "which one" question.
    #[serde(default)]
    pub contact_choices: Vec<Contact>,
    /// The triggering utterance already filled at least one slot.
    #[serde(default)]
    pub has_detail: bool,
    pub recreate: Option<RecreateField>,
}

impl EventSlots {
    pub fn clear_times(&mut self) {
        self.start_date.clear();
        self.start_time.clear();
        self.start_utc = None;
        self.clear_times_except_start_time();
    }

    pub fn clear_times_except_start_time(&mut self) {
        self.end_date.clear();
        self.end_time.clear();
        self.end_utc = None;
        self.duration_secs = 0;
    }

    pub fn clear_location(&mut self) {
        self.location = None;
    }

    pub fn clear_participants(&mut self) {
        self.attendees.clear();
        self.attendee_names.clear();
        self.contact_choices.clear();
    }

    pub fn clear_subject(&mut self) {
        self.title = None;
    }

    pub fn clear_content(&mut self) {
        self.content = None;
    }

    /// Clears the field group the user asked to change and marks it as
    /// the recreate target. Every other slot is kept.
    pub fn apply_recreate(&mut self, field: RecreateField) {
        match field {
            RecreateField::Subject => self.clear_subject(),
            RecreateField::Content => self.clear_content(),
            RecreateField::Time => self.clear_times(),
            RecreateField::Duration => self.clear_times_except_start_time(),
            RecreateField::Location => self.clear_location(),
            RecreateField::Participants => self.clear_participants(),
            RecreateField::Cancel => {
                *self = EventSlots::default();
                return;
            }
        }
        self.recreate = Some(field);
    }

    pub fn add_attendee(&mut self, attendee: Attendee) {
        if !self.attendees.iter().any(|a| a.address == attendee.address) {
            self.attendees.push(attendee);
        }
    }

    pub fn attendee_display_names(&self) -> Vec<String> {
        self.attendees.iter().map(|a| a.display().to_string()).collect()
    }
}

/// Slots of the create waterfall that can be prompted for or defaulted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Attendees,
    Title,
    Content,
    StartDate,
    StartTime,
    Duration,
    Location,
}

impl Slot {
    /// The recreate group that forces a prompt for this slot.
    fn recreate_group(self) -> Option<RecreateField> {
        match self {
            Slot::Attendees => Some(RecreateField::Participants),
            Slot::Title => Some(RecreateField::Subject),
            Slot::Content => Some(RecreateField::Content),
            Slot::StartDate | Slot::StartTime => Some(RecreateField::Time),
            Slot::Duration => Some(RecreateField::Duration),
            Slot::Location => Some(RecreateField::Location),
        }
    }

    fn default_entry(self, defaults: &SlotDefaults) -> Option<&SlotDefault> {
        match self {
            Slot::Title => Some(&defaults.title),
            Slot::Content => Some(&defaults.content),
            Slot::StartDate => Some(&defaults.start_date),
            Slot::Duration => Some(&defaults.duration),
            Slot::Location => Some(&defaults.location),
            Slot::Attendees | Slot::StartTime => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotDecision {
    AlreadyFilled,
    FillFromDefault,
    NeedsPrompt,
    /// Several candidates are waiting to be narrowed down.
    NeedsDisambiguation(Vec<String>),
}

fn is_filled(slot: Slot, state: &EventSlots) -> bool {
    match slot {
        Slot::Attendees => !state.attendees.is_empty(),
        Slot::Title => state.title.is_some(),
        Slot::Content => state.content.is_some(),
        Slot::StartDate => !state.start_date.is_empty() || state.start_utc.is_some(),
        Slot::StartTime => state.start_utc.is_some(),
        Slot::Duration => {
            state.duration_secs > 0
                || state.end_utc.is_some()
                || !state.end_date.is_empty()
                || !state.end_time.is_empty()
        }
        Slot::Location => state.location.is_some(),
    }
}

/// Decides whether `slot` must be asked for. Pure: never mutates and
/// gives the same answer until the state changes.
pub fn collect_slot(slot: Slot, state: &EventSlots, defaults: &SlotDefaults) -> SlotDecision {
    let targeted = state.recreate.is_some() && state.recreate == slot.recreate_group();
    // A time recreate also re-asks the duration.
    let targeted = targeted
        || (slot == Slot::Duration && state.recreate == Some(RecreateField::Time));

    if is_filled(slot, state) {
        return SlotDecision::AlreadyFilled;
    }

    if slot == Slot::Attendees && !state.attendee_names.is_empty() {
        return SlotDecision::NeedsDisambiguation(state.attendee_names.clone());
    }

    let skip_by_default = slot
        .default_entry(defaults)
        .map(|d| d.skip_by_default)
        .unwrap_or(false);
    if state.has_detail && skip_by_default && !targeted {
        SlotDecision::FillFromDefault
    } else {
        SlotDecision::NeedsPrompt
    }
}

/// True when `reply` is one of the configured "use the default" phrases.
pub fn is_skip(reply: &str, phrases: &[String]) -> bool {
    let normalized: String = reply
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace() || *c == '\'')
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    phrases
        .iter()
        .any(|p| p.trim().eq_ignore_ascii_case(&normalized))
}

/// Default duration in seconds from the configured minutes, falling back
/// to [`DEFAULT_DURATION_SECS`].
pub fn default_duration_secs(defaults: &SlotDefaults) -> i64 {
    defaults
        .duration
        .value
        .as_deref()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|m| *m > 0)
        .and_then(|m| m.checked_mul(60))
        .filter(|secs| *secs <= MAX_DURATION_SECS)
        .unwrap_or(DEFAULT_DURATION_SECS)
}

/// Default start-date offset in days (0 = today). Offsets beyond a year
/// fall back to today.
pub fn default_start_offset_days(defaults: &SlotDefaults) -> i64 {
    defaults
        .start_date
        .value
        .as_deref()
        .and_then(|v| v.trim().parse::<i64>().ok())
        .filter(|d| (0..=366).contains(d))
        .unwrap_or(0)
}

/// Slot state of the move-a-meeting flow.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateSlots {
    /// Meetings matching the search; narrowed to one before moving.
    #[serde(default)]
    pub events: Vec<CalendarEvent>,
    #[serde(default)]
    pub original_start_date: Vec<NaiveDateTime>,
    #[serde(default)]
    pub original_start_time: Vec<NaiveDateTime>,
    pub title: Option<String>,
    #[serde(default)]
    pub new_start_date: Vec<NaiveDateTime>,
    #[serde(default)]
    pub new_start_time: Vec<NaiveDateTime>,
    /// Relative move ("push it back an hour"), seconds.
    #[serde(default)]
    pub move_secs: i64,
    pub new_start_utc: Option<DateTime<Utc>>,
}

impl UpdateSlots {
    pub fn has_new_time(&self) -> bool {
        !self.new_start_date.is_empty() || !self.new_start_time.is_empty() || self.move_secs != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn defaults_skipping_all() -> SlotDefaults {
        let skip = SlotDefault {
            skip_by_default: true,
            value: None,
        };
        SlotDefaults {
            title: skip.clone(),
            content: skip.clone(),
            start_date: skip.clone(),
            duration: skip.clone(),
            location: skip,
        }
    }

    fn local(h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 16)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_filled_slot_is_idempotent() {
        let state = EventSlots {
            title: Some("Budget".into()),
            ..EventSlots::default()
        };
        let before = state.clone();
        for _ in 0..3 {
            assert_eq!(
                collect_slot(Slot::Title, &state, &defaults_skipping_all()),
                SlotDecision::AlreadyFilled
            );
        }
        assert_eq!(state, before);
    }

    #[test]
    fn test_default_only_applies_with_detail() {
        let defaults = defaults_skipping_all();
        let mut state = EventSlots::default();
        assert_eq!(
            collect_slot(Slot::Location, &state, &defaults),
            SlotDecision::NeedsPrompt
        );
        state.has_detail = true;
        assert_eq!(
            collect_slot(Slot::Location, &state, &defaults),
            SlotDecision::FillFromDefault
        );
        assert_eq!(
            collect_slot(Slot::Location, &state, &SlotDefaults::default()),
            SlotDecision::NeedsPrompt
        );
    }

    #[test]
    fn test_recreate_target_always_prompts() {
        let defaults = defaults_skipping_all();
        let mut state = EventSlots {
            has_detail: true,
            location: Some("Room 1".into()),
            ..EventSlots::default()
        };
        state.apply_recreate(RecreateField::Location);
        assert_eq!(
            collect_slot(Slot::Location, &state, &defaults),
            SlotDecision::NeedsPrompt
        );
        // Untargeted slots still default.
        assert_eq!(
            collect_slot(Slot::Content, &state, &defaults),
            SlotDecision::FillFromDefault
        );
    }

    #[test]
    fn test_time_recreate_reasks_duration() {
        let defaults = defaults_skipping_all();
        let mut state = EventSlots {
            has_detail: true,
            duration_secs: 3600,
            ..EventSlots::default()
        };
        state.apply_recreate(RecreateField::Time);
        assert_eq!(
            collect_slot(Slot::Duration, &state, &defaults),
            SlotDecision::NeedsPrompt
        );
        assert_eq!(
            collect_slot(Slot::StartDate, &state, &defaults),
            SlotDecision::NeedsPrompt
        );
    }

    #[test]
    fn test_disambiguation_for_names() {
        let state = EventSlots {
            attendee_names: vec!["alice".into()],
            start_time: vec![local(4), local(16)],
            ..EventSlots::default()
        };
        let defaults = SlotDefaults::default();
        assert_eq!(
            collect_slot(Slot::Attendees, &state, &defaults),
            SlotDecision::NeedsDisambiguation(vec!["alice".into()])
        );
        // Several start times are settled by earliest-future, not asked.
        assert_eq!(
            collect_slot(Slot::StartTime, &state, &defaults),
            SlotDecision::NeedsPrompt
        );
    }

    #[test]
    fn test_recreate_isolation() {
        let full = EventSlots {
            title: Some("Budget".into()),
            content: Some("Q3 numbers".into()),
            location: Some("Room 4".into()),
            start_date: vec![local(0)],
            start_time: vec![local(9)],
            end_time: vec![local(10)],
            duration_secs: 3600,
            start_utc: Some(Utc::now()),
            end_utc: Some(Utc::now()),
            attendees: vec![Attendee {
                name: Some("Alice".into()),
                address: "alice@contoso.com".into(),
            }],
            has_detail: true,
            ..EventSlots::default()
        };

        let mut changed = full.clone();
        changed.apply_recreate(RecreateField::Location);
        assert_eq!(changed.location, None);
        assert_eq!(changed.recreate, Some(RecreateField::Location));
        let mut expected = full.clone();
        expected.location = None;
        expected.recreate = Some(RecreateField::Location);
        assert_eq!(changed, expected);

        let mut changed = full.clone();
        changed.apply_recreate(RecreateField::Duration);
        assert_eq!(changed.start_time, full.start_time);
        assert_eq!(changed.start_utc, full.start_utc);
        assert!(changed.end_time.is_empty());
        assert_eq!(changed.end_utc, None);
        assert_eq!(changed.duration_secs, 0);
        assert_eq!(changed.title, full.title);
        assert_eq!(changed.attendees, full.attendees);

        let mut changed = full.clone();
        changed.apply_recreate(RecreateField::Participants);
        assert!(changed.attendees.is_empty());
        assert_eq!(changed.title, full.title);
        assert_eq!(changed.start_utc, full.start_utc);

        let mut changed = full.clone();
        changed.apply_recreate(RecreateField::Cancel);
        assert_eq!(changed, EventSlots::default());
    }

    #[test]
    fn test_is_skip() {
        let phrases = vec!["skip".to_string(), "no title".to_string()];
        assert!(is_skip("Skip", &phrases));
        assert!(is_skip("no title!", &phrases));
        assert!(!is_skip("skip planning", &phrases));
        assert!(!is_skip("Budget", &phrases));
    }

    #[test]
    fn test_duration_and_start_defaults() {
        let mut defaults = SlotDefaults::default();
        assert_eq!(default_duration_secs(&defaults), DEFAULT_DURATION_SECS);
        defaults.duration.value = Some("45".into());
        assert_eq!(default_duration_secs(&defaults), 2700);
        defaults.duration.value = Some("soon".into());
        assert_eq!(default_duration_secs(&defaults), DEFAULT_DURATION_SECS);

        assert_eq!(default_start_offset_days(&defaults), 0);
        defaults.start_date.value = Some("1".into());
        assert_eq!(default_start_offset_days(&defaults), 1);

        defaults.duration.value = Some(i64::MAX.to_string());
        assert_eq!(default_duration_secs(&defaults), DEFAULT_DURATION_SECS);
        defaults.start_date.value = Some("99999999999".into());
        assert_eq!(default_start_offset_days(&defaults), 0);
    }

    #[test]
    fn test_add_attendee_deduplicates() {
        let mut state = EventSlots::default();
        let alice = Attendee {
            name: Some("Alice".into()),
            address: "alice@contoso.com".into(),
        };
        state.add_attendee(alice.clone());
        state.add_attendee(alice);
        assert_eq!(state.attendees.len(), 1);
    }
}
