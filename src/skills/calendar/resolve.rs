//! Turning date/time candidates into concrete UTC instants.

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use tracing::debug;

use super::slots::EventSlots;
use crate::recognizer::datetime::{is_relative_time, parse_resolution_value};
use crate::recognizer::{DateTimeResolution, ParsedValue, UserZone};

/// Candidates read out of a batch of resolutions, in user-local time.
#[derive(Debug, Default, PartialEq)]
pub struct Absorbed {
    pub dates: Vec<NaiveDateTime>,
    /// Only resolutions that carry a clock component.
    pub times: Vec<NaiveDateTime>,
}

/// Reads resolution values into date and time candidates. A relative
/// phrase keeps the resolved day but takes the current time-of-day of
/// `local_now`. Time-only values add no date. Unparseable values are
/// skipped.
pub fn absorb(
    resolutions: &[DateTimeResolution],
    user_text: &str,
    local_now: NaiveDateTime,
) -> Absorbed {
    let mut absorbed = Absorbed::default();
    for resolution in resolutions {
        let Some(value) = resolution.value.as_deref() else {
            continue;
        };
        let parsed = match parse_resolution_value(value, local_now.date()) {
            ParsedValue::Parsed(dt) => dt,
            ParsedValue::Unparseable => {
                debug!("Skipping unparseable resolution value '{value}'");
                continue;
            }
        };
        if resolution.contains_time() {
            absorbed.times.push(parsed);
        }
        if is_relative_time(user_text, &resolution.timex) {
            absorbed
                .dates
                .push(parsed.date().and_time(local_now.time()));
        } else if resolution.contains_date() {
            absorbed.dates.push(parsed);
        }
    }
    absorbed
}

/// Earliest candidate at or after `now`; the first one when every
/// candidate is in the past.
pub fn earliest_future(
    candidates: &[DateTime<Utc>],
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    candidates
        .iter()
        .filter(|c| **c >= now)
        .min()
        .or_else(|| candidates.first())
        .copied()
}

/// Combines `date` (or each time's own date) with every time candidate,
/// converts to UTC and applies [`earliest_future`].
pub fn pick_start(
    date: Option<NaiveDate>,
    times: &[NaiveDateTime],
    zone: UserZone,
    now: DateTime<Utc>,
) -> Option<DateTime<Utc>> {
    let candidates: Vec<DateTime<Utc>> = times
        .iter()
        .map(|t| zone.to_utc(date.unwrap_or(t.date()).and_time(t.time())))
        .collect();
    earliest_future(&candidates, now)
}

/// Fills `start_utc` from the collected candidates. The last date wins.
/// Does nothing once a start is resolved, so the conversion happens once.
pub fn resolve_start(slots: &mut EventSlots, zone: UserZone, now: DateTime<Utc>) {
    if slots.start_utc.is_some() || slots.start_time.is_empty() {
        return;
    }
    let date = slots.start_date.last().map(NaiveDateTime::date);
    slots.start_utc = pick_start(date, &slots.start_time, zone, now);
    if let Some(start) = slots.start_utc {
        debug!("Resolved meeting start {start}");
    }
}

/// Fills `end_utc` and `duration_secs` from end candidates or a known
/// duration. Returns whether the end is now known.
pub fn resolve_end(slots: &mut EventSlots, zone: UserZone) -> bool {
    let Some(start) = slots.start_utc else {
        return false;
    };
    if slots.end_utc.is_some() {
        return true;
    }

    let start_local = zone.local(start);
    let end_day = slots
        .end_date
        .last()
        .map(NaiveDateTime::date)
        .unwrap_or(start_local.date());

    if !slots.end_time.is_empty() {
        for time in &slots.end_time {
            let end = zone.to_utc(end_day.and_time(time.time()));
            if slots.end_utc.is_none() || end >= start {
                slots.end_utc = Some(end);
            }
        }
    } else if !slots.end_date.is_empty() {
        let last_second = NaiveTime::from_hms_opt(23, 59, 59).unwrap_or(NaiveTime::MIN);
        slots.end_utc = Some(zone.to_utc(end_day.and_time(last_second)));
    }

    if let Some(end) = slots.end_utc {
        slots.duration_secs = (end - start).num_seconds().abs();
        return true;
    }
    if slots.duration_secs > 0 {
        slots.end_utc = Duration::try_seconds(slots.duration_secs)
            .and_then(|span| start.checked_add_signed(span));
        if slots.end_utc.is_none() {
            // Out of range: forget it so the duration prompt asks again.
            slots.duration_secs = 0;
        }
        return slots.end_utc.is_some();
    }
    false
}
