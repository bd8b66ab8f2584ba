//! Date/time parsing collaborator.
//!
//! Turns free text ("tomorrow at 4", "in an hour", "30 minutes") into
//! resolutions shaped like the NLU service's datetime output: a TIMEX
//! expression plus a literal value. Ambiguous phrases yield several
//! resolutions; picking one is the orchestrator's job.

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset,
    TimeZone, Utc, Weekday,
};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Longest duration `parse_duration` accepts (one week).
pub const MAX_DURATION_SECS: i64 = 7 * 24 * 3600;

/// One candidate interpretation of a date/time phrase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateTimeResolution {
    pub timex: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl DateTimeResolution {
    pub fn new(timex: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            timex: timex.into(),
            value: Some(value.into()),
        }
    }

    /// True when the TIMEX carries a clock component.
    pub fn contains_time(&self) -> bool {
        self.timex.contains('T') && !self.timex.starts_with('P')
    }

    pub fn contains_date(&self) -> bool {
        self.timex
            .split('T')
            .next()
            .map(|d| d.len() >= 10 && d.as_bytes()[4] == b'-')
            .unwrap_or(false)
    }
}

/// Result of reading a resolution's literal value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ParsedValue {
    Parsed(NaiveDateTime),
    Unparseable,
}

/// Reads `YYYY-MM-DD`, `HH:MM[:SS]` or `YYYY-MM-DD HH:MM:SS`.
/// A time-only value lands on `reference_date`.
pub fn parse_resolution_value(value: &str, reference_date: NaiveDate) -> ParsedValue {
    let value = value.trim();
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return ParsedValue::Parsed(dt);
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S") {
        return ParsedValue::Parsed(dt);
    }
    if let Ok(date) = NaiveDate::parse_from_str(value, "%Y-%m-%d") {
        return ParsedValue::Parsed(date.and_time(NaiveTime::MIN));
    }
    for fmt in ["%H:%M:%S", "%H:%M"] {
        if let Ok(time) = NaiveTime::parse_from_str(value, fmt) {
            return ParsedValue::Parsed(reference_date.and_time(time));
        }
    }
    ParsedValue::Unparseable
}

/// Whether the user phrased the time relative to "now". Such results are
/// anchored to the current time-of-day by the caller.
pub fn is_relative_time(user_text: &str, timex: &str) -> bool {
    let lower = user_text.to_lowercase();
    let relative_markers = [" ago", "before", "later", "from now", "in an ", "in a ", "next "];
    if relative_markers.iter().any(|m| lower.contains(m)) {
        return true;
    }
    if Regex::new(r"\bin \d+ (minute|min|hour|hr|day)s?\b")
        .map(|re| re.is_match(&lower))
        .unwrap_or(false)
    {
        return true;
    }
    let day_words = ["today", "now", "yesterday", "tomorrow"];
    day_words.iter().any(|w| lower.contains(w)) && timex == "PRESENT_REF"
}

/// Fixed-offset user time zone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UserZone {
    offset: FixedOffset,
}

impl Default for UserZone {
    fn default() -> Self {
        Self::utc()
    }
}

impl UserZone {
    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }

    pub fn from_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes * 60).map(|offset| Self { offset })
    }

    /// Parses `"+02:00"`, `"-0530"` or `"Z"`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        if text.eq_ignore_ascii_case("z") || text.eq_ignore_ascii_case("utc") {
            return Some(Self::utc());
        }
        let (sign, rest) = match text.as_bytes().first()? {
            b'+' => (1, &text[1..]),
            b'-' => (-1, &text[1..]),
            _ => return None,
        };
        let digits: String = rest.chars().filter(|c| *c != ':').collect();
        if digits.len() != 4 || !digits.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let hours: i32 = digits[..2].parse().ok()?;
        let minutes: i32 = digits[2..].parse().ok()?;
        if hours > 14 || minutes > 59 {
            return None;
        }
        Self::from_minutes(sign * (hours * 60 + minutes))
    }

    pub fn local(&self, instant: DateTime<Utc>) -> NaiveDateTime {
        instant.with_timezone(&self.offset).naive_local()
    }

    pub fn to_utc(&self, local: NaiveDateTime) -> DateTime<Utc> {
        let utc = local - Duration::seconds(i64::from(self.offset.local_minus_utc()));
        Utc.from_utc_datetime(&utc)
    }

    pub fn offset_minutes(&self) -> i32 {
        self.offset.local_minus_utc() / 60
    }
}

/// External date/time parsing collaborator.
pub trait DateTimeParser: Send + Sync {
    /// Date, time and date-time candidates found in `text`.
    fn parse(&self, text: &str, locale: &str, reference: NaiveDateTime) -> Vec<DateTimeResolution>;

    /// Duration in seconds, if `text` names one.
    fn parse_duration(&self, text: &str, locale: &str) -> Option<i64>;
}

/// English rule-based parser covering the phrases the calendar dialogs
/// prompt for.
pub struct BasicDateTimeParser {
    clock_12h: Regex,
    clock_24h: Regex,
    relative_offset: Regex,
    iso_date: Regex,
    duration: Regex,
}

impl Default for BasicDateTimeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl BasicDateTimeParser {
    pub fn new() -> Self {
        // Patterns are literals; a failure here is a programming error
        // caught by the unit tests.
        let compile = |p: &str| Regex::new(p).unwrap_or_else(|e| panic!("bad pattern {p}: {e}"));
        Self {
            clock_12h: compile(r"\b(\d{1,2})(?::(\d{2}))?\s*(am|pm|a\.m\.|p\.m\.)"),
            clock_24h: compile(r"\b(?:at\s+)?(\d{1,2})(?::(\d{2}))?\b"),
            relative_offset: compile(r"\bin\s+(an?|\d+)\s+(minute|min|hour|hr|day)s?\b"),
            iso_date: compile(r"\b(\d{4})-(\d{2})-(\d{2})\b"),
            duration: compile(
                r"\b(half an?|an?|one|two|three|four|\d+(?:\.\d+)?)\s*(minutes?|mins?|hours?|hrs?|h)\b",
            ),
        }
    }

    fn dates(&self, lower: &str, reference: NaiveDateTime) -> Vec<NaiveDate> {
        let today = reference.date();
        if lower.contains("day after tomorrow") {
            return vec![today + Duration::days(2)];
        }
        if lower.contains("tomorrow") {
            return vec![today + Duration::days(1)];
        }
        if lower.contains("yesterday") {
            return vec![today - Duration::days(1)];
        }
        if lower.contains("today") || lower.contains("tonight") {
            return vec![today];
        }
        if let Some(caps) = self.iso_date.captures(lower) {
            let parsed = (|| {
                NaiveDate::from_ymd_opt(
                    caps.get(1)?.as_str().parse().ok()?,
                    caps.get(2)?.as_str().parse().ok()?,
                    caps.get(3)?.as_str().parse().ok()?,
                )
            })();
            if let Some(date) = parsed {
                return vec![date];
            }
        }

        let weekdays = [
            ("monday", Weekday::Mon),
            ("tuesday", Weekday::Tue),
            ("wednesday", Weekday::Wed),
            ("thursday", Weekday::Thu),
            ("friday", Weekday::Fri),
            ("saturday", Weekday::Sat),
            ("sunday", Weekday::Sun),
        ];
        for (name, weekday) in weekdays {
            if lower.contains(name) {
                let ahead = (7 + weekday.num_days_from_monday() as i64
                    - today.weekday().num_days_from_monday() as i64)
                    % 7;
                let upcoming = today + Duration::days(if ahead == 0 { 7 } else { ahead });
                if lower.contains("next ") {
                    return vec![upcoming];
                }
                // Bare weekday: last occurrence and the upcoming one.
                return vec![upcoming - Duration::days(7), upcoming];
            }
        }
        Vec::new()
    }

    fn times(&self, lower: &str, reference: NaiveDateTime) -> Vec<NaiveTime> {
        if lower.contains("noon") {
            return NaiveTime::from_hms_opt(12, 0, 0).into_iter().collect();
        }
        if lower.contains("midnight") {
            return vec![NaiveTime::MIN];
        }
        if lower.split_whitespace().any(|w| w == "now") {
            return vec![reference.time()];
        }

        if let Some(caps) = self.clock_12h.captures(lower) {
            let hour: u32 = caps.get(1).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
            let minute: u32 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
            let pm = caps.get(3).map(|m| m.as_str().starts_with('p')).unwrap_or(false);
            let hour = match (hour % 12, pm) {
                (h, true) => h + 12,
                (h, false) => h,
            };
            return NaiveTime::from_hms_opt(hour, minute, 0).into_iter().collect();
        }

        // Without am/pm, "4" or "4:30" is ambiguous between morning and
        // afternoon. Only accept bare numbers after "at" or with minutes.
        for caps in self.clock_24h.captures_iter(lower) {
            let whole = caps.get(0).map(|m| m.as_str()).unwrap_or("");
            if !whole.starts_with("at") && caps.get(2).is_none() {
                continue;
            }
            let hour: u32 = match caps.get(1).and_then(|m| m.as_str().parse().ok()) {
                Some(h) => h,
                None => continue,
            };
            let minute: u32 = caps.get(2).and_then(|m| m.as_str().parse().ok()).unwrap_or(0);
            if hour >= 1 && hour < 12 {
                return [hour, hour + 12]
                    .into_iter()
                    .filter_map(|h| NaiveTime::from_hms_opt(h, minute, 0))
                    .collect();
            }
            return NaiveTime::from_hms_opt(hour, minute, 0).into_iter().collect();
        }
        Vec::new()
    }

    fn relative(&self, lower: &str, reference: NaiveDateTime) -> Option<NaiveDateTime> {
        let caps = self.relative_offset.captures(lower)?;
        let amount: i64 = match caps.get(1)?.as_str() {
            "a" | "an" => 1,
            n => n.parse().ok()?,
        };
        let unit = caps.get(2)?.as_str();
        let offset = if unit.starts_with('d') {
            Duration::try_days(amount)
        } else if unit.starts_with('h') {
            Duration::try_hours(amount)
        } else {
            Duration::try_minutes(amount)
        }?;
        reference.checked_add_signed(offset)
    }
}

fn date_timex(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn time_timex(time: NaiveTime) -> String {
    time.format("T%H:%M").to_string()
}

impl DateTimeParser for BasicDateTimeParser {
    fn parse(&self, text: &str, _locale: &str, reference: NaiveDateTime) -> Vec<DateTimeResolution> {
        let lower = text.to_lowercase();

        if let Some(at) = self.relative(&lower, reference) {
            return vec![DateTimeResolution::new(
                format!("{}{}", date_timex(at.date()), time_timex(at.time())),
                at.format("%Y-%m-%d %H:%M:%S").to_string(),
            )];
        }

        let dates = self.dates(&lower, reference);
        let times = self.times(&lower, reference);

        match (dates.is_empty(), times.is_empty()) {
            (true, true) => Vec::new(),
            (false, true) => dates
                .into_iter()
                .map(|d| DateTimeResolution::new(date_timex(d), d.format("%Y-%m-%d").to_string()))
                .collect(),
            (true, false) => times
                .into_iter()
                .map(|t| DateTimeResolution::new(time_timex(t), t.format("%H:%M:%S").to_string()))
                .collect(),
            (false, false) => dates
                .iter()
                .flat_map(|d| {
                    times.iter().map(move |t| {
                        let at = d.and_time(*t);
                        DateTimeResolution::new(
                            format!("{}{}", date_timex(*d), time_timex(*t)),
                            at.format("%Y-%m-%d %H:%M:%S").to_string(),
                        )
                    })
                })
                .collect(),
        }
    }

    fn parse_duration(&self, text: &str, _locale: &str) -> Option<i64> {
        let lower = text.to_lowercase();
        let caps = self.duration.captures(&lower)?;
        let amount = caps.get(1)?.as_str();
        let unit = caps.get(2)?.as_str();
        let unit_secs: f64 = if unit.starts_with('h') { 3600.0 } else { 60.0 };
        let amount: f64 = match amount {
            "a" | "an" | "one" => 1.0,
            "two" => 2.0,
            "three" => 3.0,
            "four" => 4.0,
            half if half.starts_with("half") => 0.5,
            n => n.parse().ok()?,
        };
        let seconds = (amount * unit_secs).round();
        (seconds > 0.0 && seconds <= MAX_DURATION_SECS as f64).then_some(seconds as i64)
    }
}
