//! Calendar backend seam plus an in-process implementation.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attendee {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub address: String,
}

impl Attendee {
    pub fn display(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.address)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub location: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    #[serde(default)]
    pub attendees: Vec<Attendee>,
    #[serde(default = "default_is_organizer")]
    pub is_organizer: bool,
}

fn default_is_organizer() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewEvent {
    pub title: String,
    pub content: String,
    pub location: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub attendees: Vec<Attendee>,
}

#[async_trait]
pub trait CalendarService: Send + Sync {
    /// `Ok(None)` when the backend declined to create the event.
    async fn create_event(&self, event: NewEvent) -> anyhow::Result<Option<CalendarEvent>>;

    async fn update_event_by_id(
        &self,
        id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<CalendarEvent>;

    /// Events starting within `[from, to]`.
    async fn get_events_by_time(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<CalendarEvent>>;

    async fn get_events_by_title(&self, title: &str) -> anyhow::Result<Vec<CalendarEvent>>;
}

#[derive(Default)]
pub struct MemoryCalendar {
    events: Mutex<Vec<CalendarEvent>>,
}

impl MemoryCalendar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_events(events: Vec<CalendarEvent>) -> Self {
        Self {
            events: Mutex::new(events),
        }
    }

    pub fn events(&self) -> Vec<CalendarEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, Vec<CalendarEvent>>> {
        self.events
            .lock()
            .map_err(|e| anyhow::anyhow!("calendar lock poisoned: {e}"))
    }
}

#[async_trait]
impl CalendarService for MemoryCalendar {
    async fn create_event(&self, event: NewEvent) -> anyhow::Result<Option<CalendarEvent>> {
        let created = CalendarEvent {
            id: uuid::Uuid::new_v4().to_string(),
            title: event.title,
            content: event.content,
            location: event.location,
            start: event.start,
            end: event.end,
            attendees: event.attendees,
            is_organizer: true,
        };
        debug!("Created event {} at {}", created.id, created.start);
        self.lock()?.push(created.clone());
        Ok(Some(created))
    }

    async fn update_event_by_id(
        &self,
        id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> anyhow::Result<CalendarEvent> {
        let mut events = self.lock()?;
        let event = events
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| anyhow::anyhow!("no event with id {id}"))?;
        event.start = start;
        event.end = end;
        Ok(event.clone())
    }

    async fn get_events_by_time(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<CalendarEvent>> {
        let mut found: Vec<CalendarEvent> = self
            .lock()?
            .iter()
            .filter(|e| e.start >= from && e.start <= to)
            .cloned()
            .collect();
        found.sort_by_key(|e| e.start);
        Ok(found)
    }

    async fn get_events_by_title(&self, title: &str) -> anyhow::Result<Vec<CalendarEvent>> {
        let needle = title.trim().to_lowercase();
        Ok(self
            .lock()?
            .iter()
            .filter(|e| !needle.is_empty() && e.title.to_lowercase().contains(&needle))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 16, hour, 0, 0).unwrap()
    }

    fn new_event(title: &str, hour: u32) -> NewEvent {
        NewEvent {
            title: title.to_string(),
            content: String::new(),
            location: String::new(),
            start: at(hour),
            end: at(hour + 1),
            attendees: vec![],
        }
    }

    #[tokio::test]
    async fn test_create_then_find() {
        let calendar = MemoryCalendar::new();
        let created = calendar
            .create_event(new_event("Budget review", 9))
            .await
            .unwrap()
            .unwrap();
        assert!(created.is_organizer);

        let by_title = calendar.get_events_by_title("budget").await.unwrap();
        assert_eq!(by_title.len(), 1);
        let by_time = calendar.get_events_by_time(at(8), at(10)).await.unwrap();
        assert_eq!(by_time[0].id, created.id);
        assert!(calendar.get_events_by_time(at(10), at(12)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_moves_event() {
        let calendar = MemoryCalendar::new();
        let created = calendar.create_event(new_event("Sync", 9)).await.unwrap().unwrap();
        let moved = calendar
            .update_event_by_id(&created.id, at(14), at(15))
            .await
            .unwrap();
        assert_eq!(moved.start, at(14));
        assert_eq!(calendar.events()[0].end, at(15));
        assert!(calendar.update_event_by_id("missing", at(1), at(2)).await.is_err());
    }

    #[tokio::test]
    async fn test_blank_title_matches_nothing() {
        let calendar = MemoryCalendar::new();
        calendar.create_event(new_event("Sync", 9)).await.unwrap();
        assert!(calendar.get_events_by_title(" ").await.unwrap().is_empty());
    }

    #[test]
    fn test_attendee_display() {
        let named = Attendee {
            name: Some("Alice".into()),
            address: "alice@contoso.com".into(),
        };
        let bare = Attendee {
            name: None,
            address: "bob@contoso.com".into(),
        };
        assert_eq!(named.display(), "Alice");
        assert_eq!(bare.display(), "bob@contoso.com");
    }
}
