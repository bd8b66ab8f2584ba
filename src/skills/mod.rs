//! Conversational skills and the bot that routes turns to them.
//!
//! A turn either resumes the dialog the conversation is suspended in, or
//! starts a new one from a semantic action (bypassing NLU) or from the
//! recognized intent. Everything a dialog needs from the outside world
//! is reached through [`Services`].

pub mod calendar;
pub mod contacts;
pub mod phone;
pub mod search;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::activity::{Activity, EVENT, MESSAGE};
use crate::config::{CalendarConfig, Config};
use crate::dialog::{
    ConversationState, DialogOptions, DialogSet, ReplyRecognizer, TurnOutcome, TurnStatus,
};
use crate::host::{TurnHandler, TurnResponse};
use crate::recognizer::{
    BasicDateTimeParser, DateTimeParser, Intent, LuisRecognizer, NullRecognizer, Recognizer,
    UserZone,
};
use crate::responses::{self, Templates};

use calendar::service::{CalendarService, MemoryCalendar};
use calendar::slots::{EventSlots, UpdateSlots};
use calendar::EventHints;
use contacts::{ContactService, MemoryContacts};
use phone::CallSlots;
use search::{SearchProvider, SearchSlots};

// ── Services ─────────────────────────────────────────────

/// Backends and read-only settings shared by every dialog step.
#[derive(Clone)]
pub struct Services {
    pub recognizer: Arc<dyn Recognizer>,
    pub calendar: Arc<dyn CalendarService>,
    pub contacts: Arc<dyn ContactService>,
    pub search: Option<Arc<dyn SearchProvider>>,
    pub parser: Arc<dyn DateTimeParser>,
    pub templates: Templates,
    pub zone: UserZone,
    pub calendar_config: CalendarConfig,
}

impl Services {
    /// Wires the backends named in the configuration. The calendar is
    /// process-local; contacts come from the `[[contacts]]` tables.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let recognizer: Arc<dyn Recognizer> = match &config.recognizer.endpoint {
            Some(_) => Arc::new(LuisRecognizer::new(&config.recognizer)?),
            None => Arc::new(NullRecognizer),
        };
        let search: Option<Arc<dyn SearchProvider>> = match &config.search {
            Some(search) => Some(Arc::from(search::from_config(search)?)),
            None => None,
        };

        let mut templates = Templates::default();
        for (key, template) in &config.responses {
            templates.set(key, template);
        }

        Ok(Self {
            recognizer,
            calendar: Arc::new(MemoryCalendar::new()),
            contacts: Arc::new(MemoryContacts::new(config.contacts.clone())),
            search,
            parser: Arc::new(BasicDateTimeParser::new()),
            templates,
            zone: config.user.zone()?,
            calendar_config: config.calendar.clone(),
        })
    }

    pub fn say(&self, key: &str) -> String {
        self.templates.get(key)
    }

    pub fn render(&self, key: &str, data: Value) -> String {
        self.templates.render(key, &data)
    }

    pub fn is_skip(&self, reply: &str) -> bool {
        calendar::slots::is_skip(reply, &self.calendar_config.skip_phrases)
    }

    pub fn default_title(&self) -> String {
        self.calendar_config
            .defaults
            .title
            .value
            .clone()
            .unwrap_or_else(|| self.calendar_config.default_title.clone())
    }

    /// "Thursday May 16 at 14:00", in the user's zone.
    pub fn spoken_time(&self, instant: DateTime<Utc>) -> String {
        self.zone
            .local(instant)
            .format("%A %B %-d at %H:%M")
            .to_string()
    }
}

// ── State ────────────────────────────────────────────────

/// Slot values of every skill, persisted alongside the dialog stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillState {
    #[serde(default)]
    pub event: EventSlots,
    #[serde(default)]
    pub update: UpdateSlots,
    #[serde(default)]
    pub search: SearchSlots,
    #[serde(default)]
    pub call: CallSlots,
}

/// Every dialog of every skill, with prompt replies recognized in the
/// user's zone.
pub fn build_dialogs(services: &Services) -> DialogSet<Services, SkillState> {
    let replies = ReplyRecognizer::new(services.parser.clone(), services.zone);
    let mut set = DialogSet::new(replies);
    calendar::register(&mut set);
    search::register(&mut set);
    phone::register(&mut set);
    set
}

// ── SkillBot ─────────────────────────────────────────────

/// Semantic action ids understood by [`SkillBot`].
pub const ACTION_CREATE_EVENT: &str = "CreateEvent";
pub const ACTION_UPDATE_EVENT: &str = "UpdateEvent";
pub const ACTION_SEARCH: &str = "Search";
pub const ACTION_OUTGOING_CALL: &str = "OutgoingCall";

pub struct SkillBot {
    services: Services,
    dialogs: DialogSet<Services, SkillState>,
}

impl SkillBot {
    pub fn new(services: Services) -> Self {
        let dialogs = build_dialogs(&services);
        Self { services, dialogs }
    }

    /// Runs one turn against `state`. Returns the replies, addressed back
    /// to the sender. An `Err` means the turn must not be saved.
    pub async fn handle(
        &self,
        state: &mut ConversationState<SkillState>,
        activity: &Activity,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Activity>> {
        let outgoing = match activity.activity_type.as_str() {
            MESSAGE | EVENT => self.dispatch(state, activity, now).await?,
            crate::activity::END_OF_CONVERSATION => {
                debug!("Parent ended {}, clearing state", activity.conversation_key());
                state.reset();
                Vec::new()
            }
            other => {
                debug!("Ignoring {other} activity");
                Vec::new()
            }
        };

        Ok(outgoing.into_iter().map(|a| activity.reply(a)).collect())
    }

    async fn dispatch(
        &self,
        state: &mut ConversationState<SkillState>,
        activity: &Activity,
        now: DateTime<Utc>,
    ) -> anyhow::Result<Vec<Activity>> {
        let services = &self.services;
        let locale = activity.locale.as_deref().unwrap_or("en-us");

        if state.is_active() && activity.semantic_action.is_none() {
            if !activity.text().is_empty() {
                let result = services.recognizer.recognize(activity.text(), locale).await?;
                if result.top_intent == Intent::Cancel {
                    info!("Cancel requested in {:?}", state.active_dialog());
                    state.reset();
                    return Ok(vec![
                        Activity::message(&services.say(responses::ACTION_ENDED)),
                        Activity::end_of_conversation(),
                    ]);
                }
            }
            let outcome = self.dialogs.resume(services, state, activity, now).await;
            return Ok(self.finish(state, outcome));
        }

        // A new task: whatever was suspended is abandoned.
        state.reset();

        let (dialog, options) = match &activity.semantic_action {
            Some(action) => {
                info!("Semantic action {}", action.id);
                match action.id.as_str() {
                    ACTION_CREATE_EVENT => {
                        let hints = EventHints::from_semantic_action(action);
                        calendar::digest_create(&mut state.values.event, hints, services, locale, now);
                        (calendar::CREATE_EVENT, DialogOptions::None)
                    }
                    ACTION_UPDATE_EVENT => {
                        let hints = EventHints::from_semantic_action(action);
                        calendar::digest_update(&mut state.values.update, hints, services, locale, now);
                        (calendar::UPDATE_EVENT, DialogOptions::None)
                    }
                    ACTION_SEARCH => {
                        search::digest_semantic_action(&mut state.values.search, action);
                        (search::SEARCH, DialogOptions::None)
                    }
                    ACTION_OUTGOING_CALL => {
                        phone::digest_semantic_action(&mut state.values.call, action);
                        (phone::OUTGOING_CALL, DialogOptions::None)
                    }
                    other => {
                        warn!("Unknown semantic action {other}");
                        return Ok(self.not_understood());
                    }
                }
            }
            None => {
                let result = services.recognizer.recognize(activity.text(), locale).await?;
                debug!("Top intent {:?} ({:.2})", result.top_intent, result.score);
                match result.top_intent {
                    Intent::CreateCalendarEntry | Intent::FindMeetingRoom => {
                        let hints = EventHints::from_recognizer(&result);
                        calendar::digest_create(&mut state.values.event, hints, services, locale, now);
                        (calendar::CREATE_EVENT, DialogOptions::None)
                    }
                    Intent::ChangeCalendarEntry => {
                        let hints = EventHints::from_recognizer(&result);
                        calendar::digest_update(&mut state.values.update, hints, services, locale, now);
                        (calendar::UPDATE_EVENT, DialogOptions::None)
                    }
                    Intent::SearchMovie | Intent::SearchPeople => {
                        search::digest(&mut state.values.search, &result);
                        (search::SEARCH, DialogOptions::None)
                    }
                    Intent::MakeCall => {
                        phone::digest(&mut state.values.call, &result);
                        (phone::OUTGOING_CALL, DialogOptions::None)
                    }
                    Intent::Cancel => {
                        return Ok(vec![
                            Activity::message(&services.say(responses::ACTION_ENDED)),
                            Activity::end_of_conversation(),
                        ]);
                    }
                    _ => return Ok(self.not_understood()),
                }
            }
        };

        let outcome = self
            .dialogs
            .begin(services, state, activity, now, dialog, options)
            .await;
        Ok(self.finish(state, outcome))
    }

    fn not_understood(&self) -> Vec<Activity> {
        vec![
            Activity::message(&self.services.say(responses::DID_NOT_UNDERSTAND)),
            Activity::end_of_conversation(),
        ]
    }

    /// Closes the task when the root dialog is done. A faulted turn was
    /// already rolled back by the engine; the user gets an apology and
    /// the conversation starts over.
    fn finish(&self, state: &mut ConversationState<SkillState>, outcome: TurnOutcome) -> Vec<Activity> {
        let mut activities = outcome.activities;
        match outcome.status {
            TurnStatus::Waiting => {}
            TurnStatus::Complete(_) | TurnStatus::Cancelled => {
                state.reset();
                activities.push(Activity::end_of_conversation());
            }
            TurnStatus::Faulted(reason) => {
                warn!("Turn faulted: {reason}");
                state.reset();
                activities.push(Activity::message(
                    &self.services.say(responses::ERROR_MESSAGE),
                ));
                activities.push(Activity::end_of_conversation());
            }
        }
        activities
    }
}

#[async_trait]
impl TurnHandler for SkillBot {
    async fn on_turn(&self, activity: &Activity, prior: Option<Value>) -> anyhow::Result<TurnResponse> {
        let mut state: ConversationState<SkillState> = match prior {
            Some(value) => serde_json::from_value(value)?,
            None => ConversationState::default(),
        };
        let activities = self.handle(&mut state, activity, Utc::now()).await?;
        Ok(TurnResponse {
            activities,
            state: serde_json::to_value(&state)?,
        })
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Mutex;

    use super::*;
    use super::calendar::service::{CalendarEvent, NewEvent};
    use super::contacts::Contact;
    use crate::recognizer::RecognizerResult;

    pub struct Fixture {
        pub services: Services,
        pub dialogs: DialogSet<Services, SkillState>,
    }

    /// UTC user, basic parser, no NLU and no search provider.
    pub fn fixture(calendar: Arc<dyn CalendarService>, contacts: Vec<Contact>) -> Fixture {
        let services = Services {
            recognizer: Arc::new(NullRecognizer),
            calendar,
            contacts: Arc::new(MemoryContacts::new(contacts)),
            search: None,
            parser: Arc::new(BasicDateTimeParser::new()),
            templates: Templates::default(),
            zone: UserZone::utc(),
            calendar_config: CalendarConfig::default(),
        };
        let dialogs = build_dialogs(&services);
        Fixture { services, dialogs }
    }

    pub fn texts(activities: &[Activity]) -> Vec<String> {
        activities
            .iter()
            .filter(|a| a.activity_type == crate::activity::MESSAGE)
            .map(|a| a.text().to_string())
            .collect()
    }

    /// Backend that is always down.
    pub struct FailingCalendar;

    #[async_trait]
    impl CalendarService for FailingCalendar {
        async fn create_event(&self, _event: NewEvent) -> anyhow::Result<Option<CalendarEvent>> {
            anyhow::bail!("calendar unavailable")
        }

        async fn update_event_by_id(
            &self,
            _id: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> anyhow::Result<CalendarEvent> {
            anyhow::bail!("calendar unavailable")
        }

        async fn get_events_by_time(
            &self,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> anyhow::Result<Vec<CalendarEvent>> {
            anyhow::bail!("calendar unavailable")
        }

        async fn get_events_by_title(&self, _title: &str) -> anyhow::Result<Vec<CalendarEvent>> {
            anyhow::bail!("calendar unavailable")
        }
    }

    /// Returns queued results in order, then `None` intents.
    pub struct ScriptedRecognizer {
        results: Mutex<Vec<RecognizerResult>>,
    }

    impl ScriptedRecognizer {
        pub fn new(mut results: Vec<RecognizerResult>) -> Self {
            results.reverse();
            Self {
                results: Mutex::new(results),
            }
        }
    }

    #[async_trait]
    impl Recognizer for ScriptedRecognizer {
        async fn recognize(&self, text: &str, _locale: &str) -> anyhow::Result<RecognizerResult> {
            let next = self.results.lock().unwrap().pop();
            Ok(next.unwrap_or_else(|| RecognizerResult::none(text)))
        }

        fn name(&self) -> &str {
            "scripted"
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::testing::{fixture, texts, FailingCalendar, ScriptedRecognizer};
    use super::*;
    use crate::activity::{ChannelAccount, ConversationAccount, Entity, SemanticAction};
    use crate::recognizer::{Entities, RecognizerResult};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 15, 10, 0, 0).unwrap()
    }

    fn bot_with(calendar: Arc<dyn CalendarService>, results: Vec<RecognizerResult>) -> SkillBot {
        let mut services = fixture(calendar, vec![]).services;
        services.recognizer = Arc::new(ScriptedRecognizer::new(results));
        SkillBot::new(services)
    }

    fn incoming(text: &str) -> Activity {
        let mut activity = Activity::message(text);
        activity.channel_id = "test".into();
        activity.conversation = ConversationAccount { id: "c1".into() };
        activity.from = ChannelAccount {
            id: "host".into(),
            name: None,
        };
        activity.recipient = ChannelAccount {
            id: "skill".into(),
            name: None,
        };
        activity
    }

    fn intent(intent: Intent, entities: Entities) -> RecognizerResult {
        RecognizerResult {
            text: String::new(),
            top_intent: intent,
            score: 0.9,
            entities,
        }
    }

    #[tokio::test]
    async fn test_semantic_action_starts_dialog_and_replies_are_addressed() {
        let bot = bot_with(Arc::new(MemoryCalendar::new()), vec![]);
        let mut state = ConversationState::default();
        let mut activity = incoming("");
        activity.semantic_action = Some(
            SemanticAction::new(ACTION_CREATE_EVENT).with_slot("title", Entity::text("Retro")),
        );

        let sent = bot.handle(&mut state, &activity, now()).await.unwrap();
        assert_eq!(texts(&sent), vec![bot.services.say(responses::NO_ATTENDEES)]);
        assert_eq!(sent[0].recipient.id, "host");
        assert_eq!(sent[0].conversation.id, "c1");
        assert_eq!(sent[0].reply_to_id, activity.id);
        assert_eq!(state.values.event.title.as_deref(), Some("Retro"));
        assert!(state.values.event.has_detail);
        assert_eq!(state.active_dialog(), Some(calendar::FIND_CONTACT));
    }

    #[tokio::test]
    async fn test_unknown_intent_and_action_are_not_understood() {
        let bot = bot_with(Arc::new(MemoryCalendar::new()), vec![]);
        let mut state = ConversationState::default();
        let sent = bot.handle(&mut state, &incoming("hmm"), now()).await.unwrap();
        assert_eq!(texts(&sent), vec![bot.services.say(responses::DID_NOT_UNDERSTAND)]);
        assert_eq!(sent.last().unwrap().activity_type, crate::activity::END_OF_CONVERSATION);

        let mut activity = incoming("");
        activity.semantic_action = Some(SemanticAction::new("OrderPizza"));
        let sent = bot.handle(&mut state, &activity, now()).await.unwrap();
        assert_eq!(texts(&sent), vec![bot.services.say(responses::DID_NOT_UNDERSTAND)]);
        assert!(!state.is_active());
    }

    #[tokio::test]
    async fn test_cancel_intent_interrupts_active_dialog() {
        let bot = bot_with(
            Arc::new(MemoryCalendar::new()),
            vec![
                intent(Intent::MakeCall, Entities::default()),
                intent(Intent::Cancel, Entities::default()),
            ],
        );
        let mut state = ConversationState::default();
        let sent = bot.handle(&mut state, &incoming("make a call"), now()).await.unwrap();
        assert_eq!(texts(&sent), vec![bot.services.say(responses::CONTACT_PROMPT)]);

        let sent = bot.handle(&mut state, &incoming("never mind"), now()).await.unwrap();
        assert_eq!(texts(&sent), vec![bot.services.say(responses::ACTION_ENDED)]);
        assert_eq!(state, ConversationState::default());
    }

    #[tokio::test]
    async fn test_fault_apologizes_and_resets() {
        let bot = bot_with(
            Arc::new(FailingCalendar),
            vec![intent(
                Intent::ChangeCalendarEntry,
                Entities::default().with("Subject", "sync"),
            )],
        );
        let mut state = ConversationState::default();
        let sent = bot.handle(&mut state, &incoming("move my sync"), now()).await.unwrap();
        assert_eq!(
            texts(&sent).last().cloned(),
            Some(bot.services.say(responses::ERROR_MESSAGE))
        );
        assert_eq!(sent.last().unwrap().activity_type, crate::activity::END_OF_CONVERSATION);
        assert_eq!(state, ConversationState::default());
    }

    #[tokio::test]
    async fn test_on_turn_round_trips_state() {
        let bot = bot_with(
            Arc::new(MemoryCalendar::new()),
            vec![intent(Intent::SearchMovie, Entities::default())],
        );
        let first = bot.on_turn(&incoming("search movies"), None).await.unwrap();
        assert_eq!(texts(&first.activities), vec![bot.services.say(responses::SEARCH_PROMPT)]);
        assert_eq!(first.state["stack"][0]["dialog_id"], "search");

        let second = bot
            .on_turn(&incoming("who directed heat"), Some(first.state))
            .await
            .unwrap();
        // No provider configured: apology, then the task ends.
        assert_eq!(texts(&second.activities), vec![bot.services.say(responses::ERROR_MESSAGE)]);
        assert_eq!(second.state["stack"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_end_of_conversation_clears_state() {
        let bot = bot_with(
            Arc::new(MemoryCalendar::new()),
            vec![intent(Intent::MakeCall, Entities::default())],
        );
        let mut state = ConversationState::default();
        bot.handle(&mut state, &incoming("call"), now()).await.unwrap();
        assert!(state.is_active());

        let mut end = Activity::end_of_conversation();
        end.conversation = ConversationAccount { id: "c1".into() };
        let sent = bot.handle(&mut state, &end, now()).await.unwrap();
        assert!(sent.is_empty());
        assert!(!state.is_active());
    }
}
