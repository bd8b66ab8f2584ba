use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;

use crate::backoff::ReconnectPolicy;
use crate::recognizer::UserZone;
use crate::skills::contacts::Contact;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub skill: SkillConfig,
    /// Only needed by `invoke` (the host side).
    #[serde(default)]
    pub host: Option<HostConfig>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub user: UserConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub recognizer: RecognizerConfig,
    #[serde(default)]
    pub search: Option<SearchConfig>,
    /// Directory served to the calendar and phone skills.
    #[serde(default)]
    pub contacts: Vec<Contact>,
    /// Reply template overrides, keyed by template name.
    #[serde(default)]
    pub responses: HashMap<String, String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SkillConfig {
    pub name: String,
    /// Address the skill-side WebSocket listener binds to.
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "127.0.0.1:3980".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct HostConfig {
    /// URL of the skill manifest (JSON).
    pub manifest_url: String,
    /// Host bot identity. Supports ${ENV_VAR} substitution.
    #[serde(default)]
    pub app_id: String,
    /// Supports ${ENV_VAR} substitution
    #[serde(default)]
    pub app_password: String,
    /// Client-credentials token endpoint. Without it no bearer header is
    /// sent (local development).
    #[serde(default)]
    pub token_endpoint: Option<String>,
    #[serde(default = "default_channel_id")]
    pub channel_id: String,
    #[serde(default = "default_invoke_timeout_secs")]
    pub invoke_timeout_secs: u64,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

fn default_channel_id() -> String {
    "skillbridge".to_string()
}

fn default_invoke_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    #[default]
    Memory,
    File {
        #[serde(default = "default_store_path")]
        path: PathBuf,
    },
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./data/state")
}

#[derive(Debug, Deserialize, Clone)]
pub struct UserConfig {
    #[serde(default = "default_locale")]
    pub locale: String,
    /// Fixed UTC offset of the user, e.g. "+02:00".
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
}

impl Default for UserConfig {
    fn default() -> Self {
        Self {
            locale: default_locale(),
            utc_offset: default_utc_offset(),
        }
    }
}

fn default_locale() -> String {
    "en-us".to_string()
}

fn default_utc_offset() -> String {
    "+00:00".to_string()
}

impl UserConfig {
    pub fn zone(&self) -> anyhow::Result<UserZone> {
        UserZone::parse(&self.utc_offset)
            .ok_or_else(|| anyhow::anyhow!("Invalid user.utc_offset: '{}'", self.utc_offset))
    }
}

/// Per-slot default used when the triggering utterance already carried
/// some detail.
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct SlotDefault {
    #[serde(default)]
    pub skip_by_default: bool,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct SlotDefaults {
    #[serde(default)]
    pub title: SlotDefault,
    #[serde(default)]
    pub content: SlotDefault,
    /// `value` is a day offset from today.
    #[serde(default)]
    pub start_date: SlotDefault,
    /// `value` is in minutes.
    #[serde(default)]
    pub duration: SlotDefault,
    #[serde(default)]
    pub location: SlotDefault,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CalendarConfig {
    /// Replies that mean "use the default" rather than literal text.
    #[serde(default = "default_skip_phrases")]
    pub skip_phrases: Vec<String>,
    #[serde(default = "default_title")]
    pub default_title: String,
    #[serde(default)]
    pub defaults: SlotDefaults,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            skip_phrases: default_skip_phrases(),
            default_title: default_title(),
            defaults: SlotDefaults::default(),
        }
    }
}

fn default_skip_phrases() -> Vec<String> {
    [
        "skip",
        "no",
        "none",
        "nothing",
        "no title",
        "no subject",
        "no content",
        "no location",
        "not needed",
        "don't care",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_title() -> String {
    "New meeting".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct RecognizerConfig {
    /// LUIS-style endpoint. Without it only semantic actions start dialogs.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub app_id: Option<String>,
    /// Supports ${ENV_VAR} substitution
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default = "default_recognizer_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            app_id: None,
            key: None,
            timeout_ms: default_recognizer_timeout_ms(),
        }
    }
}

fn default_recognizer_timeout_ms() -> u64 {
    5000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SearchConfig {
    #[serde(default = "default_search_provider")]
    pub provider: String,
    /// Supports ${ENV_VAR} substitution
    pub api_key: String,
    #[serde(default = "default_max_results")]
    pub max_results: u8,
}

fn default_search_provider() -> String {
    "tavily".to_string()
}

fn default_max_results() -> u8 {
    3
}

impl StoreConfig {
    /// Human-readable description of the store backend
    pub fn description(&self) -> String {
        match self {
            StoreConfig::Memory => "memory".to_string(),
            StoreConfig::File { path } => format!("file ({})", path.display()),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        // Expand environment variables like ${LUIS_KEY}
        let expanded = shellexpand::env(content)?;
        let config: Config = toml::from_str(&expanded)?;
        config.user.zone()?;
        Ok(config)
    }

    pub fn host(&self) -> anyhow::Result<&HostConfig> {
        self.host
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("Missing [host] section"))
    }
}
