/// Activity schema exchanged between host, skill and user channel.
///
/// Only the subset of fields the runtime reads or writes is modelled;
/// unknown fields are dropped on deserialization.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MESSAGE: &str = "message";
pub const EVENT: &str = "event";
pub const TRACE: &str = "trace";
pub const END_OF_CONVERSATION: &str = "endOfConversation";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelAccount {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationAccount {
    pub id: String,
}

/// A typed slot value attached to a semantic action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type", default)]
    pub entity_type: String,
    #[serde(default)]
    pub properties: Value,
}

impl Entity {
    pub fn text(value: &str) -> Self {
        Self {
            entity_type: "text".to_string(),
            properties: serde_json::json!({ "text": value }),
        }
    }

    /// Text payload of the entity. Accepts `{"text": ..}`, the
    /// `{"Key": "Text", "Value": ..}` pair shape, or a bare string.
    pub fn as_text(&self) -> Option<&str> {
        match &self.properties {
            Value::String(s) => Some(s.as_str()),
            Value::Object(map) => map
                .get("text")
                .or_else(|| map.get("Text"))
                .or_else(|| map.get("Value"))
                .and_then(Value::as_str),
            _ => None,
        }
        .map(str::trim)
        .filter(|s| !s.is_empty())
    }

    pub fn as_list(&self) -> Vec<String> {
        match &self.properties {
            Value::Array(items) => items
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect(),
            Value::Object(map) => match map.get("values") {
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(String::from)
                    .collect(),
                _ => self.as_text().map(|t| vec![t.to_string()]).unwrap_or_default(),
            },
            _ => self.as_text().map(|t| vec![t.to_string()]).unwrap_or_default(),
        }
    }
}

/// Structured instruction attached to a message: invoke `action`
/// with pre-filled slots, bypassing NLU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticAction {
    pub id: String,
    #[serde(default)]
    pub entities: HashMap<String, Entity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl SemanticAction {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            entities: HashMap::new(),
            state: None,
        }
    }

    pub fn with_slot(mut self, name: &str, entity: Entity) -> Self {
        self.entities.insert(name.to_string(), entity);
        self
    }

    pub fn slot_text(&self, name: &str) -> Option<&str> {
        self.entities.get(name).and_then(Entity::as_text)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    #[serde(rename = "type")]
    pub activity_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub conversation: ConversationAccount,
    #[serde(default)]
    pub from: ChannelAccount,
    #[serde(default)]
    pub recipient: ChannelAccount,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speak: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_action: Option<SemanticAction>,
}

impl Activity {
    pub fn message(text: &str) -> Self {
        Self {
            activity_type: MESSAGE.to_string(),
            id: Some(uuid::Uuid::new_v4().to_string()),
            text: Some(text.to_string()),
            speak: Some(text.to_string()),
            ..Default::default()
        }
    }

    pub fn event(name: &str, value: Value) -> Self {
        Self {
            activity_type: EVENT.to_string(),
            id: Some(uuid::Uuid::new_v4().to_string()),
            name: Some(name.to_string()),
            value: Some(value),
            ..Default::default()
        }
    }

    pub fn end_of_conversation() -> Self {
        Self {
            activity_type: END_OF_CONVERSATION.to_string(),
            id: Some(uuid::Uuid::new_v4().to_string()),
            ..Default::default()
        }
    }

    /// Builds a reply addressed back to the sender of `self`.
    pub fn reply(&self, mut outgoing: Activity) -> Activity {
        outgoing.channel_id = self.channel_id.clone();
        outgoing.conversation = self.conversation.clone();
        outgoing.from = self.recipient.clone();
        outgoing.recipient = self.from.clone();
        outgoing.reply_to_id = self.id.clone();
        if outgoing.locale.is_none() {
            outgoing.locale = self.locale.clone();
        }
        outgoing
    }

    /// Trimmed user text, `""` when absent.
    pub fn text(&self) -> &str {
        self.text.as_deref().map(str::trim).unwrap_or("")
    }

    /// State key `{channel}/conversations/{conversationId}`.
    pub fn conversation_key(&self) -> String {
        format!("{}/conversations/{}", self.channel_id, self.conversation.id)
    }
}
