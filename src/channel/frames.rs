//! Wire frames of the duplex stream.
//!
//! Every WebSocket text message is one JSON [`Frame`]. Requests and
//! responses are correlated by `id`. A body is a list of streams, each
//! tagged with its content type; only JSON is accepted.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

pub const JSON_CONTENT_TYPE: &str = "application/json; charset=utf-8";

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_NOT_ACCEPTABLE: u16 = 406;
pub const STATUS_INTERNAL_ERROR: u16 = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamPart {
    #[serde(default)]
    pub content_type: String,
    #[serde(default)]
    pub body: Value,
}

impl StreamPart {
    pub fn json(body: Value) -> Self {
        Self {
            content_type: JSON_CONTENT_TYPE.to_string(),
            body,
        }
    }

    pub fn is_json(&self) -> bool {
        self.content_type.trim().eq_ignore_ascii_case(JSON_CONTENT_TYPE)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    pub id: Uuid,
    pub verb: String,
    pub path: String,
    #[serde(default)]
    pub streams: Vec<StreamPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    pub id: Uuid,
    pub status: u16,
    #[serde(default)]
    pub streams: Vec<StreamPart>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Frame {
    Request(RequestFrame),
    Response(ResponseFrame),
}

/// What a request handler answers with; the id is filled in by the
/// transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub streams: Vec<StreamPart>,
}

impl Reply {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            streams: Vec::new(),
        }
    }

    pub fn ok(streams: Vec<StreamPart>) -> Self {
        Self {
            status: STATUS_OK,
            streams,
        }
    }
}
