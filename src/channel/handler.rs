//! Inbound request validation and the host-side request handler.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use super::frames::{
    Reply, RequestFrame, StreamPart, STATUS_BAD_REQUEST, STATUS_NOT_ACCEPTABLE, STATUS_OK,
};
use super::transport::StreamConnection;
use crate::activity::{Activity, TRACE};

/// Handles requests the peer sends over the stream.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// `peer` can be used to send requests back on the same stream.
    async fn handle(&self, request: RequestFrame, peer: StreamConnection) -> Reply;
}

/// A request that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidRequest {
    pub activity: Activity,
    /// Second stream, when present and not null.
    pub prior: Option<Value>,
}

/// Stream 0 carries the activity, stream 1 (optional) the prior state.
/// Empty body or no stream → 400; any non-JSON stream → 406.
pub fn validate(streams: &[StreamPart]) -> Result<ValidRequest, u16> {
    let Some(first) = streams.first() else {
        return Err(STATUS_BAD_REQUEST);
    };
    if is_empty_body(&first.body) {
        return Err(STATUS_BAD_REQUEST);
    }
    if streams.iter().any(|s| !s.is_json()) {
        return Err(STATUS_NOT_ACCEPTABLE);
    }

    let activity: Activity =
        serde_json::from_value(first.body.clone()).map_err(|_| STATUS_BAD_REQUEST)?;
    let prior = streams
        .get(1)
        .map(|s| s.body.clone())
        .filter(|v| !v.is_null());
    Ok(ValidRequest { activity, prior })
}

fn is_empty_body(body: &Value) -> bool {
    match body {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Host side: buffers the activities a skill streams back, per
/// conversation, until the turn's response arrives.
#[derive(Default)]
pub struct ActivityCollector {
    buffers: Mutex<HashMap<String, Vec<Activity>>>,
}

impl ActivityCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes everything buffered for `conversation_key`.
    pub fn drain(&self, conversation_key: &str) -> Vec<Activity> {
        self.buffers
            .lock()
            .map(|mut b| b.remove(conversation_key).unwrap_or_default())
            .unwrap_or_default()
    }

    fn push(&self, activity: Activity) -> bool {
        match self.buffers.lock() {
            Ok(mut buffers) => {
                buffers
                    .entry(activity.conversation_key())
                    .or_default()
                    .push(activity);
                true
            }
            Err(_) => false,
        }
    }
}

#[async_trait]
impl RequestHandler for ActivityCollector {
    async fn handle(&self, request: RequestFrame, _peer: StreamConnection) -> Reply {
        let valid = match validate(&request.streams) {
            Ok(valid) => valid,
            Err(status) => {
                warn!("Rejected {} {} with {status}", request.verb, request.path);
                return Reply::status(status);
            }
        };

        let activity = valid.activity;
        if activity.activity_type == TRACE {
            debug!("Trace from skill: {}", activity.text());
        } else {
            debug!(
                "Skill sent {} activity on {}",
                activity.activity_type,
                activity.conversation_key()
            );
        }
        if self.push(activity) {
            Reply::status(STATUS_OK)
        } else {
            Reply::status(super::frames::STATUS_INTERNAL_ERROR)
        }
    }
}
