//! Skill invocation channel.
//!
//! A host discovers a skill through its manifest, exchanges its app
//! credentials for a bearer token, and keeps one duplex WebSocket stream
//! open to the skill. Both directions carry request frames: the host
//! posts a turn, the skill posts back the activities it produces and
//! finally answers the turn with its updated state.

pub mod credentials;
pub mod frames;
pub mod handler;
pub mod invoker;
pub mod manifest;
pub mod server;
pub mod transport;

use std::time::Duration;

use thiserror::Error;
use url::Url;

pub use credentials::AppCredentials;
pub use invoker::RemoteSkill;
pub use manifest::SkillManifest;
pub use server::SkillEndpoint;

/// Path turns are posted to.
pub const MESSAGES_PATH: &str = "/api/messages";

#[derive(Debug, Error)]
pub enum ChannelError {
    /// Bad configuration (empty endpoint, invalid URL). Never retried.
    #[error("configuration error: {0}")]
    Config(String),
    /// Network-level failure. Worth another attempt.
    #[error("transient failure: {0}")]
    Transient(String),
    /// Credentials refused by the token endpoint or the skill.
    #[error("authentication failed: {0}")]
    Auth(String),
    /// The peer answered with a non-success status.
    #[error("request rejected with status {0}")]
    Rejected(u16),
    #[error("no response within {0:?}")]
    Timeout(Duration),
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ChannelError {
    /// Whether re-establishing the stream may help.
    pub fn is_retriable(&self) -> bool {
        match self {
            ChannelError::Transient(_) | ChannelError::Timeout(_) => true,
            ChannelError::Rejected(status) => *status >= 500,
            ChannelError::Config(_) | ChannelError::Auth(_) | ChannelError::Protocol(_) => false,
        }
    }
}

/// Maps `http(s)://` endpoints onto `ws(s)://`. An empty endpoint is a
/// configuration error, caught before any network attempt.
pub fn ensure_websocket_url(endpoint: &str) -> Result<Url, ChannelError> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(ChannelError::Config("skill endpoint is empty".into()));
    }

    let mapped = if let Some(rest) = endpoint.strip_prefix("http://") {
        format!("ws://{rest}")
    } else if let Some(rest) = endpoint.strip_prefix("https://") {
        format!("wss://{rest}")
    } else {
        endpoint.to_string()
    };

    let url = Url::parse(&mapped)
        .map_err(|e| ChannelError::Config(format!("invalid skill endpoint '{endpoint}': {e}")))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ChannelError::Config(format!(
            "unsupported scheme '{other}' in skill endpoint"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_maps_to_ws() {
        let url = ensure_websocket_url("http://localhost:3980/api/messages").unwrap();
        assert_eq!(url.as_str(), "ws://localhost:3980/api/messages");
        let url = ensure_websocket_url(" https://skills.contoso.com/api/messages ").unwrap();
        assert_eq!(url.as_str(), "wss://skills.contoso.com/api/messages");
        let url = ensure_websocket_url("wss://already.example/ws").unwrap();
        assert_eq!(url.scheme(), "wss");
    }

    #[test]
    fn test_empty_endpoint_is_fatal() {
        let err = ensure_websocket_url("   ").unwrap_err();
        assert!(matches!(err, ChannelError::Config(_)));
        assert!(!err.is_retriable());
    }

    #[test]
    fn test_other_schemes_rejected() {
        assert!(matches!(
            ensure_websocket_url("ftp://files.example/skill"),
            Err(ChannelError::Config(_))
        ));
        assert!(matches!(
            ensure_websocket_url("not a url"),
            Err(ChannelError::Config(_))
        ));
    }

    #[test]
    fn test_retriable_split() {
        assert!(ChannelError::Transient("reset".into()).is_retriable());
        assert!(ChannelError::Timeout(Duration::from_secs(1)).is_retriable());
        assert!(ChannelError::Rejected(503).is_retriable());
        assert!(!ChannelError::Rejected(400).is_retriable());
        assert!(!ChannelError::Auth("401".into()).is_retriable());
        assert!(!ChannelError::Protocol("bad frame".into()).is_retriable());
    }
}
