//! Skill-side listener.
//!
//! Accepts streams from hosts, runs each posted turn through a
//! [`TurnHandler`], streams the produced activities back to the host and
//! answers the turn with the updated state.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tracing::{debug, error, info, warn};

use super::frames::{Reply, RequestFrame, StreamPart, STATUS_INTERNAL_ERROR, STATUS_OK};
use super::handler::{validate, RequestHandler};
use super::transport::StreamConnection;
use crate::host::TurnHandler;

/// Answers `POST /api/messages` with the skill's turn.
pub struct SkillEndpoint {
    handler: Arc<dyn TurnHandler>,
    timeout: Duration,
}

impl SkillEndpoint {
    pub fn new(handler: Arc<dyn TurnHandler>, timeout: Duration) -> Self {
        Self { handler, timeout }
    }
}

#[async_trait]
impl RequestHandler for SkillEndpoint {
    async fn handle(&self, request: RequestFrame, peer: StreamConnection) -> Reply {
        let valid = match validate(&request.streams) {
            Ok(valid) => valid,
            Err(status) => {
                warn!("Rejected {} {} with {status}", request.verb, request.path);
                return Reply::status(status);
            }
        };
        let activity = valid.activity;
        let conversation = activity.conversation.id.clone();
        debug!(
            "Turn on {} ({} activity)",
            activity.conversation_key(),
            activity.activity_type
        );

        let response = match tokio::time::timeout(
            self.timeout,
            self.handler.on_turn(&activity, valid.prior),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!("Turn on {} failed: {e:#}", activity.conversation_key());
                return Reply::status(STATUS_INTERNAL_ERROR);
            }
            Err(_) => {
                error!("Turn on {} timed out", activity.conversation_key());
                return Reply::status(STATUS_INTERNAL_ERROR);
            }
        };

        let path = format!("/v3/conversations/{conversation}/activities");
        for outgoing in &response.activities {
            let body = match serde_json::to_value(outgoing) {
                Ok(body) => body,
                Err(e) => {
                    error!("Cannot encode activity: {e}");
                    return Reply::status(STATUS_INTERNAL_ERROR);
                }
            };
            match peer
                .request("POST", &path, vec![StreamPart::json(body)], self.timeout)
                .await
            {
                Ok(r) if r.status == STATUS_OK => {}
                Ok(r) => warn!("Host answered {} to {path}", r.status),
                Err(e) => {
                    error!("Could not deliver activity to host: {e}");
                    return Reply::status(STATUS_INTERNAL_ERROR);
                }
            }
        }

        Reply::ok(vec![StreamPart::json(response.state)])
    }
}

/// Binds `listen` and serves streams until the task is dropped.
pub async fn serve(listen: &str, handler: Arc<dyn RequestHandler>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(listen).await?;
    info!("Listening on ws://{}", listener.local_addr()?);
    serve_on(listener, handler).await
}

pub async fn serve_on(listener: TcpListener, handler: Arc<dyn RequestHandler>) -> anyhow::Result<()> {
    loop {
        let (tcp, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!("Accept failed: {e}");
                continue;
            }
        };
        let handler = handler.clone();
        tokio::spawn(async move {
            match upgrade(tcp).await {
                Ok(ws) => {
                    info!("Host connected from {peer}");
                    StreamConnection::spawn(ws, handler);
                }
                Err(e) => warn!("Handshake with {peer} failed: {e}"),
            }
        });
    }
}

async fn upgrade(
    tcp: TcpStream,
) -> Result<tokio_tungstenite::WebSocketStream<TcpStream>, tokio_tungstenite::tungstenite::Error> {
    // Bearer tokens are not validated here; their presence is logged.
    tokio_tungstenite::accept_hdr_async(tcp, |request: &Request, response: Response| {
        let authenticated = request.headers().contains_key(AUTHORIZATION);
        debug!(
            "Upgrade {} ({})",
            request.uri().path(),
            if authenticated { "bearer" } else { "anonymous" }
        );
        Ok::<Response, ErrorResponse>(response)
    })
    .await
}
