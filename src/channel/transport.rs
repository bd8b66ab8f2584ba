//! Duplex WebSocket stream carrying request/response frames.
//!
//! One read task and one write task per connection, the same split as a
//! component connection: the read task dispatches inbound requests to
//! the [`RequestHandler`] and completes pending outbound requests; the
//! write task drains the outbound queue. When either side stops, the
//! connection is marked closed and every pending request fails.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use super::frames::{Frame, RequestFrame, ResponseFrame, StreamPart};
use super::handler::RequestHandler;
use super::ChannelError;

type Pending = Arc<Mutex<HashMap<Uuid, oneshot::Sender<ResponseFrame>>>>;

/// Handle on a live stream. Cheap to clone; all clones share the
/// connection.
#[derive(Clone)]
pub struct StreamConnection {
    outbound: mpsc::Sender<Message>,
    pending: Pending,
    closed: Arc<AtomicBool>,
}

/// Opens a stream to `url`, sending `bearer` (when given) as the
/// `Authorization` header of the upgrade request.
pub async fn connect(
    url: &Url,
    bearer: Option<&str>,
    handler: Arc<dyn RequestHandler>,
) -> Result<StreamConnection, ChannelError> {
    let mut request = url
        .as_str()
        .into_client_request()
        .map_err(classify_connect_error)?;
    if let Some(token) = bearer {
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| ChannelError::Config(format!("invalid bearer token: {e}")))?;
        request.headers_mut().insert(AUTHORIZATION, value);
    }

    let (ws, _response) = tokio_tungstenite::connect_async(request)
        .await
        .map_err(classify_connect_error)?;
    info!("Stream open to {url}");
    Ok(StreamConnection::spawn(ws, handler))
}

fn classify_connect_error(e: WsError) -> ChannelError {
    match e {
        WsError::Http(response) => {
            let status = response.status().as_u16();
            if status == 401 || status == 403 {
                ChannelError::Auth(format!("skill refused the stream with {status}"))
            } else {
                ChannelError::Rejected(status)
            }
        }
        WsError::Url(e) => ChannelError::Config(e.to_string()),
        WsError::HttpFormat(e) => ChannelError::Config(e.to_string()),
        WsError::Io(e) => ChannelError::Transient(e.to_string()),
        WsError::Tls(e) => ChannelError::Transient(e.to_string()),
        other => ChannelError::Protocol(other.to_string()),
    }
}

impl StreamConnection {
    /// Starts the read/write tasks over an established WebSocket.
    pub fn spawn<S>(ws: WebSocketStream<S>, handler: Arc<dyn RequestHandler>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (outbound, outbound_rx) = mpsc::channel::<Message>(100);
        let connection = Self {
            outbound,
            pending: Arc::new(Mutex::new(HashMap::new())),
            closed: Arc::new(AtomicBool::new(false)),
        };
        tokio::spawn(run_event_loop(ws, outbound_rx, connection.clone(), handler));
        connection
    }

    /// Sends a request and waits for the matching response.
    pub async fn request(
        &self,
        verb: &str,
        path: &str,
        streams: Vec<StreamPart>,
        timeout: Duration,
    ) -> Result<ResponseFrame, ChannelError> {
        if self.is_closed() {
            return Err(ChannelError::Transient("stream is closed".into()));
        }

        let id = Uuid::new_v4();
        let (tx, rx) = oneshot::channel();
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(id, tx);
        }

        let frame = Frame::Request(RequestFrame {
            id,
            verb: verb.to_string(),
            path: path.to_string(),
            streams,
        });
        if let Err(e) = self.send_frame(&frame).await {
            self.forget(&id);
            return Err(e);
        }
        debug!("Sent {verb} {path} ({id})");

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(ChannelError::Transient(
                "stream closed before the response".into(),
            )),
            Err(_) => {
                self.forget(&id);
                Err(ChannelError::Timeout(timeout))
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Whether both handles drive the same underlying stream.
    pub fn same_stream(&self, other: &StreamConnection) -> bool {
        Arc::ptr_eq(&self.closed, &other.closed)
    }

    /// Asks the write task to send a close frame.
    pub async fn close(&self) {
        let _ = self.outbound.send(Message::Close(None)).await;
    }

    async fn send_frame(&self, frame: &Frame) -> Result<(), ChannelError> {
        let text = serde_json::to_string(frame)
            .map_err(|e| ChannelError::Protocol(format!("cannot encode frame: {e}")))?;
        self.outbound
            .send(Message::Text(text))
            .await
            .map_err(|_| ChannelError::Transient("stream is closed".into()))
    }

    fn forget(&self, id: &Uuid) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(id);
        }
    }

    fn complete(&self, response: ResponseFrame) {
        let waiter = self
            .pending
            .lock()
            .ok()
            .and_then(|mut pending| pending.remove(&response.id));
        match waiter {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => warn!("Response {} matches no pending request", response.id),
        }
    }

    fn shut_down(&self) {
        self.closed.store(true, Ordering::SeqCst);
        // Dropping the senders fails every waiter.
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
    }
}

async fn run_event_loop<S>(
    ws: WebSocketStream<S>,
    mut outbound_rx: mpsc::Receiver<Message>,
    connection: StreamConnection,
    handler: Arc<dyn RequestHandler>,
) where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (mut sink, mut stream) = ws.split();

    let reader = connection.clone();
    let mut read_handle = tokio::spawn(async move {
        while let Some(message) = stream.next().await {
            let text = match message {
                Ok(Message::Text(text)) => text,
                Ok(Message::Close(_)) => {
                    info!("Stream closed by peer");
                    break;
                }
                Ok(_) => continue,
                Err(e) => {
                    error!("Stream read error: {e}");
                    break;
                }
            };

            match serde_json::from_str::<Frame>(&text) {
                Ok(Frame::Response(response)) => reader.complete(response),
                Ok(Frame::Request(request)) => {
                    let handler = handler.clone();
                    let peer = reader.clone();
                    tokio::spawn(async move {
                        let id = request.id;
                        debug!("Handling {} {} ({id})", request.verb, request.path);
                        let reply = handler.handle(request, peer.clone()).await;
                        let frame = Frame::Response(ResponseFrame {
                            id,
                            status: reply.status,
                            streams: reply.streams,
                        });
                        if let Err(e) = peer.send_frame(&frame).await {
                            warn!("Could not answer request {id}: {e}");
                        }
                    });
                }
                Err(e) => warn!("Dropping malformed frame: {e}"),
            }
        }
    });

    let mut write_handle = tokio::spawn(async move {
        while let Some(message) = outbound_rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if let Err(e) = sink.send(message).await {
                error!("Stream write error: {e}");
                break;
            }
            if closing {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut read_handle => write_handle.abort(),
        _ = &mut write_handle => read_handle.abort(),
    }
    connection.shut_down();
    debug!("Stream event loop finished");
}
