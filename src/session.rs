//! Per-session SSE transport.
//!
//! One downstream client session is carried over two HTTP channels: a
//! long-lived GET response streaming SSE events server-to-client, and POSTs
//! to `/messages?sessionId=<id>` client-to-server. The pieces here tie the
//! two together:
//!
//! - [`SseSessionTransport`] is handed to the MCP service. It is a
//!   `Stream` of inbound client messages and a `Sink` for outbound server
//!   messages, which is all the SDK needs of a transport.
//! - [`SessionHandle`] lives in the sessions map and routes POSTed messages
//!   into the transport.
//! - [`EventStream`] is the SSE response body. Its first event is the
//!   `endpoint` event advertising the POST URL; every later event is a
//!   `message` event carrying one JSON-RPC message. Dropping it (client
//!   disconnect or shutdown) tears the session down exactly once.

use std::collections::HashMap;
use std::convert::Infallible;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, RwLock};
use std::task::{Context, Poll};

use axum::response::sse::Event;
use futures::{Sink, Stream};
use rmcp::model::{ClientJsonRpcMessage, ServerJsonRpcMessage};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, PollSender};
use tracing::{debug, error};
use uuid::Uuid;

use crate::error::ProxyError;

/// Opaque session identifier; a UUID v4. The session id is the only token
/// that authorizes POSTs, so it must be unguessable.
pub type SessionId = Arc<str>;

pub(crate) type SessionMap = Arc<RwLock<HashMap<SessionId, SessionHandle>>>;

const CHANNEL_CAPACITY: usize = 64;

fn new_session_id() -> SessionId {
    Uuid::new_v4().to_string().into()
}

/// Create a new session: generates the id, registers the handle in the
/// sessions map and returns the transport plus the SSE body stream.
pub(crate) fn create(
    post_path: &str,
    sessions: SessionMap,
    ct: CancellationToken,
) -> (SessionId, SseSessionTransport, EventStream) {
    let session_id = new_session_id();
    let (to_client_tx, to_client_rx) = mpsc::channel::<ServerJsonRpcMessage>(CHANNEL_CAPACITY);
    let (from_client_tx, from_client_rx) = mpsc::channel::<ClientJsonRpcMessage>(CHANNEL_CAPACITY);

    let handle = SessionHandle {
        session_id: session_id.clone(),
        from_client: from_client_tx,
        ct: ct.clone(),
    };
    lock_write(&sessions).insert(session_id.clone(), handle);

    let transport = SseSessionTransport {
        session_id: session_id.clone(),
        from_client: ReceiverStream::new(from_client_rx),
        to_client: PollSender::new(to_client_tx),
    };

    let events = EventStream {
        endpoint: format!("{}?sessionId={}", post_path, session_id),
        state: EventStreamState::Endpoint,
        rx: to_client_rx,
        session_id: session_id.clone(),
        sessions,
        ct,
    };

    (session_id, transport, events)
}

fn lock_write(sessions: &SessionMap) -> std::sync::RwLockWriteGuard<'_, HashMap<SessionId, SessionHandle>> {
    sessions.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn lock_read(
    sessions: &SessionMap,
) -> std::sync::RwLockReadGuard<'_, HashMap<SessionId, SessionHandle>> {
    sessions.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The sessions-map side of a session: delivers POSTed messages and closes
/// the session.
#[derive(Clone)]
pub struct SessionHandle {
    session_id: SessionId,
    from_client: mpsc::Sender<ClientJsonRpcMessage>,
    ct: CancellationToken,
}

impl SessionHandle {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Deliver one inbound message to the session's service.
    pub async fn push(&self, message: ClientJsonRpcMessage) -> Result<(), ProxyError> {
        self.from_client
            .send(message)
            .await
            .map_err(|_| ProxyError::NotConnected)
    }

    /// Close the session. Idempotent: repeated calls are no-ops.
    pub fn close(&self) {
        self.ct.cancel();
    }
}

/// The transport handed to the MCP service for one session.
pub struct SseSessionTransport {
    session_id: SessionId,
    from_client: ReceiverStream<ClientJsonRpcMessage>,
    to_client: PollSender<ServerJsonRpcMessage>,
}

impl SseSessionTransport {
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

impl Stream for SseSessionTransport {
    type Item = ClientJsonRpcMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.from_client).poll_next(cx)
    }
}

impl Sink<ServerJsonRpcMessage> for SseSessionTransport {
    type Error = io::Error;

    fn poll_ready(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Pin::new(&mut self.to_client)
            .poll_ready(cx)
            .map_err(|_| closed_error())
    }

    fn start_send(mut self: Pin<&mut Self>, item: ServerJsonRpcMessage) -> Result<(), io::Error> {
        Pin::new(&mut self.to_client)
            .start_send(item)
            .map_err(|_| closed_error())
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Pin::new(&mut self.to_client)
            .poll_flush(cx)
            .map_err(|_| closed_error())
    }

    fn poll_close(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        Pin::new(&mut self.to_client)
            .poll_close(cx)
            .map_err(|_| closed_error())
    }
}

fn closed_error() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, ProxyError::NotConnected.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventStreamState {
    /// The endpoint event has not been written yet.
    Endpoint,
    /// Endpoint event sent; streaming `message` events.
    Open,
    Closed,
}

/// SSE body for one session. States move Endpoint -> Open -> Closed and
/// never go back.
pub struct EventStream {
    endpoint: String,
    state: EventStreamState,
    rx: mpsc::Receiver<ServerJsonRpcMessage>,
    session_id: SessionId,
    sessions: SessionMap,
    ct: CancellationToken,
}

impl Stream for EventStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        loop {
            match this.state {
                EventStreamState::Endpoint => {
                    this.state = EventStreamState::Open;
                    let event = Event::default().event("endpoint").data(&this.endpoint);
                    return Poll::Ready(Some(Ok(event)));
                }
                EventStreamState::Open => match this.rx.poll_recv(cx) {
                    Poll::Ready(Some(message)) => match serde_json::to_string(&message) {
                        Ok(json) => {
                            let event = Event::default().event("message").data(json);
                            return Poll::Ready(Some(Ok(event)));
                        }
                        Err(err) => {
                            error!(
                                "session {}: failed to serialize outbound message: {}",
                                this.session_id, err
                            );
                            continue;
                        }
                    },
                    Poll::Ready(None) => {
                        this.state = EventStreamState::Closed;
                        return Poll::Ready(None);
                    }
                    Poll::Pending => return Poll::Pending,
                },
                EventStreamState::Closed => return Poll::Ready(None),
            }
        }
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        // Client disconnect, service end or shutdown all land here; the
        // session is removed from the map exactly once.
        self.ct.cancel();
        if lock_write(&self.sessions).remove(&self.session_id).is_some() {
            debug!("session {} closed", self.session_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    fn ping() -> ClientJsonRpcMessage {
        serde_json::from_value(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"}))
            .expect("valid message")
    }

    fn new_session() -> (SessionMap, SessionId, SseSessionTransport, EventStream) {
        let sessions: SessionMap = Arc::new(RwLock::new(HashMap::new()));
        let (id, transport, events) =
            create("/messages", sessions.clone(), CancellationToken::new());
        (sessions, id, transport, events)
    }

    #[tokio::test]
    async fn push_delivers_to_the_transport() {
        let (sessions, id, mut transport, _events) = new_session();

        let handle = lock_read(&sessions).get(&id).cloned().expect("registered");
        handle.push(ping()).await.expect("session is open");

        let received = transport.next().await.expect("one message");
        let value = serde_json::to_value(&received).expect("serializable");
        assert_eq!(value["method"], "ping");
    }

    #[tokio::test]
    async fn push_after_transport_drop_is_not_connected() {
        let (sessions, id, transport, _events) = new_session();
        let handle = lock_read(&sessions).get(&id).cloned().expect("registered");

        drop(transport);
        let err = handle.push(ping()).await.expect_err("must fail");
        assert!(matches!(err, ProxyError::NotConnected));
    }

    #[tokio::test]
    async fn dropping_the_event_stream_removes_the_session_once() {
        let (sessions, id, _transport, events) = new_session();
        assert!(lock_read(&sessions).contains_key(&id));

        drop(events);
        assert!(!lock_read(&sessions).contains_key(&id));
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (sessions, id, _transport, _events) = new_session();
        let handle = lock_read(&sessions).get(&id).cloned().expect("registered");
        handle.close();
        handle.close();
        assert!(handle.ct.is_cancelled());
    }

    #[test]
    fn session_ids_are_unique() {
        assert_ne!(new_session_id(), new_session_id());
    }
}
