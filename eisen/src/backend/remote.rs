//! Remote backend: WebSocket client of the `eisen-store` server.
//!
//! One connection per backend, bound to the actor named in the opening
//! `Hello`. Requests carry a `request_id` that the background reader task
//! uses to hand each response back to its caller; pushed `Snapshot` frames
//! are routed to the matching [`Subscription`].

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use eisen_proto::doc::{DocPath, Document, WriteBatch};
use eisen_proto::store::{self, StoreMessage};
use eisen_proto::task::Task;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::{BackendError, BackendKind, PersistenceBackend, Subscription, ensure_task_collection};

/// Read half of the WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Write half of the WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Default timeout for connecting and for each request.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Where the reader task delivers incoming frames.
#[derive(Debug, Default)]
struct Routes {
    /// Request id -> caller waiting for the response.
    responses: HashMap<u64, oneshot::Sender<StoreMessage>>,
    /// Subscribe request id -> snapshot channel, until `Subscribed` arrives.
    awaiting_subscription: HashMap<u64, mpsc::UnboundedSender<Vec<Task>>>,
    /// Subscription id -> snapshot channel.
    subscriptions: HashMap<u64, mpsc::UnboundedSender<Vec<Task>>>,
}

/// WebSocket client of the document store.
pub struct RemoteBackend {
    url: String,
    actor_id: String,
    outbound: mpsc::UnboundedSender<Message>,
    routes: Arc<Mutex<Routes>>,
    next_request_id: AtomicU64,
    connected: Arc<AtomicBool>,
    request_timeout: Duration,
    _reader_handle: tokio::task::JoinHandle<()>,
    _writer_handle: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for RemoteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBackend")
            .field("url", &self.url)
            .field("actor_id", &self.actor_id)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl RemoteBackend {
    /// Connects to the store at `url` and binds the connection to `actor_id`.
    ///
    /// Steps:
    /// 1. Open the WebSocket (bounded by `timeout`)
    /// 2. Send `Hello` and wait for `Welcome` (bounded by `timeout`)
    /// 3. Spawn the reader and writer tasks
    ///
    /// # Errors
    ///
    /// - [`BackendError::Timeout`] if either step exceeds `timeout`.
    /// - [`BackendError::Unavailable`] if `url` is not a `ws://`/`wss://`
    ///   URL, or the server cannot be reached or rejects the `Hello`.
    /// - [`BackendError::ConnectionClosed`] if the server hangs up first.
    pub async fn connect(url: &str, actor_id: &str, timeout: Duration) -> Result<Self, BackendError> {
        validate_store_url(url)?;
        let (ws_stream, _response) = tokio::time::timeout(timeout, connect_async(url))
            .await
            .map_err(|_| {
                tracing::warn!(url, "store WebSocket connect timed out");
                BackendError::Timeout
            })?
            .map_err(|e| {
                tracing::warn!(url, error = %e, "store WebSocket connect failed");
                map_ws_connect_error(e)
            })?;

        let (mut ws_sender, mut ws_reader) = ws_stream.split();

        let hello = store::encode(&StoreMessage::Hello {
            actor_id: actor_id.to_string(),
        })?;
        ws_sender
            .send(Message::Binary(hello.into()))
            .await
            .map_err(|e| BackendError::Unavailable(format!("failed to send Hello: {e}")))?;

        let reply = tokio::time::timeout(timeout, ws_reader.next())
            .await
            .map_err(|_| {
                tracing::warn!(url, "store handshake timed out");
                BackendError::Timeout
            })?;
        match reply {
            Some(Ok(Message::Binary(data))) => match store::decode(&data)? {
                StoreMessage::Welcome { actor_id: bound } if bound == actor_id => {
                    tracing::info!(url, actor_id, "connected to document store");
                }
                other => {
                    tracing::warn!(msg = ?other, "unexpected handshake response");
                    return Err(BackendError::Unavailable(
                        "unexpected handshake response".to_string(),
                    ));
                }
            },
            Some(Ok(_)) => {
                return Err(BackendError::Unavailable(
                    "unexpected non-binary frame during handshake".to_string(),
                ));
            }
            Some(Err(e)) => {
                return Err(BackendError::Unavailable(format!(
                    "WebSocket error during handshake: {e}"
                )));
            }
            None => return Err(BackendError::ConnectionClosed),
        }

        let connected = Arc::new(AtomicBool::new(true));
        let routes = Arc::new(Mutex::new(Routes::default()));
        let (outbound, outbound_rx) = mpsc::unbounded_channel();

        let writer_handle = tokio::spawn(writer_loop(ws_sender, outbound_rx, Arc::clone(&connected)));
        let reader_handle = tokio::spawn(reader_loop(
            ws_reader,
            Arc::clone(&routes),
            outbound.clone(),
            Arc::clone(&connected),
        ));

        Ok(Self {
            url: url.to_string(),
            actor_id: actor_id.to_string(),
            outbound,
            routes,
            next_request_id: AtomicU64::new(1),
            connected,
            request_timeout: timeout,
            _reader_handle: reader_handle,
            _writer_handle: writer_handle,
        })
    }

    /// Server URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Actor this connection is bound to.
    #[must_use]
    pub fn actor_id(&self) -> &str {
        &self.actor_id
    }

    /// Whether the connection is still up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    /// Sends a request built from a fresh id and waits for its response.
    async fn request(
        &self,
        build: impl FnOnce(u64) -> StoreMessage,
        subscription: Option<mpsc::UnboundedSender<Vec<Task>>>,
    ) -> Result<StoreMessage, BackendError> {
        if !self.is_connected() {
            return Err(BackendError::ConnectionClosed);
        }
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let bytes = store::encode(&build(request_id))?;

        let (tx, rx) = oneshot::channel();
        {
            let mut routes = self.routes.lock();
            routes.responses.insert(request_id, tx);
            if let Some(sink) = subscription {
                routes.awaiting_subscription.insert(request_id, sink);
            }
        }

        if self.outbound.send(Message::Binary(bytes.into())).is_err() {
            self.forget(request_id);
            return Err(BackendError::ConnectionClosed);
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(StoreMessage::Error { reason, .. })) => Err(BackendError::WriteFailed(reason)),
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(BackendError::ConnectionClosed),
            Err(_) => {
                self.forget(request_id);
                tracing::warn!(request_id, "store request timed out");
                Err(BackendError::Timeout)
            }
        }
    }

    fn forget(&self, request_id: u64) {
        let mut routes = self.routes.lock();
        routes.responses.remove(&request_id);
        routes.awaiting_subscription.remove(&request_id);
    }

    async fn write(&self, build: impl FnOnce(u64) -> StoreMessage) -> Result<(), BackendError> {
        match self.request(build, None).await? {
            StoreMessage::Ack { .. } => Ok(()),
            other => Err(BackendError::WriteFailed(format!("unexpected response: {other:?}"))),
        }
    }
}

impl PersistenceBackend for RemoteBackend {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, BackendError> {
        let path = path.clone();
        match self.request(|request_id| StoreMessage::Get { request_id, path }, None).await {
            Ok(StoreMessage::Found { document, .. }) => Ok(document),
            Ok(other) => Err(BackendError::ReadFailed(format!("unexpected response: {other:?}"))),
            Err(BackendError::WriteFailed(reason)) => Err(BackendError::ReadFailed(reason)),
            Err(e) => Err(e),
        }
    }

    async fn set(&self, path: &DocPath, document: Document) -> Result<(), BackendError> {
        let path = path.clone();
        self.write(|request_id| StoreMessage::Set {
            request_id,
            path,
            document,
        })
        .await
    }

    async fn delete(&self, path: &DocPath) -> Result<(), BackendError> {
        let path = path.clone();
        self.write(|request_id| StoreMessage::Delete { request_id, path }).await
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), BackendError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.write(|request_id| StoreMessage::Commit { request_id, batch }).await
    }

    async fn subscribe(&self, path: &DocPath) -> Result<Subscription, BackendError> {
        ensure_task_collection(path)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let path = path.clone();
        let response = self
            .request(|request_id| StoreMessage::Subscribe { request_id, path }, Some(tx))
            .await?;
        let StoreMessage::Subscribed {
            subscription_id, ..
        } = response
        else {
            return Err(BackendError::ReadFailed(format!(
                "unexpected response: {response:?}"
            )));
        };

        let routes = Arc::clone(&self.routes);
        let outbound = self.outbound.clone();
        Ok(Subscription::with_close_hook(rx, move || {
            routes.lock().subscriptions.remove(&subscription_id);
            if let Ok(bytes) = store::encode(&StoreMessage::Unsubscribe { subscription_id }) {
                let _ = outbound.send(Message::Binary(bytes.into()));
            }
        }))
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Remote
    }
}

/// Drains the outbound queue into the socket.
async fn writer_loop(
    mut ws_sender: WsSender,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    connected: Arc<AtomicBool>,
) {
    while let Some(msg) = outbound.recv().await {
        if let Err(e) = ws_sender.send(msg).await {
            tracing::warn!(error = %e, "store WebSocket write failed");
            break;
        }
    }
    connected.store(false, Ordering::Relaxed);
}

/// Reads frames and routes responses and snapshots.
///
/// Malformed frames are logged and skipped. On exit every waiting caller
/// is released with `ConnectionClosed` and every subscription ends.
async fn reader_loop(
    mut ws_reader: WsReader,
    routes: Arc<Mutex<Routes>>,
    outbound: mpsc::UnboundedSender<Message>,
    connected: Arc<AtomicBool>,
) {
    while let Some(frame) = ws_reader.next().await {
        match frame {
            Ok(Message::Binary(data)) => match store::decode(&data) {
                Ok(StoreMessage::Snapshot {
                    subscription_id,
                    tasks,
                }) => {
                    let sink = routes.lock().subscriptions.get(&subscription_id).cloned();
                    match sink {
                        Some(sink) if sink.send(tasks).is_err() => {
                            routes.lock().subscriptions.remove(&subscription_id);
                            if let Ok(bytes) =
                                store::encode(&StoreMessage::Unsubscribe { subscription_id })
                            {
                                let _ = outbound.send(Message::Binary(bytes.into()));
                            }
                        }
                        Some(_) => {}
                        None => {
                            tracing::debug!(subscription_id, "snapshot for unknown subscription");
                        }
                    }
                }
                Ok(msg) => route_response(&routes, msg),
                Err(e) => {
                    tracing::warn!(error = %e, "malformed store frame, skipping");
                }
            },
            Ok(Message::Close(_)) => {
                tracing::info!("store WebSocket closed by server");
                break;
            }
            Ok(_) => {
                // Ignore ping/pong/text frames.
            }
            Err(e) => {
                tracing::warn!(error = %e, "store WebSocket read error");
                break;
            }
        }
    }
    connected.store(false, Ordering::Relaxed);
    let mut routes = routes.lock();
    routes.responses.clear();
    routes.awaiting_subscription.clear();
    routes.subscriptions.clear();
    tracing::info!("store reader task exiting");
}

fn route_response(routes: &Mutex<Routes>, msg: StoreMessage) {
    let Some(request_id) = msg.response_id() else {
        if let StoreMessage::Error { reason, .. } = &msg {
            tracing::warn!(reason = %reason, "store server error");
        } else {
            tracing::debug!(msg = ?msg, "unexpected store message");
        }
        return;
    };
    let mut routes = routes.lock();
    if let Some(sink) = routes.awaiting_subscription.remove(&request_id)
        && let StoreMessage::Subscribed {
            subscription_id, ..
        } = &msg
    {
        // Registered before the caller wakes so the initial snapshot that
        // follows is not lost.
        routes.subscriptions.insert(*subscription_id, sink);
    }
    if let Some(waiter) = routes.responses.remove(&request_id) {
        let _ = waiter.send(msg);
    }
}

/// Maps a connection error to a [`BackendError`].
fn map_ws_connect_error(err: tokio_tungstenite::tungstenite::Error) -> BackendError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Io(io_err)
            if matches!(
                io_err.kind(),
                std::io::ErrorKind::ConnectionRefused | std::io::ErrorKind::AddrNotAvailable
            ) =>
        {
            BackendError::Unavailable(format!("store unreachable: {io_err}"))
        }
        WsError::Io(io_err) => BackendError::Io(io_err),
        WsError::Http(response) => {
            BackendError::Unavailable(format!("store HTTP error: status {}", response.status()))
        }
        other => BackendError::Unavailable(format!("store connection error: {other}")),
    }
}

/// Accepts only `ws://` and `wss://` URLs with a host.
fn validate_store_url(raw: &str) -> Result<(), BackendError> {
    let parsed = url::Url::parse(raw)
        .map_err(|e| BackendError::Unavailable(format!("invalid store url {raw}: {e}")))?;
    match parsed.scheme() {
        "ws" | "wss" if parsed.host_str().is_some() => Ok(()),
        scheme => Err(BackendError::Unavailable(format!(
            "store url must use ws or wss, got {scheme}://"
        ))),
    }
}
