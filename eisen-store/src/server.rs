//! Store server core: shared state, WebSocket handler, request dispatch, and
//! snapshot fan-out.
//!
//! Each WebSocket connection is bound to one actor by its opening `Hello`.
//! Requests are answered in order on the same connection; after every write
//! that changes an actor's task collection, every subscriber of that
//! collection receives the full ordered snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use axum::extract::ws::{Message, WebSocket};
use eisen_proto::codec;
use eisen_proto::doc::{Collection, DocPath};
use eisen_proto::docset::WriteOutcome;
use eisen_proto::store::{self, StoreMessage};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{RwLock, mpsc};

use crate::documents::{DocumentStore, StoreError};

/// Default maximum accepted frame size in bytes (1 MiB).
const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Default maximum number of subscriptions per connection.
const DEFAULT_MAX_SUBSCRIPTIONS: usize = 64;

/// A registered snapshot listener.
#[derive(Debug, Clone)]
struct Subscriber {
    connection_id: u64,
    subscription_id: u64,
    sender: mpsc::UnboundedSender<Message>,
}

/// Shared server state: documents plus subscription registry.
pub struct StoreState {
    /// All stored documents.
    pub documents: DocumentStore,
    /// Actor id -> subscribers of that actor's task collection.
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
    /// Source of connection and subscription ids.
    next_id: AtomicU64,
    /// Maximum accepted frame size in bytes.
    max_frame_size: usize,
    /// Maximum subscriptions a single connection may hold.
    max_subscriptions: usize,
}

impl Default for StoreState {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreState {
    /// Creates an empty state with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DEFAULT_MAX_FRAME_SIZE, DEFAULT_MAX_SUBSCRIPTIONS)
    }

    /// Creates an empty state with custom limits.
    #[must_use]
    pub fn with_config(max_frame_size: usize, max_subscriptions: usize) -> Self {
        Self {
            documents: DocumentStore::new(),
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            max_frame_size,
            max_subscriptions,
        }
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Registers a subscriber, returning its subscription id, or `None` if
    /// the connection already holds the maximum number of subscriptions.
    async fn subscribe(
        &self,
        actor_id: &str,
        connection_id: u64,
        sender: mpsc::UnboundedSender<Message>,
    ) -> Option<u64> {
        let mut subs = self.subscribers.write().await;
        let held = subs
            .values()
            .flatten()
            .filter(|s| s.connection_id == connection_id)
            .count();
        if held >= self.max_subscriptions {
            return None;
        }
        let subscription_id = self.allocate_id();
        subs.entry(actor_id.to_string()).or_default().push(Subscriber {
            connection_id,
            subscription_id,
            sender,
        });
        Some(subscription_id)
    }

    /// Removes one subscription owned by `connection_id`.
    async fn unsubscribe(&self, connection_id: u64, subscription_id: u64) -> bool {
        let mut subs = self.subscribers.write().await;
        let mut removed = false;
        for list in subs.values_mut() {
            let before = list.len();
            list.retain(|s| {
                !(s.connection_id == connection_id && s.subscription_id == subscription_id)
            });
            removed |= list.len() != before;
        }
        removed
    }

    /// Drops every subscription held by a closed connection.
    async fn drop_connection(&self, connection_id: u64) {
        let mut subs = self.subscribers.write().await;
        for list in subs.values_mut() {
            list.retain(|s| s.connection_id != connection_id);
        }
        subs.retain(|_, list| !list.is_empty());
    }

    /// Number of live subscriptions for an actor.
    pub async fn subscriber_count(&self, actor_id: &str) -> usize {
        let subs = self.subscribers.read().await;
        subs.get(actor_id).map_or(0, Vec::len)
    }

    /// Pushes the current task collection of `actor_id` to its subscribers.
    async fn broadcast_snapshot(&self, actor_id: &str) {
        let targets: Vec<Subscriber> = {
            let subs = self.subscribers.read().await;
            subs.get(actor_id).cloned().unwrap_or_default()
        };
        if targets.is_empty() {
            return;
        }
        let tasks = self.documents.tasks(actor_id).await;
        tracing::debug!(
            actor_id = %actor_id,
            subscribers = targets.len(),
            tasks = tasks.len(),
            "pushing task snapshot"
        );
        for target in targets {
            let msg = StoreMessage::Snapshot {
                subscription_id: target.subscription_id,
                tasks: tasks.clone(),
            };
            if let Ok(bytes) = store::encode(&msg) {
                let _ = target.sender.send(Message::Binary(bytes.into()));
            }
        }
    }
}

/// Handles an upgraded WebSocket connection for a single client.
///
/// The connection lifecycle:
/// 1. Wait for a `Hello` naming the actor.
/// 2. Reply `Welcome`.
/// 3. Serve requests until the socket closes.
/// 4. Drop the connection's subscriptions.
pub async fn handle_socket(socket: WebSocket, state: Arc<StoreState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let Some(actor_id) = wait_for_hello(&mut ws_receiver, state.max_frame_size).await else {
        tracing::warn!("connection closed before hello");
        return;
    };
    let connection_id = state.allocate_id();

    let welcome = StoreMessage::Welcome {
        actor_id: actor_id.clone(),
    };
    if let Err(e) = send_store_msg(&mut ws_sender, &welcome).await {
        tracing::error!(actor_id = %actor_id, error = %e, "failed to send Welcome");
        return;
    }
    tracing::info!(actor_id = %actor_id, connection_id, "client connected");

    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();

    let writer_actor = actor_id.clone();
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_sender.send(msg).await.is_err() {
                tracing::warn!(actor_id = %writer_actor, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_actor = actor_id.clone();
    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        let session = Session {
            actor_id: reader_actor,
            connection_id,
            outbound: tx,
        };
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Binary(data) => {
                    handle_binary_message(&session, &data, &reader_state).await;
                }
                Message::Close(_) => {
                    tracing::info!(actor_id = %session.actor_id, "received close frame");
                    break;
                }
                _ => {
                    // Ignore text, ping, pong frames.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.drop_connection(connection_id).await;
    tracing::info!(actor_id = %actor_id, connection_id, "client disconnected");
}

/// Per-connection context for request handling.
struct Session {
    actor_id: String,
    connection_id: u64,
    outbound: mpsc::UnboundedSender<Message>,
}

impl Session {
    fn reply(&self, msg: &StoreMessage) {
        match store::encode(msg) {
            Ok(bytes) => {
                let _ = self.outbound.send(Message::Binary(bytes.into()));
            }
            Err(e) => tracing::error!(error = %e, "failed to encode response"),
        }
    }

    fn reply_error(&self, request_id: Option<u64>, reason: impl Into<String>) {
        self.reply(&StoreMessage::Error {
            request_id,
            reason: reason.into(),
        });
    }

    /// Checks that `path` lies in this connection's actor namespace.
    fn owns(&self, path: &DocPath) -> bool {
        path.actor_id() == self.actor_id
    }
}

/// Waits for the opening `Hello`.
async fn wait_for_hello(
    receiver: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
    max_frame_size: usize,
) -> Option<String> {
    while let Some(Ok(msg)) = receiver.next().await {
        match msg {
            Message::Binary(data) => {
                return match codec::decode_bounded::<StoreMessage>(&data, max_frame_size) {
                    Ok(StoreMessage::Hello { actor_id }) => {
                        if actor_id.is_empty() || actor_id.contains('/') {
                            tracing::warn!(actor_id = %actor_id, "rejected invalid actor id");
                            None
                        } else {
                            Some(actor_id)
                        }
                    }
                    Ok(other) => {
                        tracing::warn!(msg = ?other, "expected Hello, got different message");
                        None
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to decode hello");
                        None
                    }
                };
            }
            Message::Close(_) => return None,
            _ => {}
        }
    }
    None
}

/// Decodes and dispatches one request frame.
async fn handle_binary_message(session: &Session, data: &[u8], state: &Arc<StoreState>) {
    let msg = match codec::decode_bounded::<StoreMessage>(data, state.max_frame_size) {
        Ok(m) => m,
        Err(e) => {
            tracing::warn!(actor_id = %session.actor_id, error = %e, "failed to decode request");
            session.reply_error(None, e.to_string());
            return;
        }
    };

    match msg {
        StoreMessage::Get { request_id, path } => {
            if !session.owns(&path) {
                session.reply_error(Some(request_id), format!("access denied: {path}"));
                return;
            }
            let document = state.documents.get(&path).await;
            session.reply(&StoreMessage::Found {
                request_id,
                document,
            });
        }
        StoreMessage::Set {
            request_id,
            path,
            document,
        } => {
            if !session.owns(&path) {
                session.reply_error(Some(request_id), format!("access denied: {path}"));
                return;
            }
            let result = state.documents.set(path, document).await.map(Some);
            finish_write(session, state, request_id, result).await;
        }
        StoreMessage::Delete { request_id, path } => {
            if !session.owns(&path) {
                session.reply_error(Some(request_id), format!("access denied: {path}"));
                return;
            }
            let result = state.documents.delete(path).await.map(Some);
            finish_write(session, state, request_id, result).await;
        }
        StoreMessage::Commit { request_id, batch } => {
            if let Some(op) = batch.ops.iter().find(|op| !session.owns(op.path())) {
                session.reply_error(
                    Some(request_id),
                    format!("access denied: {}", op.path()),
                );
                return;
            }
            tracing::debug!(
                actor_id = %session.actor_id,
                ops = batch.len(),
                "committing batch"
            );
            let result = state.documents.commit(batch).await;
            finish_write(session, state, request_id, result).await;
        }
        StoreMessage::Subscribe { request_id, path } => {
            if !session.owns(&path) {
                session.reply_error(Some(request_id), format!("access denied: {path}"));
                return;
            }
            if path.collection() != Collection::Tasks || !path.is_collection() {
                session.reply_error(
                    Some(request_id),
                    format!("only task collections can be watched: {path}"),
                );
                return;
            }
            let Some(subscription_id) = state
                .subscribe(
                    &session.actor_id,
                    session.connection_id,
                    session.outbound.clone(),
                )
                .await
            else {
                session.reply_error(Some(request_id), "too many subscriptions");
                return;
            };
            tracing::info!(
                actor_id = %session.actor_id,
                subscription_id,
                "subscription registered"
            );
            session.reply(&StoreMessage::Subscribed {
                request_id,
                subscription_id,
            });
            // Initial state goes out right after the confirmation.
            let tasks = state.documents.tasks(&session.actor_id).await;
            session.reply(&StoreMessage::Snapshot {
                subscription_id,
                tasks,
            });
        }
        StoreMessage::Unsubscribe { subscription_id } => {
            let removed = state
                .unsubscribe(session.connection_id, subscription_id)
                .await;
            tracing::info!(
                actor_id = %session.actor_id,
                subscription_id,
                removed,
                "subscription removed"
            );
        }
        other => {
            tracing::warn!(
                actor_id = %session.actor_id,
                msg = ?other,
                "unexpected message type from client"
            );
            session.reply_error(None, "unexpected message type");
        }
    }
}

/// Acknowledges a write and fans out a snapshot if tasks changed.
async fn finish_write(
    session: &Session,
    state: &Arc<StoreState>,
    request_id: u64,
    result: Result<Option<WriteOutcome>, StoreError>,
) {
    match result {
        Ok(outcome) => {
            session.reply(&StoreMessage::Ack { request_id });
            if let Some(outcome) = outcome
                && outcome.tasks_changed
            {
                state.broadcast_snapshot(&outcome.actor_id).await;
            }
        }
        Err(e) => {
            tracing::warn!(actor_id = %session.actor_id, error = %e, "write rejected");
            session.reply_error(Some(request_id), e.to_string());
        }
    }
}

/// Encodes and sends a message directly on a WebSocket sender.
async fn send_store_msg(
    ws_sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    msg: &StoreMessage,
) -> Result<(), String> {
    let bytes = store::encode(msg).map_err(|e| e.to_string())?;
    ws_sender
        .send(Message::Binary(bytes.into()))
        .await
        .map_err(|e| format!("WebSocket send error: {e}"))
}

/// Starts the store server on the given address and returns the bound
/// address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(StoreState::new())).await
}

/// Starts the store server with a pre-configured [`StoreState`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<StoreState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "store server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<StoreState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}
