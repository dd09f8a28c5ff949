//! Wire protocol between document-store clients and the store server.
//!
//! [`StoreMessage`] values are postcard-encoded and sent as WebSocket binary
//! frames. A connection starts with `Hello`/`Welcome`, which binds it to one
//! actor namespace. Requests carry a client-chosen `request_id` that the
//! server echoes in its response; `Snapshot` frames are pushed unprompted to
//! subscribers whenever a watched task collection changes.

use serde::{Deserialize, Serialize};

use crate::codec::{self, CodecError};
use crate::doc::{DocPath, Document, WriteBatch};
use crate::task::Task;

/// Messages exchanged between store clients and the store server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreMessage {
    /// Client binds the connection to an actor namespace.
    ///
    /// Must be the first message sent after the WebSocket opens.
    Hello {
        /// Actor whose documents this connection may touch.
        actor_id: String,
    },
    /// Server accepts the `Hello`.
    Welcome {
        /// Echo of the bound actor.
        actor_id: String,
    },
    /// Read a document or collection.
    Get {
        /// Correlation id.
        request_id: u64,
        /// What to read.
        path: DocPath,
    },
    /// Write a single document.
    Set {
        /// Correlation id.
        request_id: u64,
        /// Where to write.
        path: DocPath,
        /// New value.
        document: Document,
    },
    /// Remove a single document.
    Delete {
        /// Correlation id.
        request_id: u64,
        /// What to remove.
        path: DocPath,
    },
    /// Apply a batch atomically.
    Commit {
        /// Correlation id.
        request_id: u64,
        /// Ops to apply.
        batch: WriteBatch,
    },
    /// Start receiving snapshots of a task collection.
    Subscribe {
        /// Correlation id.
        request_id: u64,
        /// Collection to watch.
        path: DocPath,
    },
    /// Stop a subscription.
    Unsubscribe {
        /// Id returned in `Subscribed`.
        subscription_id: u64,
    },
    /// A write or unsubscribe succeeded.
    Ack {
        /// Correlation id.
        request_id: u64,
    },
    /// Result of a `Get`.
    Found {
        /// Correlation id.
        request_id: u64,
        /// The document, or `None` if absent.
        document: Option<Document>,
    },
    /// A subscription was registered.
    Subscribed {
        /// Correlation id.
        request_id: u64,
        /// Handle for pushes and `Unsubscribe`.
        subscription_id: u64,
    },
    /// Pushed full ordered state of a watched collection.
    Snapshot {
        /// Subscription this snapshot belongs to.
        subscription_id: u64,
        /// Tasks in collection order.
        tasks: Vec<Task>,
    },
    /// Server reports an error condition.
    Error {
        /// Correlation id of the failed request, if any.
        request_id: Option<u64>,
        /// Human-readable error description.
        reason: String,
    },
}

impl StoreMessage {
    /// Correlation id of a response, if this message is one.
    #[must_use]
    pub const fn response_id(&self) -> Option<u64> {
        match self {
            Self::Ack { request_id }
            | Self::Found { request_id, .. }
            | Self::Subscribed { request_id, .. } => Some(*request_id),
            Self::Error { request_id, .. } => *request_id,
            _ => None,
        }
    }
}

/// Encodes a [`StoreMessage`] into bytes.
///
/// # Errors
///
/// Returns [`CodecError`] if serialization fails.
pub fn encode(msg: &StoreMessage) -> Result<Vec<u8>, CodecError> {
    codec::encode(msg)
}

/// Decodes a [`StoreMessage`] from bytes.
///
/// # Errors
///
/// Returns [`CodecError`] if deserialization fails.
pub fn decode(bytes: &[u8]) -> Result<StoreMessage, CodecError> {
    codec::decode(bytes)
}
