//! Eisen document store server library.
//!
//! Exposes the store server for use in tests and embedding. Clients bind a
//! WebSocket connection to an actor namespace, read and write task and
//! history documents, and subscribe to task collection snapshots.

pub mod config;
pub mod documents;
pub mod server;
