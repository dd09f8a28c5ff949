//! Shared record formats and document-store wire protocol for Eisen.

pub mod codec;
pub mod doc;
pub mod docset;
pub mod history;
pub mod store;
pub mod task;
