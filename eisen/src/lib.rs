//! Eisen: an urgency/importance task matrix with optimistic sync.
//!
//! Tasks are classified into the four quadrants of the matrix (or the
//! backlog) by [`matrix::classify`]. Every mutation goes through a
//! [`sync::SyncCoordinator`], which applies it to an [`overlay::OverlayStore`]
//! at once and persists it, together with its [`history`] entry, through a
//! [`backend::PersistenceBackend`] in the background.

pub mod backend;
pub mod clock;
pub mod config;
pub mod history;
pub mod identity;
pub mod matrix;
pub mod overlay;
pub mod sync;
