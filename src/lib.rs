//! Offline-first sync engine for the pantry grocery manager.
//!
//! Mutations made while disconnected are queued durably and replayed in order
//! once the server is reachable again; reads fall back to a compressed local
//! snapshot when the live request fails. [`SyncEngine`] wires the pieces
//! together.

pub mod cache;
pub mod compress;
pub mod config;
pub mod engine;
pub mod logging;
pub mod store;
pub mod sync;

pub use engine::SyncEngine;
