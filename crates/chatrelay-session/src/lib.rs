//! Session connection manager for a long-lived authenticated messaging
//! client.
//!
//! Owns the connect/pair/logout lifecycle, keeps the session alive across
//! network interruptions with bounded exponential backoff, and routes
//! inbound messages through the group-response policy before handing them
//! to the registered callbacks.

/// Event dispatcher and message router.
pub mod dispatcher;
/// Session manager lifecycle operations.
pub mod manager;
/// Reconnect scheduling on top of the backoff policy.
pub mod reconnect;
/// Sync-store collaborator contract.
pub mod sync_store;
/// Transport collaborator contract.
pub mod transport;

pub use dispatcher::EventDispatcher;
pub use manager::SessionManager;
pub use reconnect::ReconnectEngine;
pub use sync_store::{ContactRecord, InMemorySyncStore, SyncStore, SyncStoreError};
pub use transport::Transport;
