//! Core session contract shared between the chatrelay runtime and embedders.
//!
//! This crate defines the connection lifecycle model, the reconnect backoff
//! policy, message/event types exchanged with the transport, and the
//! callback registry consumed by GUI/CLI layers.

/// Exponential backoff policy and per-episode reconnect bookkeeping.
pub mod backoff;
/// Last-write-wins callback slots for pairing, state, and message delivery.
pub mod callbacks;
/// Stable client error taxonomy.
pub mod error;
/// Connection lifecycle state machine.
pub mod state;
/// Configuration, policy, and message types.
pub mod types;

pub use backoff::{ReconnectEpisode, ReconnectPolicy, MAX_RECONNECT_INTERVAL};
pub use callbacks::{CallbackRegistry, MessageCallback, PairingCodeCallback, StateChangeCallback};
pub use error::{ClientError, TransportError};
pub use state::SessionStateMachine;
pub use types::{
    is_group_jid, phone_fragment, ClientConfig, ConnectionState, InboundMessage, PairingEvent,
    RawMessage, ResponsePolicy, TransportEvent,
};
