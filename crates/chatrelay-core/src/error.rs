use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ConnectionState;

/// Error surfaced by a concrete transport implementation.
///
/// Carried as a plain message so transport errors stay serializable across
/// the event boundary; the session layer wraps it with operation context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Stable client error taxonomy returned from session operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The transport has not been constructed or was detached by `close`.
    #[error("client not initialized")]
    ClientNotInitialized,
    /// The operation requires a logged-in session.
    #[error("not logged in")]
    NotLoggedIn,
    /// `connect` was called while a connection is already established.
    #[error("already connected")]
    AlreadyConnected,
    /// A sync-store-backed operation was called without a sync store.
    #[error("sync store not set")]
    SyncStoreNotSet,
    /// Transport failure wrapped with the operation that triggered it.
    #[error("{op} failed: {message}")]
    Transport {
        /// Operation context, for example `connect` or `logout`.
        op: String,
        /// Underlying transport failure message.
        message: String,
    },
    /// A lifecycle event arrived in a state that does not define it.
    #[error("invalid transition: cannot {action} while {state:?}")]
    InvalidTransition {
        /// State the session was in when the event arrived.
        state: ConnectionState,
        /// Attempted lifecycle action.
        action: String,
    },
    /// Configuration rejected at construction time.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl ClientError {
    /// Wrap a transport failure with operation context.
    pub fn transport(op: impl Into<String>, cause: impl fmt::Display) -> Self {
        Self::Transport {
            op: op.into(),
            message: cause.to_string(),
        }
    }

    /// Build a standard invalid-transition error.
    pub fn invalid_transition(state: ConnectionState, action: impl Into<String>) -> Self {
        Self::InvalidTransition {
            state,
            action: action.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wraps_transport_cause_with_operation_context() {
        let err = ClientError::transport("connect", TransportError::new("socket refused"));
        assert_eq!(err.to_string(), "connect failed: socket refused");
    }

    #[test]
    fn formats_invalid_transition_with_state() {
        let err = ClientError::invalid_transition(ConnectionState::Disconnected, "pair");
        assert_eq!(
            err.to_string(),
            "invalid transition: cannot pair while Disconnected"
        );
    }
}
