use std::{collections::BTreeSet, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::ClientError;

/// Suffix carried by group conversation JIDs on the messaging backend.
const GROUP_JID_SUFFIX: &str = "@g.us";

/// Connection lifecycle state reported through the state-change callback.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    /// No transport connection is open.
    Disconnected,
    /// A connect attempt is in flight.
    Connecting,
    /// Transport connection is open but the device is not paired/logged in.
    Connected,
    /// Session is authenticated and ready to send/receive messages.
    LoggedIn,
    /// A pairing code has been issued and is waiting to be scanned.
    QrPending,
    /// The last connect attempt failed.
    Error,
}

impl ConnectionState {
    /// Stable state name delivered to the state-change callback.
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "Disconnected",
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::LoggedIn => "LoggedIn",
            ConnectionState::QrPending => "QRPending",
            ConnectionState::Error => "Error",
        }
    }
}

/// Immutable-after-construction client configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Locator for the transport's session/device credential store.
    pub db_path: PathBuf,
    /// Log filter directive forwarded to the embedder's tracing setup.
    pub log_filter: String,
    /// First backoff delay of a reconnect episode.
    pub initial_reconnect_interval: Duration,
    /// Wall-clock budget per failure episode. Zero means unbounded.
    pub max_reconnect_time: Duration,
    /// Attempt budget per failure episode. Zero means unbounded.
    pub max_reconnect_attempts: u32,
    /// Whether unsolicited disconnects trigger automatic reconnection.
    pub auto_reconnect: bool,
}

impl ClientConfig {
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            ..Self::default()
        }
    }

    /// Reject configurations the reconnect engine cannot operate with.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.initial_reconnect_interval.is_zero() {
            return Err(ClientError::InvalidConfig(
                "initial_reconnect_interval must be greater than zero".to_owned(),
            ));
        }
        Ok(())
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("./chatrelay-session.db"),
            log_filter: "info".to_owned(),
            initial_reconnect_interval: Duration::from_secs(2),
            max_reconnect_time: Duration::ZERO,
            max_reconnect_attempts: 0,
            auto_reconnect: true,
        }
    }
}

/// Group-response policy flags supplied by the sync store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ResponsePolicy {
    /// Whether group messages are routed to the message callback at all.
    pub respond_to_groups: bool,
    /// When set, a group message passes only if the local account is mentioned.
    pub only_if_mentioned: bool,
}

/// Raw message shapes accepted from the transport before normalization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum RawMessage {
    /// Plain text message body.
    Text {
        /// Conversation JID.
        chat_id: String,
        /// Sender JID.
        sender_id: String,
        /// Sender push/display name.
        sender_name: String,
        /// Message body.
        text: String,
    },
    /// Extended text body carrying an explicit mention list.
    ExtendedText {
        /// Conversation JID.
        chat_id: String,
        /// Sender JID.
        sender_id: String,
        /// Sender push/display name.
        sender_name: String,
        /// Message body.
        text: String,
        /// JIDs explicitly mentioned in the body.
        mentioned_ids: Vec<String>,
    },
    /// Any other message kind (media and friends). Dropped by the router.
    Unsupported {
        /// Transport-level kind label, used for trace logging only.
        kind: String,
    },
}

/// Normalized view of an inbound transport message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboundMessage {
    /// Conversation JID.
    pub chat_id: String,
    /// Sender JID.
    pub sender_id: String,
    /// Sender push/display name.
    pub sender_name: String,
    /// Message body.
    pub text: String,
    /// Whether the conversation is a group.
    pub is_group: bool,
    /// JIDs explicitly mentioned in the body.
    pub mentioned_ids: BTreeSet<String>,
}

/// Lifecycle and message events emitted by the transport.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum TransportEvent {
    /// Transport connection established.
    Connected,
    /// Transport connection dropped.
    Disconnected,
    /// Session was logged out remotely.
    LoggedOut,
    /// Inbound message payload.
    Message(RawMessage),
}

/// Events carried on the pairing-code channel during `login`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PairingEvent {
    /// A fresh pairing code to present to the second device.
    Code(String),
    /// The device was paired; the session is now logged in.
    Paired,
    /// The pairing window expired without a scan.
    Timeout,
}

/// Whether a conversation JID addresses a group.
pub fn is_group_jid(chat_id: &str) -> bool {
    chat_id.ends_with(GROUP_JID_SUFFIX)
}

/// Phone fragment of a JID (the part before `@`), used for contact sync.
pub fn phone_fragment(jid: &str) -> &str {
    jid.split('@').next().unwrap_or(jid)
}
