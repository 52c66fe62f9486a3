use async_trait::async_trait;
use chatrelay_core::{PairingEvent, TransportError, TransportEvent};
use tokio::sync::{broadcast, mpsc};

/// Opaque transport session to the messaging backend.
///
/// The session manager, reconnect engine, and dispatcher only ever talk to
/// this trait, so they can run against an in-memory transport in tests.
/// Wire-level concerns (encryption, media, group membership) live behind
/// the implementation.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the transport connection. Bounded by the transport's own
    /// timeout.
    async fn connect(&self) -> Result<(), TransportError>;

    /// Tear down the transport connection.
    async fn disconnect(&self);

    /// Log the session out remotely and invalidate stored credentials.
    async fn logout(&self) -> Result<(), TransportError>;

    /// Whether the stored device credentials are currently valid.
    fn is_logged_in(&self) -> bool;

    /// Normalized identifier of the local account, once known.
    fn local_id(&self) -> Option<String>;

    /// Open the pairing-code channel for a device-pairing handshake.
    async fn start_pairing(&self) -> Result<mpsc::Receiver<PairingEvent>, TransportError>;

    /// Send a text message to a conversation.
    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), TransportError>;

    /// Subscribe to the lifecycle/message event stream.
    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent>;
}
