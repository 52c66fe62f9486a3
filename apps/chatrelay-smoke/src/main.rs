//! Wires the session manager to an in-process loopback transport and runs
//! the full connect → pair → message flow without a network.

mod logging;

use std::{
    env,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use chatrelay_core::{
    ClientConfig, PairingEvent, RawMessage, ResponsePolicy, TransportError, TransportEvent,
};
use chatrelay_session::{InMemorySyncStore, SessionManager, SyncStore, Transport};
use tokio::sync::{broadcast, mpsc};
use tracing::info;

const LOCAL_ID: &str = "999@s.net";

/// In-process transport that pairs instantly and echoes sent messages back
/// as inbound traffic.
struct LoopbackTransport {
    logged_in: Arc<AtomicBool>,
    events: broadcast::Sender<TransportEvent>,
}

impl LoopbackTransport {
    fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            logged_in: Arc::new(AtomicBool::new(false)),
            events,
        })
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        let _ = self.events.send(TransportEvent::Connected);
        Ok(())
    }

    async fn disconnect(&self) {
        let _ = self.events.send(TransportEvent::Disconnected);
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.logged_in.store(false, Ordering::SeqCst);
        let _ = self.events.send(TransportEvent::LoggedOut);
        Ok(())
    }

    fn is_logged_in(&self) -> bool {
        self.logged_in.load(Ordering::SeqCst)
    }

    fn local_id(&self) -> Option<String> {
        Some(LOCAL_ID.to_owned())
    }

    async fn start_pairing(&self) -> Result<mpsc::Receiver<PairingEvent>, TransportError> {
        let (tx, rx) = mpsc::channel(4);
        let logged_in = Arc::clone(&self.logged_in);
        tokio::spawn(async move {
            let _ = tx.send(PairingEvent::Code("CHAT-RELAY-1946".to_owned())).await;
            tokio::time::sleep(Duration::from_millis(200)).await;
            logged_in.store(true, Ordering::SeqCst);
            let _ = tx.send(PairingEvent::Paired).await;
        });
        Ok(rx)
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), TransportError> {
        let _ = self.events.send(TransportEvent::Message(RawMessage::Text {
            chat_id: chat_id.to_owned(),
            sender_id: chat_id.to_owned(),
            sender_name: "Loopback".to_owned(),
            text: format!("echo: {text}"),
        }));
        Ok(())
    }

    fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.events.subscribe()
    }
}

#[tokio::main]
async fn main() {
    logging::init();

    let db_path =
        env::var("CHATRELAY_DB_PATH").unwrap_or_else(|_| "./.chatrelay-smoke.db".to_owned());
    let config = ClientConfig::new(db_path);

    let transport = LoopbackTransport::new();
    let sync_store: Arc<dyn SyncStore> = Arc::new(InMemorySyncStore::new(ResponsePolicy {
        respond_to_groups: true,
        only_if_mentioned: false,
    }));

    let manager = match SessionManager::new(config, transport, Some(sync_store)) {
        Ok(manager) => manager,
        Err(err) => {
            eprintln!("failed to build session manager: {err}");
            std::process::exit(1);
        }
    };

    manager.set_on_pairing_code(|code| println!("pairing code: {code}"));
    manager.set_on_state_change(|state, err| match err {
        Some(err) => println!("state: {state} ({err})"),
        None => println!("state: {state}"),
    });
    manager.set_on_message(|chat_id, sender_name, text| {
        println!("message from {sender_name} in {chat_id}: {text}");
    });

    if let Err(err) = manager.refresh_response_policy().await {
        eprintln!("failed to read response policy: {err}");
        std::process::exit(1);
    }

    if let Err(err) = manager.login().await {
        eprintln!("login failed: {err}");
        std::process::exit(1);
    }
    info!("logged in, sending loopback message");

    if let Err(err) = manager.send_message("555@s.net", "hello").await {
        eprintln!("send failed: {err}");
        std::process::exit(1);
    }

    // Give the echo a moment to route back through the dispatcher.
    tokio::time::sleep(Duration::from_millis(300)).await;
    manager.close().await;
}
