use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex as StdMutex, MutexGuard, RwLock as StdRwLock,
    },
    time::Instant,
};

use chatrelay_core::{
    CallbackRegistry, ClientConfig, ClientError, ConnectionState, PairingEvent, ReconnectPolicy,
    ResponsePolicy, SessionStateMachine, TransportEvent,
};
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    dispatcher::EventDispatcher, reconnect::ReconnectEngine, sync_store::SyncStore,
    transport::Transport,
};

/// Owns the connection lifecycle of one transport session.
///
/// Created once per process session. Lifecycle operations and the
/// [`ConnectionState`] are guarded by the connection lock; the reconnect
/// engine keeps its episode state under its own lock, and neither lock is
/// ever held across a call into the other component.
pub struct SessionManager {
    config: ClientConfig,
    /// `None` once `close` has detached from the transport.
    transport: StdRwLock<Option<Arc<dyn Transport>>>,
    callbacks: Arc<CallbackRegistry>,
    dispatcher: Arc<EventDispatcher>,
    state: StdMutex<SessionStateMachine>,
    /// Serializes each transition with its callback notification so
    /// observers see transitions in the exact order they occur.
    notify_lock: StdMutex<()>,
    /// Serializes physical connect attempts: single-flight `connect`.
    connect_lock: AsyncMutex<()>,
    reconnect: ReconnectEngine,
    shutdown: CancellationToken,
    closed: AtomicBool,
}

impl SessionManager {
    /// Build the manager and start consuming the transport event stream.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        sync_store: Option<Arc<dyn SyncStore>>,
    ) -> Result<Arc<Self>, ClientError> {
        config.validate()?;

        let callbacks = Arc::new(CallbackRegistry::new());
        let dispatcher = Arc::new(EventDispatcher::new(sync_store, Arc::clone(&callbacks)));
        let policy = ReconnectPolicy::new(
            config.initial_reconnect_interval,
            config.max_reconnect_attempts,
            config.max_reconnect_time,
        );
        let events = transport.subscribe_events();

        let manager = Arc::new(Self {
            config,
            transport: StdRwLock::new(Some(transport)),
            callbacks,
            dispatcher,
            state: StdMutex::new(SessionStateMachine::default()),
            notify_lock: StdMutex::new(()),
            connect_lock: AsyncMutex::new(()),
            reconnect: ReconnectEngine::new(policy),
            shutdown: CancellationToken::new(),
            closed: AtomicBool::new(false),
        });
        Arc::clone(&manager).spawn_event_pump(events);
        Ok(manager)
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        self.lock_state().state()
    }

    pub fn is_logged_in(&self) -> bool {
        self.state() == ConnectionState::LoggedIn
    }

    /// Whether the current reconnect episode hit its give-up condition.
    pub fn reconnect_gave_up(&self) -> bool {
        self.reconnect.gave_up()
    }

    /// Callback registry shared with the dispatcher. Slots may be replaced
    /// at any time; the last write wins.
    pub fn callbacks(&self) -> &Arc<CallbackRegistry> {
        &self.callbacks
    }

    pub fn set_on_pairing_code<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.callbacks.set_on_pairing_code(callback);
    }

    pub fn set_on_state_change<F>(&self, callback: F)
    where
        F: Fn(&str, Option<&ClientError>) + Send + Sync + 'static,
    {
        self.callbacks.set_on_state_change(callback);
    }

    pub fn set_on_message<F>(&self, callback: F)
    where
        F: Fn(&str, &str, &str) + Send + Sync + 'static,
    {
        self.callbacks.set_on_message(callback);
    }

    /// Inject an explicit response policy into the dispatcher.
    pub fn set_response_policy(&self, policy: ResponsePolicy) {
        self.dispatcher.set_policy(policy);
    }

    /// Re-read the response policy from the sync store.
    pub async fn refresh_response_policy(&self) -> Result<ResponsePolicy, ClientError> {
        self.dispatcher.refresh_policy().await
    }

    /// Establish the transport connection.
    ///
    /// Fails with [`ClientError::AlreadyConnected`] without side effect
    /// when a connection is already up. Concurrent calls are serialized by
    /// the connect lock, so only one physical attempt is ever in flight.
    pub async fn connect(&self) -> Result<(), ClientError> {
        let transport = self.require_transport()?;
        let _guard = self.connect_lock.lock().await;
        if self.closed.load(Ordering::SeqCst) {
            return Err(ClientError::ClientNotInitialized);
        }

        self.transition(None, |sm| sm.begin_connect().map(Some))?;
        info!("connecting to transport");

        match transport.connect().await {
            Ok(()) => {
                let logged_in = transport.is_logged_in();
                if let Some(id) = transport.local_id() {
                    self.dispatcher.set_local_id(id);
                }
                self.reconnect.on_connected();
                self.transition(None, |sm| sm.connect_succeeded(logged_in).map(Some))?;
                Ok(())
            }
            Err(cause) => {
                let err = ClientError::transport("connect", cause);
                let _ = self.transition(Some(&err), |sm| Ok(Some(sm.connect_failed())));
                Err(err)
            }
        }
    }

    /// Drive the device-pairing handshake until the session is logged in.
    ///
    /// Connects first when necessary, then consumes the pairing-code
    /// channel, forwarding each code to the pairing callback. Blocks the
    /// caller until pairing succeeds or the channel reaches a terminal
    /// event.
    pub async fn login(&self) -> Result<(), ClientError> {
        let transport = self.require_transport()?;

        if !self.has_connection() {
            match self.connect().await {
                Ok(()) | Err(ClientError::AlreadyConnected) => {}
                Err(err) => return Err(err),
            }
        }
        if self.state() == ConnectionState::LoggedIn {
            return Ok(());
        }
        if transport.is_logged_in() {
            self.transition(None, |sm| sm.paired().map(Some))?;
            return Ok(());
        }

        let mut pairing = transport
            .start_pairing()
            .await
            .map_err(|err| ClientError::transport("start pairing", err))?;

        loop {
            match pairing.recv().await {
                Some(PairingEvent::Code(code)) => {
                    self.transition(None, |sm| sm.pairing_code())?;
                    debug!("pairing code issued");
                    self.callbacks.emit_pairing_code(&code);
                }
                Some(PairingEvent::Paired) => {
                    if let Some(id) = transport.local_id() {
                        self.dispatcher.set_local_id(id);
                    }
                    info!("device paired, session logged in");
                    self.transition(None, |sm| sm.paired().map(Some))?;
                    return Ok(());
                }
                Some(PairingEvent::Timeout) => {
                    return Err(self.fail_pairing("pairing window timed out"));
                }
                None => {
                    return Err(self.fail_pairing("pairing channel closed"));
                }
            }
        }
    }

    /// Log the session out. Requires `LoggedIn`.
    pub async fn logout(&self) -> Result<(), ClientError> {
        let transport = self.require_transport()?;
        let _guard = self.connect_lock.lock().await;

        if self.lock_state().state() != ConnectionState::LoggedIn {
            return Err(ClientError::NotLoggedIn);
        }
        transport
            .logout()
            .await
            .map_err(|err| ClientError::transport("logout", err))?;

        self.transition(None, |sm| sm.logged_out().map(Some))?;
        Ok(())
    }

    /// Send a text message. Requires `LoggedIn`.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<(), ClientError> {
        let transport = self.require_transport()?;
        if self.state() != ConnectionState::LoggedIn {
            return Err(ClientError::NotLoggedIn);
        }
        transport
            .send_message(chat_id, text)
            .await
            .map_err(|err| ClientError::transport("send message", err))
    }

    /// Shut the session down. Idempotent.
    ///
    /// Cancels any pending reconnect timer before the state flips so a
    /// fired timer can never resurrect the connection, stops the event
    /// pump, forces `Disconnected`, notifies the state callback exactly
    /// once, and detaches from the transport.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.reconnect.cancel();
        self.shutdown.cancel();

        let transport = self
            .transport
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .take();

        let _guard = self.connect_lock.lock().await;
        let _ = self.transition(None, |sm| Ok(Some(sm.close())));

        if let Some(transport) = transport {
            transport.disconnect().await;
        }
        info!("session closed");
    }

    fn spawn_event_pump(self: Arc<Self>, mut events: broadcast::Receiver<TransportEvent>) {
        let shutdown = self.shutdown.clone();
        let weak = Arc::downgrade(&self);
        drop(self);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    event = events.recv() => match event {
                        Ok(event) => {
                            let Some(manager) = weak.upgrade() else { break };
                            manager.handle_transport_event(event).await;
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "transport event stream lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            debug!("event pump stopped");
        });
    }

    async fn handle_transport_event(self: Arc<Self>, event: TransportEvent) {
        match event {
            TransportEvent::Connected => {
                self.reconnect.on_connected();
                let _ = self.transition(None, |sm| Ok(sm.remote_connected()));
            }
            TransportEvent::Disconnected | TransportEvent::LoggedOut => {
                let dropped = self.transition(None, |sm| Ok(sm.remote_disconnected()));
                if matches!(dropped, Ok(Some(_))) {
                    warn!("transport connection lost");
                    if self.config.auto_reconnect && !self.closed.load(Ordering::SeqCst) {
                        self.schedule_reconnect();
                    }
                }
            }
            TransportEvent::Message(raw) => self.dispatcher.dispatch(raw).await,
        }
    }

    /// Arm a one-shot timer for the next reconnect attempt, or give up when
    /// the episode budget is exhausted. Failed attempts reschedule
    /// themselves; individual retry failures are logged and never surfaced
    /// to the caller.
    fn schedule_reconnect(self: Arc<Self>) {
        let Some((delay, token)) = self.reconnect.next_attempt(Instant::now()) else {
            warn!("reconnect budget exhausted, giving up until the next successful connection");
            return;
        };
        info!(delay_ms = delay.as_millis() as u64, "scheduling reconnect attempt");

        let weak = Arc::downgrade(&self);
        drop(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    let Some(manager) = weak.upgrade() else { return };
                    if manager.closed.load(Ordering::SeqCst) {
                        return;
                    }
                    match manager.connect().await {
                        Ok(()) | Err(ClientError::AlreadyConnected) => {}
                        Err(err) => {
                            warn!(%err, "reconnect attempt failed");
                            manager.schedule_reconnect();
                        }
                    }
                }
            }
        });
    }

    fn fail_pairing(&self, reason: &str) -> ClientError {
        let err = ClientError::transport("pairing", reason);
        let _ = self.transition(Some(&err), |sm| Ok(sm.pairing_failed()));
        err
    }

    fn has_connection(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connected | ConnectionState::LoggedIn | ConnectionState::QrPending
        )
    }

    /// Apply one state-machine event and notify the state callback.
    ///
    /// The notification lock is held across both steps so observers see
    /// transitions in the exact order they occur. The state lock itself is
    /// released before the callback runs, so callbacks may read `state()`.
    fn transition(
        &self,
        err: Option<&ClientError>,
        apply: impl FnOnce(&mut SessionStateMachine) -> Result<Option<ConnectionState>, ClientError>,
    ) -> Result<Option<ConnectionState>, ClientError> {
        let _order = self.notify_lock.lock().unwrap_or_else(|e| e.into_inner());
        let outcome = {
            let mut state = self.lock_state();
            apply(&mut *state)
        };
        if let Ok(Some(state)) = &outcome {
            debug!(state = state.as_str(), "state changed");
            self.callbacks.emit_state_change(*state, err);
        }
        outcome
    }

    fn require_transport(&self) -> Result<Arc<dyn Transport>, ClientError> {
        self.transport
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
            .ok_or(ClientError::ClientNotInitialized)
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionStateMachine> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::{
            atomic::{AtomicBool, AtomicUsize, Ordering},
            Mutex,
        },
        time::Duration,
    };

    use async_trait::async_trait;
    use chatrelay_core::TransportError;
    use tokio::sync::mpsc;

    use super::*;

    struct MockTransport {
        connect_calls: AtomicUsize,
        failing_connects: AtomicUsize,
        logged_in: AtomicBool,
        pairing_script: Mutex<Vec<PairingEvent>>,
        events: broadcast::Sender<TransportEvent>,
    }

    impl MockTransport {
        fn new() -> Arc<Self> {
            let (events, _) = broadcast::channel(64);
            Arc::new(Self {
                connect_calls: AtomicUsize::new(0),
                failing_connects: AtomicUsize::new(0),
                logged_in: AtomicBool::new(false),
                pairing_script: Mutex::new(Vec::new()),
                events,
            })
        }

        fn connect_calls(&self) -> usize {
            self.connect_calls.load(Ordering::SeqCst)
        }

        fn fail_next_connects(&self, count: usize) {
            self.failing_connects.store(count, Ordering::SeqCst);
        }

        fn set_logged_in(&self, logged_in: bool) {
            self.logged_in.store(logged_in, Ordering::SeqCst);
        }

        fn script_pairing(&self, script: Vec<PairingEvent>) {
            *self.pairing_script.lock().unwrap() = script;
        }

        fn emit(&self, event: TransportEvent) {
            let _ = self.events.send(event);
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn connect(&self) -> Result<(), TransportError> {
            self.connect_calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failing_connects.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failing_connects.store(remaining - 1, Ordering::SeqCst);
                return Err(TransportError::new("socket refused"));
            }
            Ok(())
        }

        async fn disconnect(&self) {}

        async fn logout(&self) -> Result<(), TransportError> {
            self.logged_in.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn is_logged_in(&self) -> bool {
            self.logged_in.load(Ordering::SeqCst)
        }

        fn local_id(&self) -> Option<String> {
            Some("999@s.net".to_owned())
        }

        async fn start_pairing(&self) -> Result<mpsc::Receiver<PairingEvent>, TransportError> {
            let script = std::mem::take(&mut *self.pairing_script.lock().unwrap());
            let (tx, rx) = mpsc::channel(script.len().max(1));
            for event in script {
                if matches!(event, PairingEvent::Paired) {
                    self.logged_in.store(true, Ordering::SeqCst);
                }
                tx.send(event).await.expect("scripted channel has capacity");
            }
            Ok(rx)
        }

        async fn send_message(&self, _chat_id: &str, _text: &str) -> Result<(), TransportError> {
            if !self.is_logged_in() {
                return Err(TransportError::new("not logged in"));
            }
            Ok(())
        }

        fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
            self.events.subscribe()
        }
    }

    fn test_config() -> ClientConfig {
        ClientConfig {
            initial_reconnect_interval: Duration::from_secs(2),
            ..ClientConfig::default()
        }
    }

    fn manager_with(
        transport: &Arc<MockTransport>,
        config: ClientConfig,
    ) -> (Arc<SessionManager>, Arc<Mutex<Vec<String>>>) {
        let manager = SessionManager::new(
            config,
            Arc::clone(transport) as Arc<dyn Transport>,
            None,
        )
        .expect("config is valid");

        let states = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&states);
        manager.set_on_state_change(move |state, _err| {
            sink.lock().unwrap().push(state.to_owned());
        });
        (manager, states)
    }

    async fn wait_for_connect_calls(transport: &Arc<MockTransport>, count: usize) {
        tokio::time::timeout(Duration::from_secs(3600), async {
            while transport.connect_calls() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("expected connect attempts never happened");
    }

    #[tokio::test]
    async fn connect_reports_transitions_in_order() {
        let transport = MockTransport::new();
        let (manager, states) = manager_with(&transport, test_config());

        manager.connect().await.expect("connect should work");
        assert_eq!(manager.state(), ConnectionState::Connected);
        assert_eq!(*states.lock().unwrap(), vec!["Connecting", "Connected"]);
    }

    #[tokio::test]
    async fn second_connect_is_rejected_without_a_second_attempt() {
        let transport = MockTransport::new();
        let (manager, _states) = manager_with(&transport, test_config());

        manager.connect().await.expect("connect should work");
        assert_eq!(
            manager.connect().await,
            Err(ClientError::AlreadyConnected)
        );
        assert_eq!(transport.connect_calls(), 1);
    }

    #[tokio::test]
    async fn concurrent_connects_are_single_flight() {
        let transport = MockTransport::new();
        let (manager, _states) = manager_with(&transport, test_config());

        let (a, b) = tokio::join!(manager.connect(), manager.connect());
        assert_eq!(transport.connect_calls(), 1);
        assert!(a.is_ok() != b.is_ok());
        assert!(matches!(
            a.err().or(b.err()),
            Some(ClientError::AlreadyConnected)
        ));
    }

    #[tokio::test]
    async fn failed_connect_surfaces_wrapped_error() {
        let transport = MockTransport::new();
        transport.fail_next_connects(1);
        let (manager, states) = manager_with(&transport, test_config());

        let err = manager.connect().await.expect_err("connect must fail");
        assert_eq!(err.to_string(), "connect failed: socket refused");
        assert_eq!(manager.state(), ConnectionState::Error);
        assert_eq!(*states.lock().unwrap(), vec!["Connecting", "Error"]);
    }

    #[tokio::test]
    async fn login_drives_pairing_to_logged_in() {
        let transport = MockTransport::new();
        transport.script_pairing(vec![
            PairingEvent::Code("CODE-A".to_owned()),
            PairingEvent::Code("CODE-B".to_owned()),
            PairingEvent::Paired,
        ]);
        let (manager, states) = manager_with(&transport, test_config());

        let codes = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&codes);
        manager.set_on_pairing_code(move |code| {
            sink.lock().unwrap().push(code.to_owned());
        });

        manager.login().await.expect("login should work");
        assert!(manager.is_logged_in());
        assert_eq!(*codes.lock().unwrap(), vec!["CODE-A", "CODE-B"]);
        // QRPending is reported once even though two codes arrived.
        assert_eq!(
            *states.lock().unwrap(),
            vec!["Connecting", "Connected", "QRPending", "LoggedIn"]
        );
    }

    #[tokio::test]
    async fn login_with_valid_credentials_skips_pairing() {
        let transport = MockTransport::new();
        transport.set_logged_in(true);
        let (manager, states) = manager_with(&transport, test_config());

        manager.login().await.expect("login should work");
        assert!(manager.is_logged_in());
        assert_eq!(*states.lock().unwrap(), vec!["Connecting", "LoggedIn"]);
    }

    #[tokio::test]
    async fn pairing_timeout_fails_login() {
        let transport = MockTransport::new();
        transport.script_pairing(vec![
            PairingEvent::Code("CODE-A".to_owned()),
            PairingEvent::Timeout,
        ]);
        let (manager, _states) = manager_with(&transport, test_config());

        let err = manager.login().await.expect_err("login must fail");
        assert_eq!(err.to_string(), "pairing failed: pairing window timed out");
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn logout_requires_logged_in() {
        let transport = MockTransport::new();
        let (manager, _states) = manager_with(&transport, test_config());

        assert_eq!(manager.logout().await, Err(ClientError::NotLoggedIn));
    }

    #[tokio::test]
    async fn logout_returns_to_disconnected() {
        let transport = MockTransport::new();
        transport.set_logged_in(true);
        let (manager, _states) = manager_with(&transport, test_config());

        manager.login().await.expect("login should work");
        manager.logout().await.expect("logout should work");
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn send_message_requires_logged_in() {
        let transport = MockTransport::new();
        let (manager, _states) = manager_with(&transport, test_config());

        assert_eq!(
            manager.send_message("555@s.net", "hi").await,
            Err(ClientError::NotLoggedIn)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn unsolicited_disconnect_triggers_backoff_reconnect() {
        let transport = MockTransport::new();
        let (manager, _states) = manager_with(&transport, test_config());

        manager.connect().await.expect("connect should work");
        transport.emit(TransportEvent::Disconnected);

        wait_for_connect_calls(&transport, 2).await;
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_stops_after_attempt_budget() {
        let transport = MockTransport::new();
        let config = ClientConfig {
            max_reconnect_attempts: 2,
            ..test_config()
        };
        let (manager, _states) = manager_with(&transport, config);

        manager.connect().await.expect("connect should work");
        transport.fail_next_connects(usize::MAX);
        transport.emit(TransportEvent::Disconnected);

        // Initial connect plus two bounded attempts.
        wait_for_connect_calls(&transport, 3).await;
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(transport.connect_calls(), 3);
        assert!(manager.reconnect_gave_up());
    }

    #[tokio::test(start_paused = true)]
    async fn episode_resets_after_successful_reconnect() {
        let transport = MockTransport::new();
        let (manager, _states) = manager_with(&transport, test_config());

        manager.connect().await.expect("connect should work");
        transport.fail_next_connects(2);
        transport.emit(TransportEvent::Disconnected);

        // One failed attempt reschedules with a doubled delay; the next
        // failure and then a success close the episode.
        wait_for_connect_calls(&transport, 4).await;
        tokio::time::timeout(Duration::from_secs(3600), async {
            while manager.state() != ConnectionState::Connected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("reconnect should eventually succeed");

        assert!(!manager.reconnect_gave_up());
        assert_eq!(manager.reconnect.episode_attempts(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn close_cancels_pending_reconnect_timer() {
        let transport = MockTransport::new();
        let (manager, _states) = manager_with(&transport, test_config());

        manager.connect().await.expect("connect should work");
        transport.fail_next_connects(usize::MAX);
        transport.emit(TransportEvent::Disconnected);

        tokio::time::timeout(Duration::from_secs(3600), async {
            while !manager.reconnect.timer_pending() {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .expect("a reconnect timer should be armed");
        let calls_at_close = transport.connect_calls();

        manager.close().await;
        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(transport.connect_calls(), calls_at_close);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_detaches_transport() {
        let transport = MockTransport::new();
        let (manager, states) = manager_with(&transport, test_config());

        manager.connect().await.expect("connect should work");
        manager.close().await;
        let transitions_after_close = states.lock().unwrap().len();
        manager.close().await;

        assert_eq!(states.lock().unwrap().len(), transitions_after_close);
        assert_eq!(
            manager.connect().await,
            Err(ClientError::ClientNotInitialized)
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn state_callbacks_stay_ordered_under_racing_disconnects() {
        for _ in 0..100 {
            let transport = MockTransport::new();
            let config = ClientConfig {
                auto_reconnect: false,
                ..test_config()
            };
            let (manager, states) = manager_with(&transport, config);

            let racer = {
                let transport = Arc::clone(&transport);
                tokio::spawn(async move {
                    transport.emit(TransportEvent::Disconnected);
                })
            };
            // The race decides whether connect resolves or the disconnect
            // wins; either way the last callback must match the settled
            // state.
            let _ = manager.connect().await;
            racer.await.expect("racing task should finish");
            tokio::time::sleep(Duration::from_millis(5)).await;

            let states = states.lock().unwrap();
            let last = states.last().expect("at least one transition observed");
            assert_eq!(last, manager.state().as_str());
        }
    }

    #[tokio::test]
    async fn routes_group_messages_through_policy() {
        let transport = MockTransport::new();
        transport.set_logged_in(true);
        let (manager, _states) = manager_with(&transport, test_config());
        manager.set_response_policy(ResponsePolicy {
            respond_to_groups: true,
            only_if_mentioned: true,
        });

        let messages = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&messages);
        manager.set_on_message(move |chat_id, _sender, text| {
            sink.lock().unwrap().push(format!("{chat_id}:{text}"));
        });

        manager.login().await.expect("login should work");

        // Local account (999@s.net) absent from the mention list: dropped.
        transport.emit(TransportEvent::Message(
            chatrelay_core::RawMessage::ExtendedText {
                chat_id: "555@g.us".to_owned(),
                sender_id: "777@s.net".to_owned(),
                sender_name: "Bob".to_owned(),
                text: "ignored".to_owned(),
                mentioned_ids: vec!["111@s.net".to_owned()],
            },
        ));
        transport.emit(TransportEvent::Message(
            chatrelay_core::RawMessage::ExtendedText {
                chat_id: "555@g.us".to_owned(),
                sender_id: "777@s.net".to_owned(),
                sender_name: "Bob".to_owned(),
                text: "delivered".to_owned(),
                mentioned_ids: vec!["999@s.net".to_owned()],
            },
        ));

        tokio::time::timeout(Duration::from_secs(5), async {
            while messages.lock().unwrap().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("mentioned group message should be delivered");
        assert_eq!(*messages.lock().unwrap(), vec!["555@g.us:delivered"]);
    }
}
