use crate::{error::ClientError, types::ConnectionState};

/// Connection lifecycle state machine.
///
/// Holds exactly one [`ConnectionState`] at any instant and only moves
/// between states through the methods below. Callers fan the returned state
/// out to the state-change callback; methods returning `Option` yield `None`
/// when the event is a no-op for the current state (no callback fires).
#[derive(Debug, Clone)]
pub struct SessionStateMachine {
    state: ConnectionState,
}

impl Default for SessionStateMachine {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
        }
    }
}

impl SessionStateMachine {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Start a connect attempt. Fails without side effect when a connection
    /// is already established.
    pub fn begin_connect(&mut self) -> Result<ConnectionState, ClientError> {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Error => {
                self.state = ConnectionState::Connecting;
                Ok(self.state)
            }
            _ => Err(ClientError::AlreadyConnected),
        }
    }

    /// Resolve an in-flight connect attempt.
    ///
    /// Moves straight to `LoggedIn` when the stored credentials are still
    /// valid, otherwise to `Connected`.
    pub fn connect_succeeded(&mut self, logged_in: bool) -> Result<ConnectionState, ClientError> {
        if self.state != ConnectionState::Connecting {
            return Err(ClientError::invalid_transition(self.state, "finish connect"));
        }
        self.state = if logged_in {
            ConnectionState::LoggedIn
        } else {
            ConnectionState::Connected
        };
        Ok(self.state)
    }

    /// Fail an in-flight connect attempt.
    pub fn connect_failed(&mut self) -> ConnectionState {
        self.state = ConnectionState::Error;
        self.state
    }

    /// A pairing code arrived on the pairing channel.
    ///
    /// Returns `Ok(None)` when the session was already in `QrPending`;
    /// subsequent codes refresh the code without a new transition.
    pub fn pairing_code(&mut self) -> Result<Option<ConnectionState>, ClientError> {
        match self.state {
            ConnectionState::Connected => {
                self.state = ConnectionState::QrPending;
                Ok(Some(self.state))
            }
            ConnectionState::QrPending => Ok(None),
            state => Err(ClientError::invalid_transition(state, "receive pairing code")),
        }
    }

    /// The device was paired; the session is authenticated.
    pub fn paired(&mut self) -> Result<ConnectionState, ClientError> {
        match self.state {
            ConnectionState::Connected | ConnectionState::QrPending => {
                self.state = ConnectionState::LoggedIn;
                Ok(self.state)
            }
            state => Err(ClientError::invalid_transition(state, "pair")),
        }
    }

    /// The pairing window closed without a scan; the transport connection
    /// itself is still up. `None` when no code had been issued yet.
    pub fn pairing_failed(&mut self) -> Option<ConnectionState> {
        if self.state == ConnectionState::QrPending {
            self.state = ConnectionState::Connected;
            return Some(self.state);
        }
        None
    }

    /// Unsolicited `Connected` event from the transport.
    ///
    /// A no-op while `Connecting`: the in-flight connect call resolves that
    /// state itself.
    pub fn remote_connected(&mut self) -> Option<ConnectionState> {
        match self.state {
            ConnectionState::Disconnected | ConnectionState::Error => {
                self.state = ConnectionState::Connected;
                Some(self.state)
            }
            _ => None,
        }
    }

    /// Unsolicited disconnect or remote logout.
    pub fn remote_disconnected(&mut self) -> Option<ConnectionState> {
        if self.state == ConnectionState::Disconnected {
            return None;
        }
        self.state = ConnectionState::Disconnected;
        Some(self.state)
    }

    /// Caller-requested logout. Requires an authenticated session.
    pub fn logged_out(&mut self) -> Result<ConnectionState, ClientError> {
        if self.state != ConnectionState::LoggedIn {
            return Err(ClientError::NotLoggedIn);
        }
        self.state = ConnectionState::Disconnected;
        Ok(self.state)
    }

    /// Force `Disconnected` regardless of the current state.
    pub fn close(&mut self) -> ConnectionState {
        self.state = ConnectionState::Disconnected;
        self.state
    }
}
