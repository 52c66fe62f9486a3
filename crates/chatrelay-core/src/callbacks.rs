use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{error::ClientError, types::ConnectionState};

/// Callback invoked with each pairing code as it is issued.
pub type PairingCodeCallback = Arc<dyn Fn(&str) + Send + Sync>;
/// Callback invoked once per lifecycle transition with the new state name.
pub type StateChangeCallback = Arc<dyn Fn(&str, Option<&ClientError>) + Send + Sync>;
/// Callback invoked with `(chat_id, sender_name, text)` for routed messages.
pub type MessageCallback = Arc<dyn Fn(&str, &str, &str) + Send + Sync>;

/// Three independently settable callback slots with last-write-wins
/// semantics.
///
/// Slots may be replaced before or after `connect`. Callbacks run
/// synchronously on the transport's event-delivery context: an
/// implementation that needs to block must hand off to its own task, or it
/// stalls message and state delivery for the whole session.
#[derive(Default)]
pub struct CallbackRegistry {
    on_pairing_code: RwLock<Option<PairingCodeCallback>>,
    on_state_change: RwLock<Option<StateChangeCallback>>,
    on_message: RwLock<Option<MessageCallback>>,
}

// Recover from lock poisoning; callback slots hold no invariants a panic
// could break.
fn read_slot<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write_slot<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_on_pairing_code<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        *write_slot(&self.on_pairing_code) = Some(Arc::new(callback));
    }

    pub fn set_on_state_change<F>(&self, callback: F)
    where
        F: Fn(&str, Option<&ClientError>) + Send + Sync + 'static,
    {
        *write_slot(&self.on_state_change) = Some(Arc::new(callback));
    }

    pub fn set_on_message<F>(&self, callback: F)
    where
        F: Fn(&str, &str, &str) + Send + Sync + 'static,
    {
        *write_slot(&self.on_message) = Some(Arc::new(callback));
    }

    /// Forward a pairing code. No-op when the slot is empty.
    pub fn emit_pairing_code(&self, code: &str) {
        let callback = read_slot(&self.on_pairing_code).clone();
        if let Some(callback) = callback {
            callback(code);
        }
    }

    /// Forward a lifecycle transition. No-op when the slot is empty.
    pub fn emit_state_change(&self, state: ConnectionState, err: Option<&ClientError>) {
        let callback = read_slot(&self.on_state_change).clone();
        if let Some(callback) = callback {
            callback(state.as_str(), err);
        }
    }

    /// Forward a routed message. No-op when the slot is empty.
    pub fn emit_message(&self, chat_id: &str, sender_name: &str, text: &str) {
        let callback = read_slot(&self.on_message).clone();
        if let Some(callback) = callback {
            callback(chat_id, sender_name, text);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn emits_without_callback_set_is_a_no_op() {
        let registry = CallbackRegistry::new();
        registry.emit_pairing_code("CODE-1");
        registry.emit_state_change(ConnectionState::Connected, None);
        registry.emit_message("555@s.net", "Alice", "hi");
    }

    #[test]
    fn last_write_wins_per_slot() {
        let registry = CallbackRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        registry.set_on_pairing_code(move |code| {
            first.lock().unwrap().push(format!("first:{code}"));
        });
        let second = Arc::clone(&seen);
        registry.set_on_pairing_code(move |code| {
            second.lock().unwrap().push(format!("second:{code}"));
        });

        registry.emit_pairing_code("CODE-2");
        assert_eq!(*seen.lock().unwrap(), vec!["second:CODE-2".to_owned()]);
    }

    #[test]
    fn forwards_state_name_and_error() {
        let registry = CallbackRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let sink = Arc::clone(&seen);
        registry.set_on_state_change(move |state, err| {
            sink.lock()
                .unwrap()
                .push((state.to_owned(), err.cloned()));
        });

        registry.emit_state_change(ConnectionState::Error, Some(&ClientError::AlreadyConnected));
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0].0, "Error");
        assert_eq!(seen[0].1, Some(ClientError::AlreadyConnected));
    }
}
