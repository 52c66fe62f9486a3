use std::{
    collections::BTreeSet,
    sync::{Arc, RwLock},
};

use chatrelay_core::{
    is_group_jid, phone_fragment, CallbackRegistry, ClientError, InboundMessage, RawMessage,
    ResponsePolicy,
};
use tracing::{debug, trace, warn};

use crate::sync_store::SyncStore;

/// Routes inbound transport messages through the group-response policy and
/// on to the registered message callback.
pub struct EventDispatcher {
    local_id: RwLock<Option<String>>,
    policy: RwLock<ResponsePolicy>,
    sync_store: Option<Arc<dyn SyncStore>>,
    callbacks: Arc<CallbackRegistry>,
}

impl EventDispatcher {
    pub fn new(sync_store: Option<Arc<dyn SyncStore>>, callbacks: Arc<CallbackRegistry>) -> Self {
        Self {
            local_id: RwLock::new(None),
            policy: RwLock::new(ResponsePolicy::default()),
            sync_store,
            callbacks,
        }
    }

    /// Record the normalized local account identifier used by the mention
    /// gate. Known once the transport has paired.
    pub fn set_local_id(&self, id: impl Into<String>) {
        *self.local_id.write().unwrap_or_else(|e| e.into_inner()) = Some(id.into());
    }

    /// Replace the cached response policy.
    pub fn set_policy(&self, policy: ResponsePolicy) {
        *self.policy.write().unwrap_or_else(|e| e.into_inner()) = policy;
    }

    pub fn policy(&self) -> ResponsePolicy {
        *self.policy.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Re-read the response policy from the sync store and cache it.
    pub async fn refresh_policy(&self) -> Result<ResponsePolicy, ClientError> {
        let store = self
            .sync_store
            .as_ref()
            .ok_or(ClientError::SyncStoreNotSet)?;
        let policy = store
            .respond_to_groups_config()
            .await
            .map_err(|err| ClientError::transport("read response policy", err))?;
        self.set_policy(policy);
        Ok(policy)
    }

    /// Normalize, filter, and deliver one raw transport message.
    ///
    /// Contact sync is best-effort: a failing sync store is logged and the
    /// message is delivered regardless.
    pub async fn dispatch(&self, raw: RawMessage) {
        let Some(message) = normalize(raw) else {
            return;
        };

        if !self.should_respond(&message) {
            debug!(chat = %message.chat_id, "message filtered by response policy");
            return;
        }

        if let Some(store) = &self.sync_store {
            let phone = phone_fragment(&message.sender_id);
            if let Err(err) = store
                .sync_contact(&message.sender_id, &message.sender_name, phone)
                .await
            {
                warn!(%err, sender = %message.sender_id, "contact sync failed");
            }
        }

        self.callbacks
            .emit_message(&message.chat_id, &message.sender_name, &message.text);
    }

    /// Response policy gate: direct messages always pass; group messages
    /// pass per the cached policy flags, with the mention gate matching the
    /// local account identifier exactly against the mention list.
    fn should_respond(&self, message: &InboundMessage) -> bool {
        if !message.is_group {
            return true;
        }

        let policy = self.policy();
        if !policy.respond_to_groups {
            return false;
        }
        if policy.only_if_mentioned {
            let local_id = self.local_id.read().unwrap_or_else(|e| e.into_inner());
            return match local_id.as_deref() {
                Some(id) => message.mentioned_ids.contains(id),
                None => false,
            };
        }
        true
    }
}

/// Reduce a raw transport message to the normalized inbound shape.
///
/// Unsupported kinds are dropped here.
pub fn normalize(raw: RawMessage) -> Option<InboundMessage> {
    match raw {
        RawMessage::Text {
            chat_id,
            sender_id,
            sender_name,
            text,
        } => Some(InboundMessage {
            is_group: is_group_jid(&chat_id),
            chat_id,
            sender_id,
            sender_name,
            text,
            mentioned_ids: BTreeSet::new(),
        }),
        RawMessage::ExtendedText {
            chat_id,
            sender_id,
            sender_name,
            text,
            mentioned_ids,
        } => Some(InboundMessage {
            is_group: is_group_jid(&chat_id),
            chat_id,
            sender_id,
            sender_name,
            text,
            mentioned_ids: mentioned_ids.into_iter().collect(),
        }),
        RawMessage::Unsupported { kind } => {
            trace!(kind = %kind, "dropping unsupported message kind");
            None
        }
    }
}
