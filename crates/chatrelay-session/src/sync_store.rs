use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use async_trait::async_trait;
use chatrelay_core::ResponsePolicy;
use thiserror::Error;

/// Errors surfaced by sync-store operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SyncStoreError {
    #[error("sync store unavailable: {0}")]
    Unavailable(String),
    #[error("sync store backend failure: {0}")]
    Backend(String),
}

/// External policy/persistence collaborator.
///
/// Supplies the group-response configuration and accepts best-effort
/// contact updates while messages are routed.
#[async_trait]
pub trait SyncStore: Send + Sync {
    /// Read the `(respond_to_groups, only_if_mentioned)` policy flags.
    async fn respond_to_groups_config(&self) -> Result<ResponsePolicy, SyncStoreError>;

    /// Upsert a contact seen in inbound traffic.
    async fn sync_contact(&self, id: &str, name: &str, phone: &str) -> Result<(), SyncStoreError>;
}

/// Contact record held by [`InMemorySyncStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRecord {
    pub name: String,
    pub phone: String,
}

/// In-memory sync store for tests and the smoke binary.
#[derive(Clone, Default)]
pub struct InMemorySyncStore {
    policy: Arc<RwLock<ResponsePolicy>>,
    contacts: Arc<RwLock<HashMap<String, ContactRecord>>>,
}

impl InMemorySyncStore {
    pub fn new(policy: ResponsePolicy) -> Self {
        Self {
            policy: Arc::new(RwLock::new(policy)),
            contacts: Arc::default(),
        }
    }

    pub fn set_policy(&self, policy: ResponsePolicy) {
        *self.policy.write().unwrap_or_else(|e| e.into_inner()) = policy;
    }

    pub fn contact(&self, id: &str) -> Option<ContactRecord> {
        self.contacts
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }
}

#[async_trait]
impl SyncStore for InMemorySyncStore {
    async fn respond_to_groups_config(&self) -> Result<ResponsePolicy, SyncStoreError> {
        Ok(*self.policy.read().unwrap_or_else(|e| e.into_inner()))
    }

    async fn sync_contact(&self, id: &str, name: &str, phone: &str) -> Result<(), SyncStoreError> {
        self.contacts
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(
                id.to_owned(),
                ContactRecord {
                    name: name.to_owned(),
                    phone: phone.to_owned(),
                },
            );
        Ok(())
    }
}
