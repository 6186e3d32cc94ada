//! Per-conversation key/value state
//!
//! Reads are served synchronously from a local cache; writes update the
//! cache first and then the durable backend. A failed durable write is
//! logged and swallowed, so the cache stays authoritative until the next
//! successful write reconciles the two.

pub mod backend;
pub mod cache;
pub mod migrate;
pub mod sqlite;

use crate::types::ConversationId;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

pub use backend::{MemoryBackend, StoreBackend};
pub use cache::CachedStore;
pub use migrate::{CURRENT_VERSION, MigrationError};
pub use sqlite::SqliteBackend;

/// Well-known record keys
pub mod keys {
    pub const GATE_STATE: &str = "gateState";
    pub const LESSON_STATE: &str = "lessonState";
    pub const ACTIVE_CARD_MESSAGE_ID: &str = "activeCardMessageId";
    pub const SPACE_TITLE: &str = "spaceTitle";
    pub const ADDED_BY: &str = "addedBy";
    pub const ADDED_BY_EMAIL: &str = "addedByEmail";
    pub const ADDED_DATE: &str = "addedDate";
    pub const SEEN_GRADUATION: &str = "seenGraduation";
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no state loaded for conversation {0}")]
    NotLoaded(ConversationId),
    #[error("invalid key: {0:?}")]
    InvalidKey(String),
    #[error("stored value for {key} is malformed: {source}")]
    Malformed {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode value for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// The versioned document stored for each conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub version: u32,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Record {
    pub fn new(data: Map<String, Value>) -> Self {
        Self {
            version: CURRENT_VERSION,
            data,
        }
    }
}

/// How a conversation's record came to be in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Already cached, nothing read
    Cached,
    /// Read from the backend at the current version
    Existing,
    /// Read from the backend and upgraded from an older version
    Migrated { from: u32 },
    /// Nothing stored yet; defaults were written
    Created,
    /// The stored record could not be read or migrated; defaults are in use
    /// and derived state must be recomputed
    Recovered,
}

/// Key/value persistence keyed by conversation
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Bring a conversation's record into the cache, migrating it if needed
    async fn load(&self, conversation: &ConversationId) -> Result<LoadOutcome, StoreError>;

    /// Cache-only read
    fn get(&self, conversation: &ConversationId, key: &str) -> Result<Option<Value>, StoreError>;

    /// Update the cache, then write through to the backend
    async fn put(
        &self,
        conversation: &ConversationId,
        key: &str,
        value: Value,
    ) -> Result<(), StoreError>;

    /// Remove one key, or the whole record when `key` is `None`
    async fn forget(
        &self,
        conversation: &ConversationId,
        key: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Conversations the backend knows about
    async fn conversations(&self) -> Result<Vec<ConversationId>, StoreError>;
}

/// Typed helpers over [`StateStore`]
#[async_trait]
pub trait StateStoreExt: StateStore {
    fn get_as<T: DeserializeOwned>(
        &self,
        conversation: &ConversationId,
        key: &str,
    ) -> Result<Option<T>, StoreError> {
        match self.get(conversation, key)? {
            Some(value) => serde_json::from_value(value)
                .map(Some)
                .map_err(|source| StoreError::Malformed {
                    key: key.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    async fn put_as<T: Serialize + Sync>(
        &self,
        conversation: &ConversationId,
        key: &str,
        value: &T,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(value).map_err(|source| StoreError::Encode {
            key: key.to_string(),
            source,
        })?;
        self.put(conversation, key, value).await
    }
}

impl<S: StateStore + ?Sized> StateStoreExt for S {}
