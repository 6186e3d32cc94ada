//! Durable storage behind the state cache

use crate::types::ConversationId;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// A durable home for conversation records.
///
/// Records are opaque JSON documents at this level; versioning and
/// migration happen in the cache layer.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    /// Human-readable name for logging
    fn name(&self) -> &str;

    async fn load(&self, conversation: &ConversationId) -> Result<Option<Value>>;

    async fn save(&self, conversation: &ConversationId, record: &Value) -> Result<()>;

    async fn remove(&self, conversation: &ConversationId) -> Result<()>;

    async fn list(&self) -> Result<Vec<ConversationId>>;
}

/// Process-local backend. Nothing survives a restart.
#[derive(Default)]
pub struct MemoryBackend {
    records: RwLock<HashMap<ConversationId, Value>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a raw document, e.g. a v1 record in tests
    pub async fn insert_raw(&self, conversation: ConversationId, record: Value) {
        self.records.write().await.insert(conversation, record);
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self, conversation: &ConversationId) -> Result<Option<Value>> {
        Ok(self.records.read().await.get(conversation).cloned())
    }

    async fn save(&self, conversation: &ConversationId, record: &Value) -> Result<()> {
        self.records
            .write()
            .await
            .insert(conversation.clone(), record.clone());
        Ok(())
    }

    async fn remove(&self, conversation: &ConversationId) -> Result<()> {
        self.records.write().await.remove(conversation);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<ConversationId>> {
        let mut ids: Vec<ConversationId> = self.records.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
