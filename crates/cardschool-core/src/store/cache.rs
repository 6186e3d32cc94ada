//! Write-through cache in front of a [`StoreBackend`]

use super::backend::StoreBackend;
use super::migrate::migrate;
use super::{LoadOutcome, Record, StateStore, StoreError};
use crate::types::ConversationId;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// The bot's state store: a local cache for synchronous reads, written
/// through to a durable backend.
pub struct CachedStore {
    cache: DashMap<ConversationId, Record>,
    backend: Arc<dyn StoreBackend>,
    /// Seed data for conversations with no stored record
    defaults: Map<String, Value>,
    /// Serializes durable writes so a stale snapshot never lands last
    write_lock: Mutex<()>,
}

impl CachedStore {
    pub fn new(backend: Arc<dyn StoreBackend>) -> Self {
        Self::with_defaults(backend, Map::new())
    }

    pub fn with_defaults(backend: Arc<dyn StoreBackend>, defaults: Map<String, Value>) -> Self {
        Self {
            cache: DashMap::new(),
            backend,
            defaults,
            write_lock: Mutex::new(()),
        }
    }

    /// Whether a conversation's record is cached
    pub fn is_loaded(&self, conversation: &ConversationId) -> bool {
        self.cache.contains_key(conversation)
    }

    /// Snapshot of a cached record
    pub fn record(&self, conversation: &ConversationId) -> Option<Record> {
        self.cache.get(conversation).map(|r| r.value().clone())
    }

    fn default_record(&self) -> Record {
        Record::new(self.defaults.clone())
    }

    /// Write the current cached record through to the backend. Failures are
    /// logged and swallowed; the cache stays authoritative.
    async fn write_through(&self, conversation: &ConversationId) {
        let _guard = self.write_lock.lock().await;
        // Snapshot under the write lock so the last write carries the latest data
        let Some(snapshot) = self.record(conversation) else {
            return;
        };
        let value = match serde_json::to_value(&snapshot) {
            Ok(v) => v,
            Err(e) => {
                error!("Failed to encode state for {}: {}", conversation, e);
                return;
            }
        };
        if let Err(e) = self.backend.save(conversation, &value).await {
            error!(
                "Failed {} state update for {}: {:#}. Continuing with cached state",
                self.backend.name(),
                conversation,
                e
            );
        }
    }
}

fn validate_key(key: &str) -> Result<(), StoreError> {
    if key.trim().is_empty() {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

#[async_trait]
impl StateStore for CachedStore {
    async fn load(&self, conversation: &ConversationId) -> Result<LoadOutcome, StoreError> {
        if self.is_loaded(conversation) {
            return Ok(LoadOutcome::Cached);
        }

        let outcome = match self.backend.load(conversation).await {
            Ok(Some(raw)) => match migrate(raw) {
                Ok(migrated) => {
                    let changed = migrated.changed();
                    let from = migrated.from;
                    self.cache.insert(conversation.clone(), migrated.record);
                    if changed {
                        info!(
                            "Migrated state for {} from v{} to v{}",
                            conversation,
                            from,
                            super::CURRENT_VERSION
                        );
                        self.write_through(conversation).await;
                        LoadOutcome::Migrated { from }
                    } else {
                        debug!("Found stored state for {}", conversation);
                        LoadOutcome::Existing
                    }
                }
                Err(e) => {
                    warn!(
                        "Discarding unreadable state for {}: {}. Starting from defaults",
                        conversation, e
                    );
                    self.cache.insert(conversation.clone(), self.default_record());
                    self.write_through(conversation).await;
                    LoadOutcome::Recovered
                }
            },
            Ok(None) => {
                debug!("No stored state for {}, creating one", conversation);
                self.cache.insert(conversation.clone(), self.default_record());
                self.write_through(conversation).await;
                LoadOutcome::Created
            }
            Err(e) => {
                error!(
                    "Failed to read state for {} from {}: {:#}. Using defaults",
                    conversation,
                    self.backend.name(),
                    e
                );
                self.cache.insert(conversation.clone(), self.default_record());
                LoadOutcome::Recovered
            }
        };
        Ok(outcome)
    }

    fn get(&self, conversation: &ConversationId, key: &str) -> Result<Option<Value>, StoreError> {
        validate_key(key)?;
        let record = self
            .cache
            .get(conversation)
            .ok_or_else(|| StoreError::NotLoaded(conversation.clone()))?;
        Ok(record.data.get(key).cloned())
    }

    async fn put(
        &self,
        conversation: &ConversationId,
        key: &str,
        value: Value,
    ) -> Result<(), StoreError> {
        validate_key(key)?;
        {
            let mut entry = self
                .cache
                .entry(conversation.clone())
                .or_insert_with(|| self.default_record());
            entry.data.insert(key.to_string(), value);
        }
        self.write_through(conversation).await;
        Ok(())
    }

    async fn forget(
        &self,
        conversation: &ConversationId,
        key: Option<&str>,
    ) -> Result<(), StoreError> {
        match key {
            Some(key) => {
                validate_key(key)?;
                let removed = match self.cache.get_mut(conversation) {
                    Some(mut record) => record.data.remove(key).is_some(),
                    None => return Err(StoreError::NotLoaded(conversation.clone())),
                };
                if !removed {
                    warn!("Failed to find {} in forget() for {}", key, conversation);
                    return Ok(());
                }
                self.write_through(conversation).await;
            }
            None => {
                self.cache.remove(conversation);
                let _guard = self.write_lock.lock().await;
                if let Err(e) = self.backend.remove(conversation).await {
                    error!("Failed to remove stored state for {}: {:#}", conversation, e);
                }
            }
        }
        Ok(())
    }

    async fn conversations(&self) -> Result<Vec<ConversationId>, StoreError> {
        self.backend
            .list()
            .await
            .map_err(|e| StoreError::Backend(format!("{:#}", e)))
    }
}
