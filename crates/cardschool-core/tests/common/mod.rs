//! Fakes shared by the integration tests
#![allow(dead_code)]

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use cardschool_core::membership::{ConversationDirectory, MembershipProvider};
use cardschool_core::output::{OutputGateway, SendReceipt};
use cardschool_core::store::{CachedStore, MemoryBackend, StateStore};
use cardschool_core::types::{Conversation, ConversationId, Participant};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub fn person(email: &str) -> Participant {
    let name = email.split('@').next().unwrap_or(email);
    Participant::new(email, name)
}

pub fn group(id: &str) -> Conversation {
    Conversation::new(id, format!("Space {}", id), cardschool_core::ConversationKind::Group)
}

pub fn direct(id: &str) -> Conversation {
    Conversation::new(id, format!("Direct {}", id), cardschool_core::ConversationKind::Direct)
}

/// Membership lists that tests can edit, with an optional lookup delay
#[derive(Default)]
pub struct FakeMembers {
    rooms: Mutex<HashMap<ConversationId, Vec<Participant>>>,
    failing: AtomicBool,
    delay_ms: AtomicUsize,
    pub calls: AtomicUsize,
}

impl FakeMembers {
    pub fn set(&self, conversation: &str, members: &[&str]) {
        self.rooms.lock().unwrap().insert(
            ConversationId::new(conversation),
            members.iter().map(|m| person(m)).collect(),
        );
    }

    pub fn remove(&self, conversation: &str, email: &str) {
        if let Some(list) = self.rooms.lock().unwrap().get_mut(&ConversationId::new(conversation)) {
            list.retain(|p| !p.has_email(email));
        }
    }

    pub fn add(&self, conversation: &str, email: &str) {
        self.rooms
            .lock()
            .unwrap()
            .entry(ConversationId::new(conversation))
            .or_default()
            .push(person(email));
    }

    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn delay(&self, ms: usize) {
        self.delay_ms.store(ms, Ordering::SeqCst);
    }
}

#[async_trait]
impl MembershipProvider for FakeMembers {
    async fn list(&self, conversation: &ConversationId) -> Result<Vec<Participant>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        // Snapshot before sleeping, like a real request in flight
        let snapshot = self
            .rooms
            .lock()
            .unwrap()
            .get(conversation)
            .cloned()
            .unwrap_or_default();
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow!("membership service unavailable"));
        }
        Ok(snapshot)
    }
}

/// Something the bot tried to post
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Text { conversation: String, text: String },
    Card { conversation: String, card: Value },
    Reply { conversation: String, parent: String, text: String },
    Direct { email: String, text: String },
    Upload { conversation: String },
    Exit { conversation: String },
}

/// Records every raw output call
#[derive(Default)]
pub struct RecordingOutput {
    sent: Mutex<Vec<Sent>>,
    counter: AtomicUsize,
}

impl RecordingOutput {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.sent.lock().unwrap().clear();
    }

    pub fn texts(&self, conversation: &str) -> Vec<String> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s {
                Sent::Text { conversation: c, text } if c == conversation => Some(text),
                Sent::Reply { conversation: c, text, .. } if c == conversation => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn cards(&self, conversation: &str) -> usize {
        self.sent()
            .iter()
            .filter(|s| matches!(s, Sent::Card { conversation: c, .. } if c == conversation))
            .count()
    }

    pub fn exited(&self, conversation: &str) -> bool {
        self.sent()
            .iter()
            .any(|s| matches!(s, Sent::Exit { conversation: c } if c == conversation))
    }

    fn record(&self, sent: Sent) -> Result<SendReceipt> {
        self.sent.lock().unwrap().push(sent);
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SendReceipt::Sent {
            message_id: format!("msg-{}", n),
        })
    }
}

#[async_trait]
impl OutputGateway for RecordingOutput {
    async fn send(&self, conversation: &ConversationId, markdown: &str) -> Result<SendReceipt> {
        self.record(Sent::Text {
            conversation: conversation.to_string(),
            text: markdown.to_string(),
        })
    }

    async fn send_card(
        &self,
        conversation: &ConversationId,
        card: &Value,
        _fallback_text: &str,
    ) -> Result<SendReceipt> {
        self.record(Sent::Card {
            conversation: conversation.to_string(),
            card: card.clone(),
        })
    }

    async fn reply(
        &self,
        conversation: &ConversationId,
        parent_id: &str,
        markdown: &str,
    ) -> Result<SendReceipt> {
        self.record(Sent::Reply {
            conversation: conversation.to_string(),
            parent: parent_id.to_string(),
            text: markdown.to_string(),
        })
    }

    async fn direct_message(&self, person_email: &str, markdown: &str) -> Result<SendReceipt> {
        self.record(Sent::Direct {
            email: person_email.to_string(),
            text: markdown.to_string(),
        })
    }

    async fn upload_file(
        &self,
        conversation: &ConversationId,
        _path: &Path,
    ) -> Result<SendReceipt> {
        self.record(Sent::Upload {
            conversation: conversation.to_string(),
        })
    }

    async fn exit(&self, conversation: &ConversationId) -> Result<()> {
        self.record(Sent::Exit {
            conversation: conversation.to_string(),
        })?;
        Ok(())
    }
}

/// Conversations the tests registered up front
#[derive(Default)]
pub struct FakeDirectory {
    known: Mutex<HashMap<ConversationId, Conversation>>,
}

impl FakeDirectory {
    pub fn insert(&self, conversation: Conversation) {
        self.known
            .lock()
            .unwrap()
            .insert(conversation.id.clone(), conversation);
    }
}

#[async_trait]
impl ConversationDirectory for FakeDirectory {
    async fn conversation(&self, id: &ConversationId) -> Result<Conversation> {
        self.known
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| anyhow!("room {} not found", id))
    }
}

pub fn memory_store() -> Arc<CachedStore> {
    Arc::new(CachedStore::new(Arc::new(MemoryBackend::new())))
}

pub async fn loaded(store: &Arc<CachedStore>, conversation: &str) {
    store
        .load(&ConversationId::new(conversation))
        .await
        .unwrap();
}
