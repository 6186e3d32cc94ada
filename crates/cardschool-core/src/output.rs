//! Outbound message primitives and the gate that wraps them

use crate::gate::output_allowed;
use crate::store::StateStore;
use crate::types::ConversationId;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// What happened to an outbound call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendReceipt {
    /// Posted; the platform's id for the new message
    Sent { message_id: String },
    /// Dropped by the gate; nothing was posted
    Suppressed,
}

impl SendReceipt {
    pub fn message_id(&self) -> Option<&str> {
        match self {
            SendReceipt::Sent { message_id } => Some(message_id),
            SendReceipt::Suppressed => None,
        }
    }
}

/// Raw send primitives of the messaging platform
#[async_trait]
pub trait OutputGateway: Send + Sync {
    /// Post a markdown message
    async fn send(&self, conversation: &ConversationId, markdown: &str) -> Result<SendReceipt>;

    /// Post an adaptive card, with text for clients that can't render it
    async fn send_card(
        &self,
        conversation: &ConversationId,
        card: &Value,
        fallback_text: &str,
    ) -> Result<SendReceipt>;

    /// Post a threaded reply to `parent_id`
    async fn reply(
        &self,
        conversation: &ConversationId,
        parent_id: &str,
        markdown: &str,
    ) -> Result<SendReceipt>;

    /// Message a person one-to-one
    async fn direct_message(&self, person_email: &str, markdown: &str) -> Result<SendReceipt>;

    /// Post a local file
    async fn upload_file(&self, conversation: &ConversationId, path: &Path) -> Result<SendReceipt>;

    /// Remove the bot from the conversation
    async fn exit(&self, conversation: &ConversationId) -> Result<()>;
}

/// Gated view of an [`OutputGateway`] for one conversation.
///
/// Every call consults the conversation's cached gate state first. When
/// output is suppressed the call succeeds with [`SendReceipt::Suppressed`]
/// and nothing reaches the platform.
#[derive(Clone)]
pub struct GatedOutput {
    conversation: ConversationId,
    store: Arc<dyn StateStore>,
    inner: Arc<dyn OutputGateway>,
}

impl GatedOutput {
    pub fn new(
        conversation: ConversationId,
        store: Arc<dyn StateStore>,
        inner: Arc<dyn OutputGateway>,
    ) -> Self {
        Self {
            conversation,
            store,
            inner,
        }
    }

    pub fn conversation(&self) -> &ConversationId {
        &self.conversation
    }

    /// Whether output is currently permitted
    pub fn allowed(&self) -> bool {
        output_allowed(self.store.as_ref(), &self.conversation)
    }

    fn suppressed(&self, what: &str) -> Result<SendReceipt> {
        debug!("Suppressing {} from bot in {}", what, self.conversation);
        Ok(SendReceipt::Suppressed)
    }

    pub async fn send(&self, markdown: &str) -> Result<SendReceipt> {
        if !self.allowed() {
            return self.suppressed("message");
        }
        self.inner.send(&self.conversation, markdown).await
    }

    pub async fn send_card(&self, card: &Value, fallback_text: &str) -> Result<SendReceipt> {
        if !self.allowed() {
            return self.suppressed("card");
        }
        self.inner
            .send_card(&self.conversation, card, fallback_text)
            .await
    }

    pub async fn reply(&self, parent_id: &str, markdown: &str) -> Result<SendReceipt> {
        if !self.allowed() {
            return self.suppressed("reply");
        }
        self.inner.reply(&self.conversation, parent_id, markdown).await
    }

    pub async fn direct_message(&self, person_email: &str, markdown: &str) -> Result<SendReceipt> {
        if !self.allowed() {
            return self.suppressed("direct message");
        }
        self.inner.direct_message(person_email, markdown).await
    }

    pub async fn upload_file(&self, path: &Path) -> Result<SendReceipt> {
        if !self.allowed() {
            return self.suppressed("upload");
        }
        self.inner.upload_file(&self.conversation, path).await
    }
}
