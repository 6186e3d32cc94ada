//! Membership and conversation lookups

use crate::types::{Conversation, ConversationId, Participant};
use anyhow::Result;
use async_trait::async_trait;

/// Lists the current members of a conversation
#[async_trait]
pub trait MembershipProvider: Send + Sync {
    async fn list(&self, conversation: &ConversationId) -> Result<Vec<Participant>>;
}

/// Resolves conversations the bot sees activity in but hasn't spawned yet
#[async_trait]
pub trait ConversationDirectory: Send + Sync {
    async fn conversation(&self, id: &ConversationId) -> Result<Conversation>;
}
