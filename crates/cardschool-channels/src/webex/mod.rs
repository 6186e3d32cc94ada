//! Webex adapter
//!
//! Implements the core's membership, directory and output seams on top of
//! the Webex REST API.

pub mod client;
pub mod models;

pub use client::WebexClient;

use anyhow::Result;
use async_trait::async_trait;
use cardschool_core::membership::{ConversationDirectory, MembershipProvider};
use cardschool_core::output::{OutputGateway, SendReceipt};
use cardschool_core::types::{Conversation, ConversationId, ConversationKind, Participant};
use models::{Attachment, Membership, NewMessage, Person, Room};
use serde_json::Value;
use std::path::Path;
use tracing::debug;

impl From<&Membership> for Participant {
    fn from(m: &Membership) -> Self {
        Participant::new(m.person_email.as_str(), m.person_display_name.as_str())
            .with_person_id(m.person_id.as_str())
    }
}

impl From<&Person> for Participant {
    fn from(p: &Person) -> Self {
        Participant::new(p.primary_email(), p.display_name.as_str())
            .with_person_id(p.id.as_str())
            .with_avatar(p.avatar.clone())
    }
}

impl From<&Room> for Conversation {
    fn from(room: &Room) -> Self {
        Conversation::new(
            room.id.as_str(),
            room.title.as_str(),
            ConversationKind::from_room_type(&room.room_type),
        )
    }
}

fn sent(message: models::Message) -> SendReceipt {
    SendReceipt::Sent {
        message_id: message.id,
    }
}

#[async_trait]
impl MembershipProvider for WebexClient {
    async fn list(&self, conversation: &ConversationId) -> Result<Vec<Participant>> {
        let memberships = self.list_memberships(conversation.as_str()).await?;
        debug!("{} has {} members", conversation, memberships.len());
        Ok(memberships.iter().map(Participant::from).collect())
    }
}

#[async_trait]
impl ConversationDirectory for WebexClient {
    async fn conversation(&self, id: &ConversationId) -> Result<Conversation> {
        let room = self.get_room(id.as_str()).await?;
        Ok(Conversation::from(&room))
    }
}

#[async_trait]
impl OutputGateway for WebexClient {
    async fn send(&self, conversation: &ConversationId, markdown: &str) -> Result<SendReceipt> {
        let message = NewMessage {
            room_id: Some(conversation.to_string()),
            markdown: Some(markdown.to_string()),
            ..Default::default()
        };
        Ok(sent(self.post_message(&message).await?))
    }

    async fn send_card(
        &self,
        conversation: &ConversationId,
        card: &Value,
        fallback_text: &str,
    ) -> Result<SendReceipt> {
        let message = NewMessage {
            room_id: Some(conversation.to_string()),
            text: Some(fallback_text.to_string()),
            attachments: vec![Attachment::adaptive_card(card)],
            ..Default::default()
        };
        Ok(sent(self.post_message(&message).await?))
    }

    async fn reply(
        &self,
        conversation: &ConversationId,
        parent_id: &str,
        markdown: &str,
    ) -> Result<SendReceipt> {
        let message = NewMessage {
            room_id: Some(conversation.to_string()),
            parent_id: Some(parent_id.to_string()),
            markdown: Some(markdown.to_string()),
            ..Default::default()
        };
        Ok(sent(self.post_message(&message).await?))
    }

    async fn direct_message(&self, person_email: &str, markdown: &str) -> Result<SendReceipt> {
        let message = NewMessage {
            to_person_email: Some(person_email.to_string()),
            markdown: Some(markdown.to_string()),
            ..Default::default()
        };
        Ok(sent(self.post_message(&message).await?))
    }

    async fn upload_file(&self, conversation: &ConversationId, path: &Path) -> Result<SendReceipt> {
        Ok(sent(self.upload(conversation.as_str(), path).await?))
    }

    async fn exit(&self, conversation: &ConversationId) -> Result<()> {
        self.leave_room(conversation.as_str()).await
    }
}
