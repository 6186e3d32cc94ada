//! Shared domain types: conversations, participants, and inbound events

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Identifier of a messaging-platform space (Webex room id)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ConversationId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ConversationId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Whether a conversation is one-to-one with the bot or has several members
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationKind {
    Direct,
    Group,
}

impl ConversationKind {
    /// Map the platform's room type string ("direct" / "group")
    pub fn from_room_type(room_type: &str) -> Self {
        if room_type.eq_ignore_ascii_case("direct") {
            Self::Direct
        } else {
            Self::Group
        }
    }
}

/// A space the bot is a member of
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: ConversationId,
    pub title: String,
    pub kind: ConversationKind,
}

impl Conversation {
    pub fn new(
        id: impl Into<ConversationId>,
        title: impl Into<String>,
        kind: ConversationKind,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            kind,
        }
    }

    pub fn is_direct(&self) -> bool {
        self.kind == ConversationKind::Direct
    }
}

/// A member of a conversation. Participants are identified by email,
/// compared case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub email: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub person_id: Option<String>,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl Participant {
    pub fn new(email: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            display_name: display_name.into(),
            person_id: None,
            avatar: None,
        }
    }

    pub fn with_person_id(mut self, person_id: impl Into<String>) -> Self {
        self.person_id = Some(person_id.into());
        self
    }

    pub fn with_avatar(mut self, avatar: Option<String>) -> Self {
        self.avatar = avatar;
        self
    }

    /// Case-insensitive email comparison
    pub fn has_email(&self, email: &str) -> bool {
        self.email.eq_ignore_ascii_case(email.trim())
    }

    /// Name to show in notices, falling back to the email address
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            &self.email
        } else {
            &self.display_name
        }
    }
}

impl PartialEq for Participant {
    fn eq(&self, other: &Self) -> bool {
        self.has_email(&other.email)
    }
}

impl Eq for Participant {}

/// A text message posted to a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncomingMessage {
    pub id: String,
    pub text: String,
    pub sender: Participant,
}

/// An Action.Submit button press on a card the bot posted
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardAction {
    pub id: String,
    /// Id of the card message the button belongs to
    pub message_id: String,
    pub submitter: Participant,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(default)]
    pub created: Option<String>,
}

/// Everything the bot reacts to, already decoded from the platform
#[derive(Debug, Clone)]
pub enum BotEvent {
    /// The bot was added to a space (`added_by` set) or rediscovered an
    /// existing one (`added_by` empty)
    Spawned {
        conversation: Conversation,
        added_by: Option<Participant>,
    },
    Message {
        conversation: ConversationId,
        message: IncomingMessage,
    },
    CardAction {
        conversation: ConversationId,
        action: CardAction,
    },
    MemberJoined {
        conversation: ConversationId,
        participant: Participant,
    },
    MemberLeft {
        conversation: ConversationId,
        participant: Participant,
    },
    Despawned {
        conversation: ConversationId,
        removed_by: Option<String>,
    },
    RoomRenamed {
        conversation: ConversationId,
        title: String,
    },
}

impl BotEvent {
    pub fn conversation_id(&self) -> &ConversationId {
        match self {
            BotEvent::Spawned { conversation, .. } => &conversation.id,
            BotEvent::Message { conversation, .. }
            | BotEvent::CardAction { conversation, .. }
            | BotEvent::MemberJoined { conversation, .. }
            | BotEvent::MemberLeft { conversation, .. }
            | BotEvent::Despawned { conversation, .. }
            | BotEvent::RoomRenamed { conversation, .. } => conversation,
        }
    }

    /// Short name used in logs
    pub fn kind(&self) -> &'static str {
        match self {
            BotEvent::Spawned { .. } => "spawned",
            BotEvent::Message { .. } => "message",
            BotEvent::CardAction { .. } => "card_action",
            BotEvent::MemberJoined { .. } => "member_joined",
            BotEvent::MemberLeft { .. } => "member_left",
            BotEvent::Despawned { .. } => "despawned",
            BotEvent::RoomRenamed { .. } => "room_renamed",
        }
    }
}
