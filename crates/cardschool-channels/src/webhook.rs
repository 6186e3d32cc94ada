//! Turning Webex webhook notifications into bot events
//!
//! Notifications carry ids only; [`classify`] decides what a notification
//! means without touching the network, and [`resolve`] fetches whatever
//! else the event needs.

use crate::error::ChannelError;
use crate::webex::WebexClient;
use crate::webex::models::Person;
use anyhow::Result;
use cardschool_core::types::{
    BotEvent, CardAction, Conversation, ConversationId, IncomingMessage, Participant,
};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Body Webex POSTs to the webhook target URL
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEnvelope {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub resource: String,
    pub event: String,
    #[serde(default)]
    pub actor_id: Option<String>,
    #[serde(default)]
    pub data: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventData {
    #[serde(default)]
    id: String,
    #[serde(default)]
    room_id: String,
    #[serde(default)]
    person_id: String,
    #[serde(default)]
    person_email: String,
    #[serde(default)]
    person_display_name: String,
    #[serde(default)]
    title: Option<String>,
}

/// What a notification means, before any lookups
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Fetch the message text, then dispatch it
    Message {
        room_id: String,
        message_id: String,
        person_id: String,
    },
    /// Fetch the action's inputs, then dispatch it
    CardAction {
        room_id: String,
        action_id: String,
        person_id: String,
    },
    /// The bot itself was added to a room
    BotAdded {
        room_id: String,
        actor_id: Option<String>,
    },
    BotRemoved {
        room_id: String,
        actor_id: Option<String>,
    },
    MemberJoined {
        room_id: String,
        participant: Participant,
    },
    MemberLeft {
        room_id: String,
        participant: Participant,
    },
    RoomRenamed {
        room_id: String,
        title: String,
    },
    Ignored(String),
}

impl Notification {
    /// Person whose activity triggered the notification, for rate limiting
    pub fn sender(&self) -> Option<&str> {
        match self {
            Notification::Message { person_id, .. }
            | Notification::CardAction { person_id, .. } => Some(person_id),
            _ => None,
        }
    }
}

/// Decide what a notification means. `bot_id` is the bot's person id.
pub fn classify(envelope: &WebhookEnvelope, bot_id: &str) -> Result<Notification, ChannelError> {
    let data: EventData = serde_json::from_value(envelope.data.clone()).map_err(|e| {
        ChannelError::Payload(format!("{} {}: {}", envelope.resource, envelope.event, e))
    })?;
    if data.room_id.is_empty() && envelope.resource != "rooms" {
        return Err(ChannelError::Payload(format!(
            "{} {} without a roomId",
            envelope.resource, envelope.event
        )));
    }
    let by_bot = !bot_id.is_empty() && data.person_id == bot_id;

    let notification = match (envelope.resource.as_str(), envelope.event.as_str()) {
        ("messages", "created") if by_bot => Notification::Ignored("our own message".into()),
        ("messages", "created") => Notification::Message {
            room_id: data.room_id,
            message_id: data.id,
            person_id: data.person_id,
        },
        ("attachmentActions", "created") => Notification::CardAction {
            room_id: data.room_id,
            action_id: data.id,
            person_id: data.person_id,
        },
        ("memberships", "created") if by_bot => Notification::BotAdded {
            room_id: data.room_id,
            actor_id: envelope.actor_id.clone(),
        },
        ("memberships", "deleted") if by_bot => Notification::BotRemoved {
            room_id: data.room_id,
            actor_id: envelope.actor_id.clone(),
        },
        ("memberships", event @ ("created" | "deleted")) => {
            let participant = Participant::new(data.person_email, data.person_display_name)
                .with_person_id(data.person_id);
            if event == "created" {
                Notification::MemberJoined {
                    room_id: data.room_id,
                    participant,
                }
            } else {
                Notification::MemberLeft {
                    room_id: data.room_id,
                    participant,
                }
            }
        }
        ("rooms", "updated") => match data.title {
            Some(title) => Notification::RoomRenamed {
                room_id: data.id,
                title,
            },
            None => Notification::Ignored("room update without a title".into()),
        },
        (resource, event) => Notification::Ignored(format!("{} {}", resource, event)),
    };
    Ok(notification)
}

/// Fetch whatever a notification needs and build the bot event.
/// `Ok(None)` means there is nothing to dispatch.
pub async fn resolve(
    notification: Notification,
    client: &WebexClient,
    me: &Person,
) -> Result<Option<BotEvent>> {
    let event = match notification {
        Notification::Message {
            room_id,
            message_id,
            person_id,
        } => {
            let message = client.get_message(&message_id).await?;
            let sender = lookup_participant(client, &person_id, &message.person_email).await;
            let text = strip_mention(message.text.as_deref().unwrap_or_default(), &me.display_name);
            BotEvent::Message {
                conversation: ConversationId::new(room_id),
                message: IncomingMessage {
                    id: message.id,
                    text,
                    sender,
                },
            }
        }
        Notification::CardAction {
            room_id,
            action_id,
            person_id,
        } => {
            let action = client.get_attachment_action(&action_id).await?;
            let submitter = lookup_participant(client, &person_id, "").await;
            BotEvent::CardAction {
                conversation: ConversationId::new(room_id),
                action: CardAction {
                    id: action.id,
                    message_id: action.message_id,
                    submitter,
                    inputs: action.inputs,
                    created: action.created,
                },
            }
        }
        Notification::BotAdded { room_id, actor_id } => {
            let room = client.get_room(&room_id).await?;
            let added_by = match actor_id {
                Some(actor) => Some(lookup_adder(client, &room_id, &actor).await),
                None => None,
            };
            BotEvent::Spawned {
                conversation: Conversation::from(&room),
                added_by,
            }
        }
        Notification::BotRemoved { room_id, actor_id } => BotEvent::Despawned {
            conversation: ConversationId::new(room_id),
            removed_by: actor_id,
        },
        Notification::MemberJoined {
            room_id,
            participant,
        } => BotEvent::MemberJoined {
            conversation: ConversationId::new(room_id),
            participant,
        },
        Notification::MemberLeft {
            room_id,
            participant,
        } => BotEvent::MemberLeft {
            conversation: ConversationId::new(room_id),
            participant,
        },
        Notification::RoomRenamed { room_id, title } => BotEvent::RoomRenamed {
            conversation: ConversationId::new(room_id),
            title,
        },
        Notification::Ignored(reason) => {
            debug!("Ignoring webhook: {}", reason);
            return Ok(None);
        }
    };
    Ok(Some(event))
}

/// Full person details, falling back to what the notification carried
async fn lookup_participant(client: &WebexClient, person_id: &str, email: &str) -> Participant {
    match client.get_person(person_id).await {
        Ok(person) => Participant::from(&person),
        Err(e) => {
            warn!("Failed to look up person {}: {:#}", person_id, e);
            Participant::new(email, "").with_person_id(person_id)
        }
    }
}

/// Whoever added the bot. When the lookup fails the adder is known only
/// by id, which never matches the allow-list, so the gate stays closed.
async fn lookup_adder(client: &WebexClient, room_id: &str, actor_id: &str) -> Participant {
    match client.get_person(actor_id).await {
        Ok(person) => Participant::from(&person),
        Err(e) => {
            warn!("Failed to look up who added the bot to {}: {:#}", room_id, e);
            Participant::new("", actor_id).with_person_id(actor_id)
        }
    }
}

/// Drop a leading @mention of the bot from group-space messages
pub fn strip_mention(text: &str, bot_name: &str) -> String {
    let text = text.trim();
    if bot_name.is_empty() {
        return text.to_string();
    }
    let full = bot_name.trim();
    let first = full.split_whitespace().next().unwrap_or(full);
    for candidate in [full, first] {
        let Some(prefix) = text.get(..candidate.len()) else {
            continue;
        };
        let rest = &text[candidate.len()..];
        let at_word_end = rest.is_empty() || rest.starts_with(char::is_whitespace);
        if at_word_end && prefix.eq_ignore_ascii_case(candidate) {
            return rest.trim_start().to_string();
        }
    }
    text.to_string()
}
