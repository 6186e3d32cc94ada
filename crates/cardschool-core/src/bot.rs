//! Event dispatcher: turns decoded platform events into gate updates,
//! lesson cards and admin notifications

use crate::config::AdminConfig;
use crate::gate::GateRegistry;
use crate::lessons::{Command, LessonNavigator, Rendered, SubmitAction, help_text};
use crate::membership::ConversationDirectory;
use crate::output::{GatedOutput, OutputGateway};
use crate::store::{StateStore, keys};
use crate::types::{
    BotEvent, CardAction, Conversation, ConversationId, IncomingMessage, Participant,
};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub const OLD_CARD_NOTICE: &str = "I do not process button clicks from old lessons. \
Scroll down to the most recent lesson card, or post any message to get me to display a new lesson.";

pub struct Bot {
    identity: Participant,
    gates: GateRegistry,
    store: Arc<dyn StateStore>,
    navigator: LessonNavigator,
    /// Ungated; only for admin notifications
    output: Arc<dyn OutputGateway>,
    directory: Arc<dyn ConversationDirectory>,
    admin: AdminConfig,
}

impl Bot {
    pub fn new(
        identity: Participant,
        gates: GateRegistry,
        store: Arc<dyn StateStore>,
        navigator: LessonNavigator,
        output: Arc<dyn OutputGateway>,
        directory: Arc<dyn ConversationDirectory>,
        admin: AdminConfig,
    ) -> Self {
        if admin.room_id.is_none() && admin.email.is_none() {
            warn!("No admin room or email configured. Will not notify anyone about bot activity");
        }
        Self {
            identity,
            gates,
            store,
            navigator,
            output,
            directory,
            admin,
        }
    }

    /// The bot's own account
    pub fn identity(&self) -> &Participant {
        &self.identity
    }

    pub fn gates(&self) -> &GateRegistry {
        &self.gates
    }

    pub fn navigator(&self) -> &LessonNavigator {
        &self.navigator
    }

    /// Handle one event. Failures are logged and contained to the event's
    /// conversation.
    pub async fn handle(&self, event: BotEvent) {
        debug!("Handling {} event for {}", event.kind(), event.conversation_id());
        match event {
            BotEvent::Spawned {
                conversation,
                added_by,
            } => self.on_spawned(conversation, added_by).await,
            BotEvent::Message {
                conversation,
                message,
            } => {
                if self.ensure_spawned(&conversation).await {
                    self.on_message(&conversation, message).await;
                }
            }
            BotEvent::CardAction {
                conversation,
                action,
            } => {
                if self.ensure_spawned(&conversation).await {
                    self.on_card_action(&conversation, action).await;
                }
            }
            BotEvent::MemberJoined {
                conversation,
                participant,
            } => {
                if participant.has_email(&self.identity.email) {
                    debug!("Ignoring our own membership in {}", conversation);
                    return;
                }
                if self.ensure_spawned(&conversation).await {
                    let change = self
                        .gates
                        .on_participant_joined(&conversation, &participant)
                        .await;
                    debug!("Join of {} in {}: {:?}", participant.label(), conversation, change);
                }
            }
            BotEvent::MemberLeft {
                conversation,
                participant,
            } => {
                if participant.has_email(&self.identity.email) {
                    self.on_despawned(&conversation, None);
                    return;
                }
                if self.ensure_spawned(&conversation).await {
                    let change = self
                        .gates
                        .on_participant_left(&conversation, &participant)
                        .await;
                    debug!("Leave of {} in {}: {:?}", participant.label(), conversation, change);
                }
            }
            BotEvent::Despawned {
                conversation,
                removed_by,
            } => self.on_despawned(&conversation, removed_by.as_deref()),
            BotEvent::RoomRenamed {
                conversation,
                title,
            } => self.on_renamed(&conversation, &title).await,
        }
    }

    async fn on_spawned(&self, conversation: Conversation, added_by: Option<Participant>) {
        let id = conversation.id.clone();
        match &added_by {
            Some(adder) => info!(
                "Our bot was added to a new room: \"{}\" by {}",
                conversation.title,
                adder.label()
            ),
            None => info!("Bot spawned in existing room: \"{}\"", conversation.title),
        }

        match self.store.load(&id).await {
            Ok(outcome) => debug!("State for {} loaded: {:?}", id, outcome),
            Err(e) => error!("Failed to load stored state for {}: {}", id, e),
        }

        let outcome = self
            .gates
            .initialize(conversation.clone(), added_by.as_ref())
            .await;
        let Some(adder) = added_by else {
            return;
        };
        if outcome.permits_output() {
            let output = self.gates.output_for(&id);
            match output.send(&help_text(self.navigator.catalog().len())).await {
                Ok(_) if !conversation.is_direct() => {
                    // 1-1 spaces get their first card in response to the user's message
                    self.render(&output, 0, Some(&adder)).await;
                }
                Ok(_) => {}
                Err(e) => error!(
                    "Error sending initial help in space \"{}\": {:#}",
                    conversation.title, e
                ),
            }
        }
        self.record_new_space(&conversation, &adder).await;
    }

    /// Store metadata about a space the bot was just added to and tell the
    /// admins about it
    async fn record_new_space(&self, conversation: &Conversation, adder: &Participant) {
        let msg = format!(
            "{} was added to a space: \"{}\" by {}",
            self.identity.label(),
            conversation.title,
            adder.label()
        );
        self.notify_admins(&msg).await;

        let id = &conversation.id;
        let entries = [
            (keys::SPACE_TITLE, Value::from(conversation.title.as_str())),
            (keys::ADDED_DATE, Value::from(Utc::now().to_rfc3339())),
            (keys::ADDED_BY, Value::from(adder.label())),
            (keys::ADDED_BY_EMAIL, Value::from(adder.email.as_str())),
        ];
        for (key, value) in entries {
            if let Err(e) = self.store.put(id, key, value).await {
                error!("During spawn, failed writing {} for {}: {}", key, id, e);
            }
        }
    }

    async fn on_message(&self, conversation: &ConversationId, message: IncomingMessage) {
        if message.sender.has_email(&self.identity.email) {
            return;
        }
        let output = self.gates.output_for(conversation);
        let count = self.navigator.catalog().len();
        let viewer = Some(&message.sender);

        match Command::parse(&message.text, count) {
            Command::Help => self.send(&output, &help_text(count)).await,
            Command::StartOver => self.render(&output, 0, viewer).await,
            Command::Lesson(index) => self.render(&output, index, viewer).await,
            Command::Unrecognized => {
                self.send(&output, &format!("Not sure how to respond to \"{}\"", message.text))
                    .await;
                self.send(&output, &help_text(count)).await;
            }
            Command::Resend => {
                let index = self.navigator.current(conversation);
                self.render(&output, index, viewer).await;
            }
        }
    }

    async fn on_card_action(&self, conversation: &ConversationId, action: CardAction) {
        debug!("Got an attachmentAction: {:?}", action);
        let output = self.gates.output_for(conversation);

        // Only the most recently displayed card is live
        match self.store.get(conversation, keys::ACTIVE_CARD_MESSAGE_ID) {
            Ok(Some(Value::String(active))) if active != action.message_id => {
                self.reply(&output, &action, OLD_CARD_NOTICE).await;
                return;
            }
            Ok(Some(Value::String(_))) => {}
            Ok(_) => warn!(
                "No active card recorded for {}. Processing button click anyway",
                conversation
            ),
            Err(e) => error!(
                "Failed to read active card for {}: {}. Will process button click and try to recover",
                conversation, e
            ),
        }

        let submitter = Some(&action.submitter);
        match SubmitAction::classify(&action.inputs) {
            SubmitAction::Navigate(index) if index < self.navigator.catalog().len() => {
                self.render(&output, index, submitter).await;
            }
            SubmitAction::Navigate(index) => {
                error!("Button in {} points at missing lesson {}", conversation, index);
            }
            SubmitAction::BadIndex { field, value } => {
                error!("Ignoring button press in {} with bad {}: {}", conversation, field, value);
            }
            SubmitAction::Feedback { lesson, text } => {
                self.on_feedback(conversation, &output, &action, lesson, &text)
                    .await;
            }
            SubmitAction::ShowCardSource { .. } => {
                self.reply(
                    &output,
                    &action,
                    "Show Card Source not implemented. Need to post or show a link",
                )
                .await;
            }
            SubmitAction::Unhandled => {
                info!("Handling a non-navigation button press with inputs {:?}", action.inputs);
                let inputs = serde_json::to_string_pretty(&action.inputs).unwrap_or_default();
                self.reply(&output, &action, &format!("Unhandled attachmentAction:\n{}", inputs))
                    .await;
            }
        }
    }

    async fn on_feedback(
        &self,
        conversation: &ConversationId,
        output: &GatedOutput,
        action: &CardAction,
        lesson: Option<usize>,
        text: &str,
    ) {
        let lesson_title = lesson
            .and_then(|i| self.navigator.catalog().get(i))
            .map(|l| l.title().to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let details = format!(
            "* User: {} - {}\n* Space: {}\n* Lesson: {}\n* Date: {}\n* feedback: {}",
            action.submitter.email,
            action.submitter.display_name,
            self.title_of(conversation),
            lesson_title,
            action.created.as_deref().unwrap_or("unknown"),
            text
        );

        if self.has_admin() {
            self.notify_admins(&format!("Feedback submitted:\n{}", details))
                .await;
            self.reply(
                output,
                action,
                &format!("Your feedback: \"{}\", has been captured. THANK YOU!", text),
            )
            .await;
        } else {
            let msg = format!("Feedback not implemented. Want to store:\n{}", details);
            self.reply(output, action, &msg).await;
        }
    }

    fn on_despawned(&self, conversation: &ConversationId, removed_by: Option<&str>) {
        self.gates.remove(conversation);
        match removed_by {
            Some(by) => info!("Bot has been removed from space {} by {}", conversation, by),
            None => info!("Bot has been removed from space {}", conversation),
        }
    }

    async fn on_renamed(&self, conversation: &ConversationId, title: &str) {
        if let Err(e) = self.store.load(conversation).await {
            warn!("Failed to load state for renamed space {}: {}", conversation, e);
            return;
        }
        let old = self.store.get(conversation, keys::SPACE_TITLE).ok().flatten();
        if old.as_ref().and_then(Value::as_str) == Some(title) {
            return;
        }
        info!("Space {} has been renamed: \"{}\"", conversation, title);
        if let Err(e) = self
            .store
            .put(conversation, keys::SPACE_TITLE, Value::from(title))
            .await
        {
            warn!("Failed to update stored title for {}: {}", conversation, e);
        }
    }

    /// Spawn conversations we see activity in but never heard about.
    /// Returns whether the event should be processed.
    async fn ensure_spawned(&self, conversation: &ConversationId) -> bool {
        if self.gates.is_registered(conversation) {
            return true;
        }
        match self.directory.conversation(conversation).await {
            Ok(found) => {
                info!(
                    "Activity in \"{}\", which we had not seen since starting",
                    found.title
                );
                self.on_spawned(found, None).await;
                self.gates.is_registered(conversation)
            }
            Err(e) => {
                error!("Failed to look up conversation {}: {:#}. Dropping event", conversation, e);
                false
            }
        }
    }

    fn title_of(&self, conversation: &ConversationId) -> String {
        if let Ok(Some(Value::String(title))) = self.store.get(conversation, keys::SPACE_TITLE) {
            return title;
        }
        self.gates
            .controller(conversation)
            .map(|c| c.conversation().title.clone())
            .unwrap_or_else(|| conversation.to_string())
    }

    fn has_admin(&self) -> bool {
        self.admin.room_id.is_some() || self.admin.email.is_some()
    }

    /// Admin notices skip the gate. The admin room wins over the admin email.
    async fn notify_admins(&self, markdown: &str) {
        let result = if let Some(room) = &self.admin.room_id {
            self.output.send(&ConversationId::new(room.as_str()), markdown).await
        } else if let Some(email) = &self.admin.email {
            self.output.direct_message(email, markdown).await
        } else {
            return;
        };
        if let Err(e) = result {
            error!("Failed to notify admins: {:#}", e);
        }
    }

    async fn render(&self, output: &GatedOutput, index: usize, viewer: Option<&Participant>) {
        match self.navigator.render(output, index, viewer).await {
            Ok(Rendered::Sent { message_id }) => {
                debug!("Lesson {} posted to {} as {}", index, output.conversation(), message_id)
            }
            Ok(other) => debug!("Lesson {} in {}: {:?}", index, output.conversation(), other),
            Err(e) => error!("Failed to render lesson in {}: {}", output.conversation(), e),
        }
    }

    async fn send(&self, output: &GatedOutput, markdown: &str) {
        if let Err(e) = output.send(markdown).await {
            error!("Failed to post to {}: {:#}", output.conversation(), e);
        }
    }

    async fn reply(&self, output: &GatedOutput, action: &CardAction, markdown: &str) {
        if let Err(e) = output.reply(&action.message_id, markdown).await {
            error!("Failed to reply in {}: {:#}", output.conversation(), e);
        }
    }
}
