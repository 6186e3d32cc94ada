//! Per-conversation gate controller and the registry that routes
//! membership events to it

use super::allow_list::GatePolicy;
use super::notices;
use super::output_allowed;
use super::state::{GatePhase, GateState};
use crate::config::LeavePolicy;
use crate::membership::MembershipProvider;
use crate::output::{GatedOutput, OutputGateway};
use crate::store::{StateStore, StateStoreExt, keys};
use crate::types::{Conversation, ConversationId, Participant};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// Result of initializing a conversation's gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateOutcome {
    /// Gating is off; everything is allowed
    Ungated,
    /// An allow-listed member is present
    Active { valid_user: String },
    /// Gated and silent until an allow-listed member joins
    Suppressed,
    /// The bot asked to be removed from the conversation
    Exited,
}

impl GateOutcome {
    pub fn permits_output(&self) -> bool {
        matches!(self, GateOutcome::Ungated | GateOutcome::Active { .. })
    }

    fn from_state(state: &GateState) -> Self {
        match state.phase() {
            GatePhase::Ungated => GateOutcome::Ungated,
            GatePhase::Active => GateOutcome::Active {
                valid_user: state.valid_user().unwrap_or_default().to_string(),
            },
            GatePhase::Suppressed => GateOutcome::Suppressed,
        }
    }
}

/// What a membership event did to the gate
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateChange {
    Unchanged,
    /// Suppressed → Active
    Activated { valid_user: String },
    /// Still Active, justified by a different member
    Replaced { valid_user: String },
    /// Active → Suppressed
    Suppressed,
    /// Active → Suppressed, and the bot left the conversation
    Exited,
    /// No gate is registered for the conversation
    Unregistered,
}

/// Decides whether the bot may post in one conversation.
///
/// Every read-modify-write of the gate state runs under `lock`, so a join
/// and a leave for the same conversation can't interleave across their
/// membership lookups.
pub struct GateController {
    conversation: Conversation,
    policy: Arc<GatePolicy>,
    store: Arc<dyn StateStore>,
    members: Arc<dyn MembershipProvider>,
    /// Raw gateway; the gate's own notices are never suppressed
    output: Arc<dyn OutputGateway>,
    lock: Mutex<()>,
}

impl GateController {
    pub fn new(
        conversation: Conversation,
        policy: Arc<GatePolicy>,
        store: Arc<dyn StateStore>,
        members: Arc<dyn MembershipProvider>,
        output: Arc<dyn OutputGateway>,
    ) -> Self {
        Self {
            conversation,
            policy,
            store,
            members,
            output,
            lock: Mutex::new(()),
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    fn id(&self) -> &ConversationId {
        &self.conversation.id
    }

    /// Gated output for this conversation
    pub fn output(&self) -> GatedOutput {
        GatedOutput::new(self.id().clone(), self.store.clone(), self.output.clone())
    }

    /// Cached check consulted before every outbound call. Fails open.
    pub fn check_output(&self) -> bool {
        output_allowed(self.store.as_ref(), self.id())
    }

    /// Cached gate state, if readable
    pub fn state(&self) -> Option<GateState> {
        self.store
            .get_as::<GateState>(self.id(), keys::GATE_STATE)
            .ok()
            .flatten()
    }

    /// Decide the initial gate for a conversation the bot was added to
    /// (`added_by` set) or rediscovered (`added_by` empty).
    pub async fn initialize(&self, added_by: Option<&Participant>) -> GateOutcome {
        let _guard = self.lock.lock().await;

        if !self.policy.enabled() {
            let state = GateState::ungated();
            self.persist(&state).await;
            return GateOutcome::Ungated;
        }

        if let Some(adder) = added_by {
            if !self.policy.allow_list().contains(&adder.email) {
                info!(
                    "{} added the bot to \"{}\" but is not a beta user",
                    adder.label(),
                    self.conversation.title
                );
                if self.conversation.is_direct() {
                    self.notify(notices::NOT_AVAILABLE_DIRECT).await;
                    let state = GateState::suppressed();
                    self.persist(&state).await;
                    return GateOutcome::Suppressed;
                }
                self.notify(notices::NOT_AVAILABLE_GROUP).await;
                self.leave().await;
                return GateOutcome::Exited;
            }
        }

        let state = match self.find_valid_user(None).await {
            Some(user) => GateState::active(user),
            None => GateState::suppressed(),
        };
        self.persist(&state).await;
        GateOutcome::from_state(&state)
    }

    /// An allow-listed member joining a suppressed conversation activates it
    pub async fn on_participant_joined(&self, participant: &Participant) -> GateChange {
        let _guard = self.lock.lock().await;
        let state = self.current_state().await;

        if state.phase() != GatePhase::Suppressed {
            return GateChange::Unchanged;
        }
        let Some(user) = self.policy.allow_list().lookup(&participant.email) else {
            return GateChange::Unchanged;
        };
        let user = user.to_string();

        info!(
            "Beta user {} joined previously deactivated space \"{}\"",
            participant.label(),
            self.conversation.title
        );
        self.persist(&GateState::active(user.as_str())).await;
        self.notify(&notices::now_active(participant)).await;
        GateChange::Activated { valid_user: user }
    }

    /// The member justifying output leaving triggers a search for another
    pub async fn on_participant_left(&self, participant: &Participant) -> GateChange {
        let _guard = self.lock.lock().await;
        let state = self.current_state().await;

        if state.phase() != GatePhase::Active || !state.is_valid_user(&participant.email) {
            return GateChange::Unchanged;
        }

        debug!(
            "{} left \"{}\". Checking for other beta users...",
            participant.label(),
            self.conversation.title
        );
        if let Some(user) = self.find_valid_user(Some(participant)).await {
            info!(
                "Found another beta user {} in \"{}\"",
                user, self.conversation.title
            );
            self.persist(&GateState::active(user.as_str())).await;
            return GateChange::Replaced { valid_user: user };
        }

        info!(
            "No other beta users in \"{}\". Will deactivate",
            self.conversation.title
        );
        self.persist(&GateState::suppressed()).await;

        let exit =
            self.policy.leave_policy() == LeavePolicy::Exit && !self.conversation.is_direct();
        if exit {
            self.notify(notices::LEAVING).await;
            self.leave().await;
            GateChange::Exited
        } else {
            self.notify(notices::NO_VALID_USERS_LEFT).await;
            GateChange::Suppressed
        }
    }

    /// Cached state, recomputed from membership when missing or unreadable
    async fn current_state(&self) -> GateState {
        match self.store.get_as::<GateState>(self.id(), keys::GATE_STATE) {
            Ok(Some(state)) => state,
            other => {
                if let Err(e) = other {
                    warn!("Unreadable gate state for {}: {}. Recomputing", self.id(), e);
                } else {
                    warn!("No gate state for {}. Recomputing", self.id());
                }
                let state = if !self.policy.enabled() {
                    GateState::ungated()
                } else {
                    match self.find_valid_user(None).await {
                        Some(user) => GateState::active(user),
                        None => GateState::suppressed(),
                    }
                };
                self.persist(&state).await;
                state
            }
        }
    }

    /// First allow-listed member, ignoring `excluding`. Lookup failures
    /// count as "nobody found".
    async fn find_valid_user(&self, excluding: Option<&Participant>) -> Option<String> {
        let members = match self.members.list(self.id()).await {
            Ok(members) => members,
            Err(e) => {
                error!("Membership lookup failed for \"{}\": {:#}", self.conversation.title, e);
                return None;
            }
        };
        let members: Vec<Participant> = match excluding {
            Some(gone) => members
                .into_iter()
                .filter(|m| !m.has_email(&gone.email))
                .collect(),
            None => members,
        };
        match self.policy.allow_list().first_member(&members) {
            Some(user) => {
                debug!("\"{}\" has a beta user: {}", self.conversation.title, user);
                Some(user.to_string())
            }
            None => {
                debug!("No beta users in \"{}\"", self.conversation.title);
                None
            }
        }
    }

    async fn persist(&self, state: &GateState) {
        if let Err(e) = self.store.put_as(self.id(), keys::GATE_STATE, state).await {
            error!("Failed to store gate state for {}: {}", self.id(), e);
        }
    }

    async fn notify(&self, text: &str) {
        if let Err(e) = self.output.send(self.id(), text).await {
            error!(
                "Failed to post gate notice to \"{}\": {:#}",
                self.conversation.title, e
            );
        }
    }

    async fn leave(&self) {
        if let Err(e) = self.output.exit(self.id()).await {
            error!("Failed to leave \"{}\": {:#}", self.conversation.title, e);
        }
    }
}

/// Owns the gate controllers of every known conversation and routes
/// membership events to them
pub struct GateRegistry {
    policy: Arc<GatePolicy>,
    store: Arc<dyn StateStore>,
    members: Arc<dyn MembershipProvider>,
    output: Arc<dyn OutputGateway>,
    controllers: DashMap<ConversationId, Arc<GateController>>,
}

impl GateRegistry {
    pub fn new(
        policy: GatePolicy,
        store: Arc<dyn StateStore>,
        members: Arc<dyn MembershipProvider>,
        output: Arc<dyn OutputGateway>,
    ) -> Self {
        Self {
            policy: Arc::new(policy),
            store,
            members,
            output,
            controllers: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &GatePolicy {
        &self.policy
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    pub fn is_registered(&self, conversation: &ConversationId) -> bool {
        self.controllers.contains_key(conversation)
    }

    pub fn controller(&self, conversation: &ConversationId) -> Option<Arc<GateController>> {
        self.controllers.get(conversation).map(|c| Arc::clone(c.value()))
    }

    /// Initialize the gate for a conversation and register it for
    /// membership events. Conversations the bot exits are not registered.
    pub async fn initialize(
        &self,
        conversation: Conversation,
        added_by: Option<&Participant>,
    ) -> GateOutcome {
        let id = conversation.id.clone();
        // Reuse an existing controller so its lock keeps serializing events
        let controller = self
            .controllers
            .entry(id.clone())
            .or_insert_with(|| {
                Arc::new(GateController::new(
                    conversation,
                    self.policy.clone(),
                    self.store.clone(),
                    self.members.clone(),
                    self.output.clone(),
                ))
            })
            .clone();

        let outcome = controller.initialize(added_by).await;
        if outcome == GateOutcome::Exited {
            self.controllers.remove(&id);
        }
        debug!("Gate for {} initialized: {:?}", id, outcome);
        outcome
    }

    pub async fn on_participant_joined(
        &self,
        conversation: &ConversationId,
        participant: &Participant,
    ) -> GateChange {
        match self.controller(conversation) {
            Some(controller) => controller.on_participant_joined(participant).await,
            None => {
                debug!("Ignoring join in unregistered conversation {}", conversation);
                GateChange::Unregistered
            }
        }
    }

    pub async fn on_participant_left(
        &self,
        conversation: &ConversationId,
        participant: &Participant,
    ) -> GateChange {
        let Some(controller) = self.controller(conversation) else {
            debug!("Ignoring leave in unregistered conversation {}", conversation);
            return GateChange::Unregistered;
        };
        let change = controller.on_participant_left(participant).await;
        if change == GateChange::Exited {
            self.controllers.remove(conversation);
        }
        change
    }

    /// Forget a conversation the bot is no longer part of
    pub fn remove(&self, conversation: &ConversationId) -> bool {
        self.controllers.remove(conversation).is_some()
    }

    /// Gated output for any conversation, registered or not
    pub fn output_for(&self, conversation: &ConversationId) -> GatedOutput {
        GatedOutput::new(conversation.clone(), self.store.clone(), self.output.clone())
    }

    pub fn check_output(&self, conversation: &ConversationId) -> bool {
        output_allowed(self.store.as_ref(), conversation)
    }
}
