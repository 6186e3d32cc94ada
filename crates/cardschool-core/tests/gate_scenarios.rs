mod common;

use async_trait::async_trait;
use cardschool_core::config::{GateConfig, LeavePolicy};
use cardschool_core::gate::{
    GateChange, GateOutcome, GatePhase, GatePolicy, GateRegistry, GateState, notices,
};
use cardschool_core::output_allowed;
use cardschool_core::store::{
    CachedStore, LoadOutcome, StateStore, StateStoreExt, StoreError, keys,
};
use cardschool_core::types::{ConversationId, Participant};
use common::{FakeMembers, RecordingOutput, Sent, direct, group, loaded, memory_store, person};
use serde_json::Value;
use std::sync::Arc;

fn policy(users: &[&str], leave: LeavePolicy) -> GatePolicy {
    GatePolicy::from_config(&GateConfig {
        enabled: true,
        allowed_users: users.iter().map(|u| u.to_string()).collect(),
        exclusive_mode: false,
        on_last_valid_user_left: leave,
    })
}

struct Harness {
    registry: Arc<GateRegistry>,
    store: Arc<CachedStore>,
    members: Arc<FakeMembers>,
    output: Arc<RecordingOutput>,
}

impl Harness {
    fn new(policy: GatePolicy) -> Self {
        let store = memory_store();
        let members = Arc::new(FakeMembers::default());
        let output = Arc::new(RecordingOutput::default());
        let registry = Arc::new(GateRegistry::new(
            policy,
            store.clone(),
            members.clone(),
            output.clone(),
        ));
        Self {
            registry,
            store,
            members,
            output,
        }
    }

    fn state(&self, conversation: &str) -> GateState {
        self.store
            .get_as::<GateState>(&ConversationId::new(conversation), keys::GATE_STATE)
            .unwrap()
            .unwrap()
    }

    fn allowed(&self, conversation: &str) -> bool {
        self.registry.check_output(&ConversationId::new(conversation))
    }
}

fn assert_invariants(state: &GateState) {
    if !state.enabled() {
        assert!(state.allowed());
    } else {
        assert_eq!(state.allowed(), state.valid_user().is_some());
    }
}

#[tokio::test]
async fn scenario_a_allow_listed_member_present() {
    let h = Harness::new(policy(&["a@x.com"], LeavePolicy::Idle));
    h.members.set("room", &["a@x.com", "b@x.com"]);
    loaded(&h.store, "room").await;

    let outcome = h.registry.initialize(group("room"), None).await;

    assert_eq!(outcome, GateOutcome::Active { valid_user: "a@x.com".into() });
    let state = h.state("room");
    assert!(state.allowed());
    assert_eq!(state.valid_user(), Some("a@x.com"));
    assert!(h.allowed("room"));
    assert!(h.registry.is_registered(&ConversationId::new("room")));
    assert!(h.output.sent().is_empty());
}

#[tokio::test]
async fn scenario_b_added_by_outsider_to_group_exits() {
    let h = Harness::new(policy(&["a@x.com"], LeavePolicy::Idle));
    h.members.set("room", &["b@x.com", "c@x.com"]);
    loaded(&h.store, "room").await;

    let outcome = h
        .registry
        .initialize(group("room"), Some(&person("b@x.com")))
        .await;

    assert_eq!(outcome, GateOutcome::Exited);
    assert!(!outcome.permits_output());
    assert_eq!(h.output.texts("room"), vec![notices::NOT_AVAILABLE_GROUP.to_string()]);
    assert!(h.output.exited("room"));
    assert!(!h.registry.is_registered(&ConversationId::new("room")));
    // Never consulted membership: the adder alone decided
    assert_eq!(h.members.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn adder_known_only_by_id_is_treated_as_outsider() {
    let h = Harness::new(policy(&["a@x.com"], LeavePolicy::Idle));
    h.members.set("room", &["a@x.com", "b@x.com"]);
    loaded(&h.store, "room").await;

    let unknown = Participant::new("", "actor-1").with_person_id("actor-1");
    let outcome = h.registry.initialize(group("room"), Some(&unknown)).await;

    assert_eq!(outcome, GateOutcome::Exited);
    assert!(h.output.exited("room"));
}

#[tokio::test]
async fn added_by_outsider_to_direct_stays_silent() {
    let h = Harness::new(policy(&["a@x.com"], LeavePolicy::Exit));
    h.members.set("dm", &["b@x.com"]);
    loaded(&h.store, "dm").await;

    let outcome = h
        .registry
        .initialize(direct("dm"), Some(&person("b@x.com")))
        .await;

    assert_eq!(outcome, GateOutcome::Suppressed);
    assert_eq!(h.output.texts("dm"), vec![notices::NOT_AVAILABLE_DIRECT.to_string()]);
    assert!(!h.output.exited("dm"));
    assert!(!h.allowed("dm"));
    assert_eq!(h.state("dm").phase(), GatePhase::Suppressed);
}

#[tokio::test]
async fn scenario_c_last_valid_user_leaves() {
    let h = Harness::new(policy(&["a@x.com"], LeavePolicy::Idle));
    h.members.set("room", &["a@x.com", "b@x.com"]);
    loaded(&h.store, "room").await;
    h.registry.initialize(group("room"), None).await;

    h.members.remove("room", "a@x.com");
    let change = h
        .registry
        .on_participant_left(&ConversationId::new("room"), &person("a@x.com"))
        .await;

    assert_eq!(change, GateChange::Suppressed);
    let state = h.state("room");
    assert!(!state.allowed());
    assert_eq!(state.valid_user(), None);
    assert!(!h.allowed("room"));
    assert_eq!(h.output.texts("room"), vec![notices::NO_VALID_USERS_LEFT.to_string()]);
    assert!(!h.output.exited("room"));
}

#[tokio::test]
async fn scenario_d_valid_user_rejoins() {
    let h = Harness::new(policy(&["a@x.com"], LeavePolicy::Idle));
    let room = ConversationId::new("room");
    h.members.set("room", &["a@x.com", "b@x.com"]);
    loaded(&h.store, "room").await;
    h.registry.initialize(group("room"), None).await;
    h.members.remove("room", "a@x.com");
    h.registry.on_participant_left(&room, &person("a@x.com")).await;
    h.output.clear();

    h.members.add("room", "a@x.com");
    let change = h.registry.on_participant_joined(&room, &person("a@x.com")).await;
    assert_eq!(change, GateChange::Activated { valid_user: "a@x.com".into() });
    assert!(h.allowed("room"));
    assert_eq!(h.state("room").valid_user(), Some("a@x.com"));

    // A second join event for the same user changes nothing
    let again = h.registry.on_participant_joined(&room, &person("a@x.com")).await;
    assert_eq!(again, GateChange::Unchanged);

    let texts = h.output.texts("room");
    assert_eq!(texts.len(), 1);
    assert!(texts[0].starts_with("Beta user a joined the space"));
}

/// A store whose reads always fail
struct FailingStore;

#[async_trait]
impl StateStore for FailingStore {
    async fn load(&self, _: &ConversationId) -> Result<LoadOutcome, StoreError> {
        Err(StoreError::Backend("down".into()))
    }

    fn get(&self, _: &ConversationId, _: &str) -> Result<Option<Value>, StoreError> {
        Err(StoreError::Backend("down".into()))
    }

    async fn put(&self, _: &ConversationId, _: &str, _: Value) -> Result<(), StoreError> {
        Err(StoreError::Backend("down".into()))
    }

    async fn forget(&self, _: &ConversationId, _: Option<&str>) -> Result<(), StoreError> {
        Err(StoreError::Backend("down".into()))
    }

    async fn conversations(&self) -> Result<Vec<ConversationId>, StoreError> {
        Err(StoreError::Backend("down".into()))
    }
}

#[tokio::test]
async fn scenario_e_store_failure_fails_open() {
    assert!(output_allowed(&FailingStore, &ConversationId::new("room")));

    // Never-loaded conversations are a store error too
    let store = memory_store();
    assert!(output_allowed(store.as_ref(), &ConversationId::new("unknown")));
}

#[tokio::test]
async fn replacement_valid_user_keeps_output() {
    let h = Harness::new(policy(&["a@x.com", "c@x.com"], LeavePolicy::Exit));
    let room = ConversationId::new("room");
    h.members.set("room", &["b@x.com", "c@x.com", "a@x.com"]);
    loaded(&h.store, "room").await;

    // Allow-list order wins over membership order
    let outcome = h.registry.initialize(group("room"), None).await;
    assert_eq!(outcome, GateOutcome::Active { valid_user: "a@x.com".into() });

    h.members.remove("room", "a@x.com");
    let change = h.registry.on_participant_left(&room, &person("A@X.com")).await;
    assert_eq!(change, GateChange::Replaced { valid_user: "c@x.com".into() });
    assert!(h.allowed("room"));
    assert!(h.output.sent().is_empty());

    // Someone other than the valid user leaving is ignored
    let change = h.registry.on_participant_left(&room, &person("b@x.com")).await;
    assert_eq!(change, GateChange::Unchanged);
}

#[tokio::test]
async fn leave_with_exit_policy_leaves_group() {
    let h = Harness::new(policy(&["a@x.com"], LeavePolicy::Exit));
    let room = ConversationId::new("room");
    h.members.set("room", &["a@x.com", "b@x.com"]);
    loaded(&h.store, "room").await;
    h.registry.initialize(group("room"), None).await;

    h.members.remove("room", "a@x.com");
    let change = h.registry.on_participant_left(&room, &person("a@x.com")).await;

    assert_eq!(change, GateChange::Exited);
    assert_eq!(
        h.output.sent(),
        vec![
            Sent::Text { conversation: "room".into(), text: notices::LEAVING.into() },
            Sent::Exit { conversation: "room".into() },
        ]
    );
    assert!(!h.registry.is_registered(&room));
    assert!(!h.allowed("room"));
}

#[tokio::test]
async fn membership_failure_means_no_match() {
    let h = Harness::new(policy(&["a@x.com"], LeavePolicy::Idle));
    h.members.set("room", &["a@x.com"]);
    h.members.fail(true);
    loaded(&h.store, "room").await;

    let outcome = h.registry.initialize(group("room"), None).await;
    assert_eq!(outcome, GateOutcome::Suppressed);
    assert!(!h.allowed("room"));
}

#[tokio::test]
async fn gating_disabled_always_allows() {
    let h = Harness::new(GatePolicy::disabled());
    h.members.set("room", &["nobody@x.com"]);
    loaded(&h.store, "room").await;

    let outcome = h
        .registry
        .initialize(group("room"), Some(&person("nobody@x.com")))
        .await;
    assert_eq!(outcome, GateOutcome::Ungated);
    assert!(h.allowed("room"));
    assert_eq!(h.state("room"), GateState::ungated());

    let room = ConversationId::new("room");
    h.registry.on_participant_left(&room, &person("nobody@x.com")).await;
    h.registry.on_participant_joined(&room, &person("x@x.com")).await;
    assert!(h.allowed("room"));
    assert!(h.output.sent().is_empty());
}

#[tokio::test]
async fn empty_allow_list_disables_gating() {
    let policy = policy(&[], LeavePolicy::Idle);
    assert!(!policy.enabled());

    let h = Harness::new(policy);
    h.members.set("room", &["b@x.com"]);
    loaded(&h.store, "room").await;
    assert_eq!(h.registry.initialize(group("room"), None).await, GateOutcome::Ungated);
    assert!(h.allowed("room"));
}

#[tokio::test]
async fn initialize_is_idempotent() {
    let h = Harness::new(policy(&["a@x.com"], LeavePolicy::Idle));
    h.members.set("room", &["b@x.com", "a@x.com"]);
    loaded(&h.store, "room").await;

    let first = h.registry.initialize(group("room"), None).await;
    let state = h.state("room");
    let second = h.registry.initialize(group("room"), None).await;

    assert_eq!(first, second);
    assert_eq!(state, h.state("room"));
    assert_eq!(h.registry.len(), 1);
    assert_invariants(&state);
}

#[tokio::test]
async fn invariants_hold_through_transitions() {
    let h = Harness::new(policy(&["a@x.com", "c@x.com"], LeavePolicy::Idle));
    let room = ConversationId::new("room");
    h.members.set("room", &["b@x.com"]);
    loaded(&h.store, "room").await;

    h.registry.initialize(group("room"), None).await;
    assert_invariants(&h.state("room"));

    let steps: [(&str, bool); 5] = [
        ("a@x.com", true),
        ("c@x.com", true),
        ("a@x.com", false),
        ("c@x.com", false),
        ("b@x.com", false),
    ];
    for (email, joined) in steps {
        if joined {
            h.members.add("room", email);
            h.registry.on_participant_joined(&room, &person(email)).await;
        } else {
            h.members.remove("room", email);
            h.registry.on_participant_left(&room, &person(email)).await;
        }
        let state = h.state("room");
        assert_invariants(&state);
        assert_eq!(state.allowed(), h.allowed("room"));
    }
    assert!(!h.allowed("room"));
}

#[tokio::test]
async fn join_during_leave_lookup_is_not_lost() {
    let h = Harness::new(policy(&["a@x.com", "b@x.com"], LeavePolicy::Idle));
    let room = ConversationId::new("room");
    h.members.set("room", &["a@x.com"]);
    loaded(&h.store, "room").await;
    h.registry.initialize(group("room"), None).await;

    // The leave's membership lookup is slow and predates b's arrival
    h.members.remove("room", "a@x.com");
    h.members.delay(50);
    let leave = {
        let registry = h.registry.clone();
        let room = room.clone();
        tokio::spawn(async move { registry.on_participant_left(&room, &person("a@x.com")).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    h.members.add("room", "b@x.com");
    let join = {
        let registry = h.registry.clone();
        let room = room.clone();
        tokio::spawn(async move { registry.on_participant_joined(&room, &person("b@x.com")).await })
    };

    assert_eq!(leave.await.unwrap(), GateChange::Suppressed);
    assert_eq!(join.await.unwrap(), GateChange::Activated { valid_user: "b@x.com".into() });
    assert!(h.allowed("room"));
    assert_eq!(h.state("room").valid_user(), Some("b@x.com"));
}

#[tokio::test]
async fn events_for_unknown_conversations_are_ignored() {
    let h = Harness::new(policy(&["a@x.com"], LeavePolicy::Idle));
    let room = ConversationId::new("nowhere");
    assert_eq!(
        h.registry.on_participant_joined(&room, &person("a@x.com")).await,
        GateChange::Unregistered
    );
    assert_eq!(
        h.registry.on_participant_left(&room, &person("a@x.com")).await,
        GateChange::Unregistered
    );
}

#[tokio::test]
async fn gated_output_drops_suppressed_sends() {
    let h = Harness::new(policy(&["a@x.com"], LeavePolicy::Idle));
    h.members.set("room", &["b@x.com"]);
    loaded(&h.store, "room").await;
    h.registry.initialize(group("room"), None).await;

    let output = h.registry.output_for(&ConversationId::new("room"));
    let receipt = output.send("hello").await.unwrap();
    assert_eq!(receipt, cardschool_core::SendReceipt::Suppressed);
    let receipt = output
        .send_card(&serde_json::json!({"type": "AdaptiveCard"}), "fallback")
        .await
        .unwrap();
    assert_eq!(receipt.message_id(), None);
    assert!(h.output.sent().is_empty());
}
