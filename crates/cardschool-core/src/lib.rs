//! Core of the cardschool bot
//!
//! Beta-mode gating, the per-conversation state store, lesson navigation
//! and the event dispatcher. Platform adapters live in
//! `cardschool-channels`.

pub mod bot;
pub mod config;
pub mod gate;
pub mod lessons;
pub mod membership;
pub mod output;
pub mod store;
pub mod types;

// Re-export main types
pub use bot::Bot;
pub use config::Config;
pub use gate::{GateChange, GateOutcome, GatePolicy, GateRegistry, GateState, output_allowed};
pub use lessons::{LessonCatalog, LessonNavigator};
pub use membership::{ConversationDirectory, MembershipProvider};
pub use output::{GatedOutput, OutputGateway, SendReceipt};
pub use store::{CachedStore, StateStore, StateStoreExt};
pub use types::{BotEvent, Conversation, ConversationId, ConversationKind, Participant};
