//! Beta-mode gating
//!
//! Restricts the bot to conversations where at least one allow-listed user
//! is a member. Each conversation has a small state machine:
//!
//! ```text
//!            initialize (gating off)
//!   ┌────────────────────────────────▶ Ungated (terminal)
//!   │
//!   │        allow-listed member found
//!   ├────────────────────────────────▶ Active ◀──────────┐
//!   │                                   │                │ allow-listed
//!   │                 last allow-listed │                │ member joins
//!   │                    member leaves  ▼                │
//!   └────────────────────────────────▶ Suppressed ───────┘
//!            nobody allow-listed
//! ```

pub mod allow_list;
pub mod controller;
pub mod notices;
pub mod state;

pub use allow_list::{AllowList, GatePolicy};
pub use controller::{GateChange, GateController, GateOutcome, GateRegistry};
pub use state::{GatePhase, GateState};

use crate::store::{StateStore, StateStoreExt, keys};
use crate::types::ConversationId;
use tracing::warn;

/// Read a conversation's cached gate and decide whether output may go out.
///
/// A missing or unreadable gate fails open: an active conversation must
/// never go silent because of a storage hiccup.
pub fn output_allowed(store: &dyn StateStore, conversation: &ConversationId) -> bool {
    match store.get_as::<GateState>(conversation, keys::GATE_STATE) {
        Ok(Some(state)) => state.allowed(),
        Ok(None) => {
            warn!("No gate state cached for {}, allowing output", conversation);
            true
        }
        Err(e) => {
            warn!("Gate state lookup failed for {}: {}. Allowing output", conversation, e);
            true
        }
    }
}
