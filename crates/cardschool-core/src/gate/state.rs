//! Per-conversation gate state and its invariants

use serde::{Deserialize, Serialize};

/// Whether the bot may post in a conversation, and why.
///
/// The fields are kept consistent by construction:
/// - gating disabled ⇒ output allowed
/// - gating enabled ⇒ output allowed iff a valid user is recorded
///
/// Deserialization repairs records that break these rules, so a stored
/// `{enabled: true, allowed: true, validUser: ""}` reads back suppressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawGateState", into = "RawGateState")]
pub struct GateState {
    enabled: bool,
    allowed: bool,
    valid_user: String,
}

/// The three states of the gate state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatePhase {
    /// Gating disabled for this conversation; terminal
    Ungated,
    /// An allow-listed member is present
    Active,
    /// No allow-listed member; output is dropped
    Suppressed,
}

impl GateState {
    /// Gating bypassed entirely
    pub fn ungated() -> Self {
        Self {
            enabled: false,
            allowed: true,
            valid_user: String::new(),
        }
    }

    /// Gated and justified by `valid_user`. An empty user yields a
    /// suppressed state.
    pub fn active(valid_user: impl Into<String>) -> Self {
        let valid_user = valid_user.into().trim().to_string();
        Self {
            enabled: true,
            allowed: !valid_user.is_empty(),
            valid_user,
        }
    }

    /// Gated with no allow-listed member present
    pub fn suppressed() -> Self {
        Self {
            enabled: true,
            allowed: false,
            valid_user: String::new(),
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn allowed(&self) -> bool {
        self.allowed
    }

    /// The allow-listed member currently justifying output, if any
    pub fn valid_user(&self) -> Option<&str> {
        if self.valid_user.is_empty() {
            None
        } else {
            Some(&self.valid_user)
        }
    }

    pub fn phase(&self) -> GatePhase {
        match (self.enabled, self.allowed) {
            (false, _) => GatePhase::Ungated,
            (true, true) => GatePhase::Active,
            (true, false) => GatePhase::Suppressed,
        }
    }

    /// Whether `email` is the member currently justifying output
    pub fn is_valid_user(&self, email: &str) -> bool {
        !self.valid_user.is_empty() && self.valid_user.eq_ignore_ascii_case(email.trim())
    }
}

/// Stored shape, shared with the records the bot wrote before the state
/// machine existed (`validUser` was `false` when nobody matched).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGateState {
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    allowed: bool,
    #[serde(default, deserialize_with = "string_or_false")]
    valid_user: String,
}

fn string_or_false<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::String(s) => s,
        _ => String::new(),
    })
}

impl From<RawGateState> for GateState {
    fn from(raw: RawGateState) -> Self {
        if raw.enabled {
            GateState::active(raw.valid_user)
        } else {
            GateState::ungated()
        }
    }
}

impl From<GateState> for RawGateState {
    fn from(state: GateState) -> Self {
        RawGateState {
            enabled: state.enabled,
            allowed: state.allowed,
            valid_user: state.valid_user,
        }
    }
}
