//! The beta-user allow-list and the policy derived from configuration

use crate::config::{GateConfig, LeavePolicy};
use crate::types::Participant;
use tracing::warn;

/// Emails allowed to activate the bot, normalized to lowercase and kept in
/// configuration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    users: Vec<String>,
}

impl AllowList {
    pub fn new<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized: Vec<String> = Vec::new();
        for user in users {
            // Same folding as Participant::has_email
            let user = user.as_ref().trim().to_ascii_lowercase();
            if !user.is_empty() && !normalized.contains(&user) {
                normalized.push(user);
            }
        }
        Self { users: normalized }
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// The normalized allow-list entry for `email`, if listed
    pub fn lookup(&self, email: &str) -> Option<&str> {
        let email = email.trim();
        self.users
            .iter()
            .find(|u| u.eq_ignore_ascii_case(email))
            .map(String::as_str)
    }

    pub fn contains(&self, email: &str) -> bool {
        self.lookup(email).is_some()
    }

    /// First allow-list entry (in configuration order) that is a member.
    ///
    /// Walking the allow-list rather than the member list keeps the answer
    /// stable no matter how the platform orders memberships.
    pub fn first_member<'a>(&'a self, members: &[Participant]) -> Option<&'a str> {
        self.users
            .iter()
            .find(|user| members.iter().any(|m| m.has_email(user)))
            .map(String::as_str)
    }
}

/// Gate behavior for the whole process
#[derive(Debug, Clone)]
pub struct GatePolicy {
    enabled: bool,
    allow_list: AllowList,
    leave_policy: LeavePolicy,
}

impl GatePolicy {
    /// Build the policy, degrading to "disabled" when gating is requested
    /// without anyone to allow.
    pub fn from_config(config: &GateConfig) -> Self {
        let allow_list = AllowList::new(&config.allowed_users);
        let mut enabled = config.enabled;
        if enabled && allow_list.is_empty() {
            warn!("Gating was enabled, but no allowed users were supplied. Bot will work in all spaces");
            enabled = false;
        }
        if config.exclusive_mode {
            warn!("gate.exclusive_mode is reserved and not implemented; ignoring it");
        }
        Self {
            enabled,
            allow_list,
            leave_policy: config.on_last_valid_user_left,
        }
    }

    /// Gating off: every conversation is ungated
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            allow_list: AllowList::default(),
            leave_policy: LeavePolicy::Idle,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn allow_list(&self) -> &AllowList {
        &self.allow_list
    }

    pub fn leave_policy(&self) -> LeavePolicy {
        self.leave_policy
    }
}
