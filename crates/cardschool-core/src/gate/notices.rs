//! Text the gate posts on its own behalf. These bypass the gate.

use crate::types::Participant;

pub const NOT_AVAILABLE_DIRECT: &str = "I am not yet generally available and will ignore all input until I am. \
I will message this space when I become available.";

pub const NOT_AVAILABLE_GROUP: &str = "I am not yet generally available. \
I can only work in spaces that include one of my beta users, so I am leaving this space. Goodbye.";

pub const NO_VALID_USERS_LEFT: &str = "This bot is still in beta mode and no more authorized beta users \
are members of this space. I will ignore input until I go GA.";

pub const LEAVING: &str = "Since no authorized beta users remain here, I am leaving this space. Goodbye.";

pub fn now_active(participant: &Participant) -> String {
    format!(
        "Beta user {} joined the space, so I am now active. Send me a \"help\" message to see what I can do!",
        participant.label()
    )
}
