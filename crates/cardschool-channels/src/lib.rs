//! Webex adapter for cardschool
//!
//! This crate provides the REST client that implements the core's
//! membership, directory and output traits, plus webhook decoding.

pub mod error;
pub mod rate_limit;
pub mod webex;
pub mod webhook;

// Re-export main types
pub use error::ChannelError;
pub use rate_limit::RateLimiter;
pub use webex::WebexClient;
pub use webhook::{Notification, WebhookEnvelope, classify, resolve};
