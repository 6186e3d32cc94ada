//! Per-person throttling of webhook intake
//!
//! Every message or button press makes the bot post a card, so one person
//! hammering a space turns into a burst of API calls. Notifications over
//! the limit are dropped before any lookups happen.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Sliding-window limiter keyed by person id
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<DashMap<String, VecDeque<Instant>>>,
    max_events: usize,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_events: usize, window: Duration) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            max_events,
            window,
        }
    }

    /// Record an event from `person` and say whether to process it.
    /// A limit of zero disables throttling.
    pub fn allow(&self, person: &str) -> bool {
        if self.max_events == 0 {
            return true;
        }
        let now = Instant::now();
        let mut entry = self.windows.entry(person.to_string()).or_default();
        let times = entry.value_mut();
        while times
            .front()
            .is_some_and(|&t| now.duration_since(t) >= self.window)
        {
            times.pop_front();
        }

        if times.len() >= self.max_events {
            warn!(
                "Dropping event from {}: {} events in the last {:?} (limit {})",
                person,
                times.len(),
                self.window,
                self.max_events
            );
            return false;
        }
        times.push_back(now);
        true
    }

    /// Forget people with no events inside the window
    pub fn prune(&self) {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, times| {
            times
                .back()
                .is_some_and(|&t| now.duration_since(t) < self.window)
        });
        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            debug!("Pruned {} idle rate limit windows", removed);
        }
    }

    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}
