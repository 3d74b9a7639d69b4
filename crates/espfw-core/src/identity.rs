//! App instance ID negotiation.
//!
//! Several devices can run the same app. Each one claims a small integer
//! instance ID the first time it joins the broker: it listens to the
//! presence topics of its siblings for a while, then takes one more than
//! the highest ID it heard. The claimed ID is persisted and the device
//! restarts into normal operation.

use std::time::Duration;
use tracing::debug;

/// How long a new device listens for sibling IDs before claiming one.
pub const INSTANCE_ID_WAIT: Duration = Duration::from_secs(10);

/// Collects sibling instance IDs seen on presence topics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceIdNegotiator {
    max_seen: i32,
}

impl Default for InstanceIdNegotiator {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceIdNegotiator {
    pub fn new() -> Self {
        Self { max_seen: -1 }
    }

    /// Record the payload of an `{app}/online` or `{app}/offline` message.
    ///
    /// Returns the ID when the payload held a usable one.
    pub fn observe(&mut self, payload: &str) -> Option<i32> {
        let index = payload.trim().parse::<i32>().ok().filter(|i| *i >= 0)?;
        self.max_seen = self.max_seen.max(index);
        debug!("Sibling instance {} seen, highest {}", index, self.max_seen);
        Some(index)
    }

    /// Highest sibling ID heard so far, -1 if none.
    pub fn max_seen(&self) -> i32 {
        self.max_seen
    }

    /// The ID this device should take.
    pub fn claim(&self) -> i32 {
        self.max_seen.saturating_add(1)
    }
}

/// Payload announcing an instance ID on the presence topics.
pub fn presence_payload(instance_id: i32) -> String {
    instance_id.to_string()
}
