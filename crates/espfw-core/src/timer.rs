//! One-shot framework timers.
//!
//! The framework keeps a handful of named one-shot timers. They are polled
//! from the main loop; nothing here spawns threads.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::debug;

/// Timers used by the framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    MqttReconnect,
    WifiReconnect,
    CheckFirmwareUpdate,
    InstanceIdWait,
}

impl TimerKind {
    /// Delay between starting the timer and it firing.
    pub fn delay(&self) -> Duration {
        match self {
            TimerKind::MqttReconnect | TimerKind::WifiReconnect => Duration::from_secs(2),
            TimerKind::CheckFirmwareUpdate => Duration::from_secs(5),
            TimerKind::InstanceIdWait => crate::identity::INSTANCE_ID_WAIT,
        }
    }
}

/// Armed one-shot timers and their deadlines.
#[derive(Debug, Default)]
pub struct TimerQueue {
    deadlines: HashMap<TimerKind, Instant>,
}

impl TimerQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm `kind` to fire after its delay. A running timer is re-armed.
    pub fn start(&mut self, kind: TimerKind, now: Instant) {
        debug!("Timer {:?} armed for {:?}", kind, kind.delay());
        self.deadlines.insert(kind, now + kind.delay());
    }

    /// Disarm `kind`. Stopping an idle timer does nothing.
    pub fn stop(&mut self, kind: TimerKind) {
        self.deadlines.remove(&kind);
    }

    pub fn is_running(&self, kind: TimerKind) -> bool {
        self.deadlines.contains_key(&kind)
    }

    /// Remove and return every timer whose deadline has passed.
    pub fn poll(&mut self, now: Instant) -> Vec<TimerKind> {
        let mut due: Vec<TimerKind> = self
            .deadlines
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(kind, _)| *kind)
            .collect();
        due.sort();
        for kind in &due {
            self.deadlines.remove(kind);
        }
        due
    }
}
