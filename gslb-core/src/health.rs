//! Process health state shared with the probe endpoints.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug)]
pub struct HealthState {
    ready: AtomicBool,
    started_at: DateTime<Utc>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    #[must_use]
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(false),
            started_at: Utc::now(),
        }
    }

    /// Flip once startup has wired every component
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Called on shutdown so load balancers stop routing here first
    pub fn mark_not_ready(&self) {
        self.ready.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn uptime_secs(&self) -> i64 {
        Utc::now().signed_duration_since(self.started_at).num_seconds()
    }
}
