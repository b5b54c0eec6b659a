use crate::config::PollingConfig;
use crate::domain::DecodedState;
use std::time::Duration;

/// picks the delay before the next device poll from the last cycle's outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollScheduler {
    active: Duration,
    idle: Duration,
    offline: Duration,
}

impl PollScheduler {
    pub fn new(active: Duration, idle: Duration, offline: Duration) -> Self {
        Self { active, idle, offline }
    }

    pub fn from_config(cfg: &PollingConfig) -> Self {
        Self::new(
            Duration::from_secs(cfg.active_interval_seconds),
            Duration::from_secs(cfg.idle_interval_seconds),
            Duration::from_secs(cfg.offline_backoff_seconds),
        )
    }

    pub fn next_delay(&self, decoded: &DecodedState, device_reachable: bool) -> Duration {
        if !device_reachable {
            self.offline
        } else if decoded.input_watts > 0 || decoded.output_watts > 0 {
            self.active
        } else {
            self.idle
        }
    }
}
