//! stuck-value suppression for the power channels.
//!
//! some firmware revisions freeze on the last nonzero reading after a cable is
//! pulled. a channel that has held the same positive value for longer than its
//! threshold is reported as zero until the device reports something different.

use crate::domain::Millis;
use serde::Serialize;
use std::time::Duration;

/// last genuine change seen on one channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelWatch {
    pub last_value: i32,
    pub last_change_ms: Millis,
}

/// result of running one reading through the watchdog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    pub effective: i32,
    pub watch: ChannelWatch,
    pub stuck: bool,
}

impl ChannelWatch {
    pub fn new(value: i32, now: Millis) -> Self {
        Self { last_value: value, last_change_ms: now }
    }

    /// judge `value` against this channel's history.
    ///
    /// a forced zero leaves the returned watch untouched so the override keeps
    /// applying until the value really moves.
    pub fn apply(&self, value: i32, now: Millis, stale_after: Duration) -> Verdict {
        if value != self.last_value {
            return Verdict { effective: value, watch: ChannelWatch::new(value, now), stuck: false };
        }

        let held_for = now.saturating_sub(self.last_change_ms);
        if value > 0 && u128::from(held_for) > stale_after.as_millis() {
            return Verdict { effective: 0, watch: *self, stuck: true };
        }

        Verdict { effective: value, watch: *self, stuck: false }
    }
}
