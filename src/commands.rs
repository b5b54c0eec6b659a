//! ==============================================================================
//! commands.rs - single-slot pending mode command
//! ==============================================================================
//!
//! purpose:
//!     the ui records "switch to fast/slow" instantly; the poller applies it
//!     on a later cycle once it has a confirmed reading. one slot, last write
//!     wins, and anything older than the ttl is dropped unexecuted.
//!
//! relationships:
//!     - wrapped by: store.rs (own mutex, independent of the telemetry lock)
//!     - drained by: poller.rs
//!
//! ==============================================================================

use crate::domain::{DecodedState, Millis};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PendingCommand {
    pub desired_fast_mode: bool,
    pub created_at_ms: Millis,
}

impl PendingCommand {
    pub fn age_ms(&self, now: Millis) -> Millis {
        now.saturating_sub(self.created_at_ms)
    }

    pub fn is_expired(&self, now: Millis, ttl: Duration) -> bool {
        u128::from(self.age_ms(now)) >= ttl.as_millis()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CommandOutcome {
    /// nothing queued
    NoOp,
    /// older than the ttl; dropped without being sent
    Expired,
    /// device already in the desired mode; dropped without being sent
    Skipped,
    /// sent and acknowledged; slot cleared
    Applied,
    /// sent and rejected (or the call failed); kept for the next cycle
    Failed,
}

/// what to do with the slot's content given the confirmed state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Plan {
    Idle,
    Expire(PendingCommand),
    Skip(PendingCommand),
    Issue(PendingCommand),
}

pub fn plan(
    pending: Option<PendingCommand>,
    confirmed: &DecodedState,
    now: Millis,
    ttl: Duration,
) -> Plan {
    match pending {
        None => Plan::Idle,
        Some(cmd) if cmd.is_expired(now, ttl) => Plan::Expire(cmd),
        Some(cmd) if cmd.desired_fast_mode == confirmed.fast_mode => Plan::Skip(cmd),
        Some(cmd) => Plan::Issue(cmd),
    }
}

#[derive(Debug, Default)]
pub struct CommandQueue {
    slot: Option<PendingCommand>,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, desired_fast_mode: bool, now: Millis) -> PendingCommand {
        let cmd = PendingCommand { desired_fast_mode, created_at_ms: now };
        self.slot = Some(cmd);
        cmd
    }

    pub fn peek(&self) -> Option<PendingCommand> {
        self.slot
    }

    pub fn clear(&mut self) -> Option<PendingCommand> {
        self.slot.take()
    }

    /// clear only if the slot still holds `cmd`; a newer enqueue survives
    pub fn clear_if(&mut self, cmd: &PendingCommand) -> bool {
        if self.slot.as_ref() == Some(cmd) {
            self.slot = None;
            true
        } else {
            false
        }
    }

    /// synchronous drain; `apply` returns whether the device accepted the mode
    pub fn try_apply<F>(
        &mut self,
        confirmed: &DecodedState,
        now: Millis,
        ttl: Duration,
        apply: F,
    ) -> CommandOutcome
    where
        F: FnOnce(bool) -> bool,
    {
        match plan(self.slot, confirmed, now, ttl) {
            Plan::Idle => CommandOutcome::NoOp,
            Plan::Expire(_) => {
                self.slot = None;
                CommandOutcome::Expired
            }
            Plan::Skip(_) => {
                self.slot = None;
                CommandOutcome::Skipped
            }
            Plan::Issue(cmd) => {
                if apply(cmd.desired_fast_mode) {
                    self.slot = None;
                    CommandOutcome::Applied
                } else {
                    CommandOutcome::Failed
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(300);

    fn state(fast_mode: bool) -> DecodedState {
        DecodedState { fast_mode, ..DecodedState::default() }
    }

    #[test]
    fn empty_slot_is_noop() {
        let mut q = CommandQueue::new();
        let outcome = q.try_apply(&state(true), 0, TTL, |_| panic!("must not be called"));
        assert_eq!(outcome, CommandOutcome::NoOp);
    }

    #[test]
    fn last_enqueue_wins() {
        let mut q = CommandQueue::new();
        q.enqueue(true, 1_000);
        q.enqueue(false, 2_000);
        assert_eq!(
            q.peek(),
            Some(PendingCommand { desired_fast_mode: false, created_at_ms: 2_000 })
        );
    }

    #[test]
    fn already_converged_is_skipped() {
        let mut q = CommandQueue::new();
        q.enqueue(true, 1_000);
        let outcome = q.try_apply(&state(true), 1_000, TTL, |_| panic!("must not be called"));
        assert_eq!(outcome, CommandOutcome::Skipped);
        assert_eq!(q.peek(), None);
    }

    #[test]
    fn expired_is_dropped_without_sending() {
        let mut q = CommandQueue::new();
        q.enqueue(true, 1_000);
        let mut called = false;
        let outcome = q.try_apply(&state(false), 1_000 + 300_000, TTL, |_| {
            called = true;
            true
        });
        assert_eq!(outcome, CommandOutcome::Expired);
        assert!(!called);
        assert_eq!(q.peek(), None);
    }

    #[test]
    fn failure_keeps_slot_then_success_applies() {
        let mut q = CommandQueue::new();
        q.enqueue(false, 0);

        let outcome = q.try_apply(&state(true), 10_000, TTL, |desired| {
            assert!(!desired);
            false
        });
        assert_eq!(outcome, CommandOutcome::Failed);
        assert!(q.peek().is_some());

        let outcome = q.try_apply(&state(true), 40_000, TTL, |_| true);
        assert_eq!(outcome, CommandOutcome::Applied);
        assert_eq!(q.peek(), None);
    }

    #[test]
    fn failed_command_still_expires() {
        let mut q = CommandQueue::new();
        q.enqueue(false, 0);
        assert_eq!(q.try_apply(&state(true), 1_000, TTL, |_| false), CommandOutcome::Failed);
        assert_eq!(q.try_apply(&state(true), 301_000, TTL, |_| true), CommandOutcome::Expired);
    }

    #[test]
    fn clear_if_spares_newer_command() {
        let mut q = CommandQueue::new();
        let old = q.enqueue(true, 1_000);
        q.enqueue(false, 2_000);
        assert!(!q.clear_if(&old));
        assert!(q.peek().is_some());
    }
}
