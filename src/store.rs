//! ==============================================================================
//! store.rs - shared telemetry store
//! ==============================================================================
//!
//! purpose:
//!     the only shared mutable state in the process. a clone-able handle that
//!     the poller writes and the dashboard and chat responder read.
//!
//! locking discipline:
//!
//! ```text
//!     ┌──────────────────────────── telemetry: RwLock ───────────────────────┐
//!     │ current, last_update, last_heartbeat, history, watchdogs, presence   │
//!     │ written once per poll cycle by the poller (one write section)        │
//!     │ read whole by any number of readers -> never a torn snapshot         │
//!     └──────────────────────────────────────────────────────────────────────┘
//!     ┌──────────── commands: Mutex ────────────┐
//!     │ pending command slot                    │
//!     │ enqueued by ui/chat, cleared by poller  │
//!     └─────────────────────────────────────────┘
//! ```
//!
//! ```text
//!     the two locks are never held together, and no network call is ever
//!     awaited while either is held.
//! ```
//!
//! relationships:
//!     - written by: poller.rs (publish, try_apply_command)
//!     - read by: dashboard.rs, chat.rs
//!
//! ==============================================================================

use crate::commands::{plan, CommandOutcome, CommandQueue, PendingCommand, Plan};
use crate::domain::{DecodedState, HistoryPoint, Millis};
use crate::hysteresis::PresenceTracker;
use crate::watchdog::ChannelWatch;

use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};

/// per-process filter state, owned logically by the poller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Trackers {
    pub input: ChannelWatch,
    pub output: ChannelWatch,
    pub presence: PresenceTracker,
}

impl Trackers {
    pub fn new(offline_debounce: u32) -> Self {
        Self {
            input: ChannelWatch::default(),
            output: ChannelWatch::default(),
            presence: PresenceTracker::new(offline_debounce),
        }
    }
}

/// consistent copy of everything a reader may want
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    /// None until the first successful poll
    pub current: Option<DecodedState>,
    /// last time `current` actually changed
    pub last_update_ms: Option<Millis>,
    /// last successful poll, changed or not
    pub last_heartbeat_ms: Option<Millis>,
    pub pending: Option<PendingCommand>,
    pub history: Vec<HistoryPoint>,
}

/// everything one poll cycle publishes, applied in a single write section
#[derive(Debug, Clone, Copy)]
pub struct CycleUpdate {
    pub state: DecodedState,
    pub now: Millis,
    pub trackers: Trackers,
}

#[derive(Debug)]
struct Telemetry {
    current: Option<DecodedState>,
    last_update_ms: Option<Millis>,
    last_heartbeat_ms: Option<Millis>,
    history: VecDeque<HistoryPoint>,
    history_capacity: usize,
    trackers: Trackers,
}

impl Telemetry {
    fn write(&mut self, state: DecodedState, now: Millis) -> bool {
        self.last_heartbeat_ms = Some(now);
        if self.current == Some(state) {
            return false;
        }
        self.current = Some(state);
        self.last_update_ms = Some(now);
        true
    }

    fn append_history(&mut self, point: HistoryPoint) {
        if self.history_capacity == 0 {
            return;
        }
        while self.history.len() >= self.history_capacity {
            self.history.pop_front();
        }
        self.history.push_back(point);
    }
}

#[derive(Clone)]
pub struct TelemetryStore {
    telemetry: Arc<RwLock<Telemetry>>,
    commands: Arc<Mutex<CommandQueue>>,
}

impl TelemetryStore {
    pub fn new(history_capacity: usize, offline_debounce: u32) -> Self {
        Self {
            telemetry: Arc::new(RwLock::new(Telemetry {
                current: None,
                last_update_ms: None,
                last_heartbeat_ms: None,
                history: VecDeque::with_capacity(history_capacity),
                history_capacity,
                trackers: Trackers::new(offline_debounce),
            })),
            commands: Arc::new(Mutex::new(CommandQueue::new())),
        }
    }

    // ==========================================================================
    // readers
    // ==========================================================================

    pub async fn read(&self) -> Snapshot {
        let mut snapshot = {
            let t = self.telemetry.read().await;
            Snapshot {
                current: t.current,
                last_update_ms: t.last_update_ms,
                last_heartbeat_ms: t.last_heartbeat_ms,
                pending: None,
                history: t.history.iter().copied().collect(),
            }
        };
        snapshot.pending = self.peek_command().await;
        snapshot
    }

    pub async fn current(&self) -> Option<DecodedState> {
        self.telemetry.read().await.current
    }

    pub async fn trackers(&self) -> Trackers {
        self.telemetry.read().await.trackers
    }

    // ==========================================================================
    // poller-side writers
    // ==========================================================================

    /// record a successful poll; returns true when the state changed
    pub async fn write(&self, state: DecodedState, now: Millis) -> bool {
        self.telemetry.write().await.write(state, now)
    }

    pub async fn append_history(&self, point: HistoryPoint) {
        self.telemetry.write().await.append_history(point);
    }

    /// publish a whole cycle: trackers, state, heartbeat and history point
    pub async fn publish(&self, update: CycleUpdate) -> bool {
        let mut t = self.telemetry.write().await;
        t.trackers = update.trackers;
        let changed = t.write(update.state, update.now);
        t.append_history(HistoryPoint {
            timestamp_ms: update.now,
            input_watts: update.state.input_watts,
            output_watts: update.state.output_watts,
        });
        changed
    }

    // ==========================================================================
    // command slot
    // ==========================================================================

    pub async fn enqueue_command(&self, desired_fast_mode: bool, now: Millis) -> PendingCommand {
        self.commands.lock().await.enqueue(desired_fast_mode, now)
    }

    pub async fn peek_command(&self) -> Option<PendingCommand> {
        self.commands.lock().await.peek()
    }

    pub async fn clear_command(&self) -> Option<PendingCommand> {
        self.commands.lock().await.clear()
    }

    /// drain the slot against `confirmed`, calling `apply` with no lock held.
    ///
    /// a command enqueued while `apply` is in flight replaces the one being
    /// sent and is left in the slot for the next cycle.
    pub async fn try_apply_command<F, Fut>(
        &self,
        confirmed: &DecodedState,
        now: Millis,
        ttl: Duration,
        apply: F,
    ) -> CommandOutcome
    where
        F: FnOnce(bool) -> Fut,
        Fut: Future<Output = bool>,
    {
        let decision = {
            let mut queue = self.commands.lock().await;
            let decision = plan(queue.peek(), confirmed, now, ttl);
            match decision {
                Plan::Expire(cmd) | Plan::Skip(cmd) => {
                    queue.clear_if(&cmd);
                }
                Plan::Idle | Plan::Issue(_) => {}
            }
            decision
        };

        match decision {
            Plan::Idle => CommandOutcome::NoOp,
            Plan::Expire(_) => CommandOutcome::Expired,
            Plan::Skip(_) => CommandOutcome::Skipped,
            Plan::Issue(cmd) => {
                if apply(cmd.desired_fast_mode).await {
                    self.commands.lock().await.clear_if(&cmd);
                    CommandOutcome::Applied
                } else {
                    CommandOutcome::Failed
                }
            }
        }
    }
}
