//! ==============================================================================
//! poller.rs - the telemetry poll loop
//! ==============================================================================
//!
//! one cycle:
//!
//! ```text
//!     device.get_status ──► decode_frame ──► watchdog (in, out) ──► resolve
//!            │ (no lock)                                              │
//!            │ error/unsuccessful                                     ▼
//!            ▼                                               presence.observe
//!     offline backoff                                                 │
//!                                                                     ▼
//!                                  store.publish  (single write section)
//!                                                                     │
//!      spawn chat.send_message(event) ◄───────────────────────────────┤
//!                                                                     ▼
//!       device.post_command ◄──── store.try_apply_command (no lock held)
//!                                                                     │
//!                                                                     ▼
//!                                                      scheduler.next_delay
//! ```
//!
//! every computation runs on local copies of the trackers; the store is only
//! locked to read them at the start and to publish at the end.
//!
//! the clock is read after the status call returns and again right before the
//! command ttl check, never before a network call.
//!
//! ==============================================================================

use crate::chat::ChatTransport;
use crate::commands::CommandOutcome;
use crate::config::MonitorConfig;
use crate::decoder;
use crate::device::DeviceApi;
use crate::domain::{now_ms, Code, DecodedState, Millis, RawSample};
use crate::hysteresis::PowerEvent;
use crate::scheduler::PollScheduler;
use crate::store::{CycleUpdate, TelemetryStore};

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// engine tunables pulled out of MonitorConfig
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub device_id: String,
    pub charging_threshold_watts: i32,
    pub presence_threshold_watts: i32,
    pub input_stale: Duration,
    pub output_stale: Duration,
    pub command_ttl: Duration,
    pub notify_chat_id: String,
}

impl EngineSettings {
    pub fn from_config(cfg: &MonitorConfig) -> Self {
        Self {
            device_id: cfg.device.device_id.clone(),
            charging_threshold_watts: cfg.decoder.charging_threshold_watts,
            presence_threshold_watts: cfg.presence.threshold_watts,
            input_stale: cfg.watchdog.input_stale(),
            output_stale: cfg.watchdog.output_stale(),
            command_ttl: cfg.commands.ttl(),
            notify_chat_id: cfg.chat.chat_id.clone(),
        }
    }
}

/// what one cycle did, for logging and tests
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub reachable: bool,
    pub state: Option<DecodedState>,
    pub changed: bool,
    pub event: Option<PowerEvent>,
    pub command: CommandOutcome,
    pub next_delay: Duration,
}

/// wall clock in unix ms; swapped out in tests
pub type Clock = Arc<dyn Fn() -> Millis + Send + Sync>;

pub struct Poller<D, C> {
    device: D,
    chat: C,
    store: TelemetryStore,
    scheduler: PollScheduler,
    settings: EngineSettings,
    clock: Clock,
}

impl<D, C> Poller<D, C>
where
    D: DeviceApi,
    C: ChatTransport + Clone + 'static,
{
    pub fn new(
        device: D,
        chat: C,
        store: TelemetryStore,
        scheduler: PollScheduler,
        settings: EngineSettings,
    ) -> Self {
        Self { device, chat, store, scheduler, settings, clock: Arc::new(now_ms) }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    async fn fetch(&self) -> Option<RawSample> {
        match self.device.get_status(&self.settings.device_id).await {
            Ok(resp) if resp.success => Some(RawSample::from_points(&resp.result)),
            Ok(_) => {
                warn!("device reported an unsuccessful status call");
                None
            }
            Err(e) => {
                warn!(error = ?e, "device status call failed");
                None
            }
        }
    }

    /// run one full poll cycle
    pub async fn cycle(&mut self) -> CycleReport {
        let Some(sample) = self.fetch().await else {
            return CycleReport {
                reachable: false,
                state: None,
                changed: false,
                event: None,
                command: CommandOutcome::NoOp,
                next_delay: self.scheduler.next_delay(&DecodedState::default(), false),
            };
        };

        // the status call may have taken up to the request timeout
        let now = (self.clock)();

        // --- filter on local copies ---
        let mut trackers = self.store.trackers().await;
        let frame = decoder::decode_frame(&sample);

        let input = trackers.input.apply(frame.input_watts, now, self.settings.input_stale);
        let output = trackers.output.apply(frame.output_watts, now, self.settings.output_stale);
        if input.stuck || output.stuck {
            debug!(
                input_stuck = input.stuck,
                output_stuck = output.stuck,
                raw_in = frame.input_watts,
                raw_out = frame.output_watts,
                "watchdog forcing stuck channel to zero"
            );
        }
        trackers.input = input.watch;
        trackers.output = output.watch;

        let state = frame.resolve(
            input.effective,
            output.effective,
            self.settings.charging_threshold_watts,
        );
        let has_power = state.input_watts > self.settings.presence_threshold_watts;
        let event = trackers
            .presence
            .observe(has_power, state.battery_percent, state.input_watts);

        // --- publish ---
        let changed = self.store.publish(CycleUpdate { state, now, trackers }).await;
        if changed {
            debug!(
                battery = state.battery_percent,
                input = state.input_watts,
                output = state.output_watts,
                fast = state.fast_mode,
                "telemetry changed"
            );
        }

        if let Some(ev) = event {
            info!(online = ev.online, battery = ev.battery_percent, "power presence changed");
            self.notify(ev);
        }

        let command = self.apply_pending(&state).await;

        CycleReport {
            reachable: true,
            state: Some(state),
            changed,
            event,
            command,
            next_delay: self.scheduler.next_delay(&state, true),
        }
    }

    /// fire-and-forget; a slow chat api must not hold up the command slot
    fn notify(&self, event: PowerEvent) {
        let chat = self.chat.clone();
        let chat_id = self.settings.notify_chat_id.clone();
        tokio::spawn(async move {
            if let Err(e) = chat.send_message(&chat_id, &event.message()).await {
                warn!(error = %e, "failed to send power notification");
            }
        });
    }

    async fn apply_pending(&self, confirmed: &DecodedState) -> CommandOutcome {
        let device = &self.device;
        let device_id = self.settings.device_id.as_str();
        let now = (self.clock)();

        let outcome = self
            .store
            .try_apply_command(confirmed, now, self.settings.command_ttl, |fast| async move {
                // the switch is true for slow charging
                let value = Value::Bool(!fast);
                match device.post_command(device_id, Code::PdSwitch.as_str(), value).await {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!(error = ?e, "mode command call failed");
                        false
                    }
                }
            })
            .await;

        match outcome {
            CommandOutcome::NoOp => {}
            CommandOutcome::Applied => info!("pending mode command applied"),
            CommandOutcome::Skipped => info!("pending mode command already in effect, dropped"),
            CommandOutcome::Expired => info!("pending mode command expired, dropped"),
            CommandOutcome::Failed => warn!("pending mode command rejected, will retry"),
        }
        outcome
    }

    /// runs forever; nothing in here is fatal
    pub async fn run(mut self) {
        info!(device = %self.settings.device_id, "poller started");
        loop {
            let report = self.cycle().await;
            debug!(
                reachable = report.reachable,
                delay_s = report.next_delay.as_secs(),
                "poll cycle complete"
            );
            tokio::time::sleep(report.next_delay).await;
        }
    }
}
