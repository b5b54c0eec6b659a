//! ==============================================================================
//! main.rs - power station monitor entry point
//! ==============================================================================
//!
//! purpose:
//!     wires the telemetry engine to its collaborators and starts the three
//!     long-running tasks.
//!
//! architecture:
//!
//!     ┌──────────────────────────────────────────────────────────────┐
//!     │                      monitor (this file)                     │
//!     │  ┌─────────────┐   ┌───────────────┐   ┌─────────────────┐   │
//!     │  │ poll loop   │   │ chat responder│   │ web dashboard   │   │
//!     │  │ (adaptive)  │   │ (long-poll)   │   │ (port 3000)     │   │
//!     │  └──────┬──────┘   └───────┬───────┘   └────────┬────────┘   │
//!     │    write│              read│ + enqueue      read│ + enqueue  │
//!     │         └──────────────────┼────────────────────┘            │
//!     │                      ┌─────┴─────┐                           │
//!     │                      │   store   │ <- store.rs               │
//!     │                      └───────────┘                           │
//!     └──────────────────────────────────────────────────────────────┘
//!            │                      │
//!            ▼                      ▼
//!     cloud device api        chat bot api
//!
//! ==============================================================================

use powerstation_monitor::chat::{ChatResponder, ChatTransport, DisabledChat, TelegramTransport};
use powerstation_monitor::config::MonitorConfig;
use powerstation_monitor::dashboard::{self, DashboardState};
use powerstation_monitor::device::HttpDeviceApi;
use powerstation_monitor::poller::{EngineSettings, Poller};
use powerstation_monitor::scheduler::PollScheduler;
use powerstation_monitor::store::TelemetryStore;

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // startup banner
    println!("===========================================================");
    println!("  Power Station Monitor");
    println!("===========================================================");

    // step 1: load configuration
    let mut config = MonitorConfig::load_or_default();
    config.apply_env_overrides();
    config.print_summary();

    // step 2: logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    if config.device.device_id.is_empty() {
        warn!("no device id configured; every poll will fail and back off");
    }

    // step 3: shared store
    let store = TelemetryStore::new(config.history.capacity, config.presence.offline_debounce);

    // step 4: web dashboard in background
    let web_state = DashboardState { store: store.clone(), config: config.dashboard.clone() };
    tokio::spawn(async move {
        if let Err(e) = dashboard::run_server(web_state).await {
            error!(error = ?e, "web server stopped");
        }
    });

    // step 5: engine loops
    let device = HttpDeviceApi::new(&config.device)?;
    if config.chat.enabled() {
        let chat = TelegramTransport::new(&config.chat)?;
        start_loops(device, chat, store, &config).await
    } else {
        info!("chat bot disabled (no bot token)");
        start_loops(device, DisabledChat, store, &config).await
    }
}

async fn start_loops<C>(
    device: HttpDeviceApi,
    chat: C,
    store: TelemetryStore,
    config: &MonitorConfig,
) -> Result<()>
where
    C: ChatTransport + Clone + 'static,
{
    if config.chat.enabled() {
        let responder = ChatResponder::new(chat.clone(), store.clone(), &config.chat);
        tokio::spawn(responder.run());
    }

    let poller = Poller::new(
        device,
        chat,
        store,
        PollScheduler::from_config(&config.polling),
        EngineSettings::from_config(config),
    );

    // the poller never returns
    poller.run().await;
    Ok(())
}
