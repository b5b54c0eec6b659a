//! ==============================================================================
//! dashboard.rs - web dashboard and json api
//! ==============================================================================
//!
//! purpose:
//!     renders whatever the store's snapshot holds and lets the operator queue
//!     a charge mode change. owns no state: every request reads a fresh
//!     snapshot, and the "optimistic" mode shown right after a click is derived
//!     from the pending command's age, so it falls back to the confirmed mode
//!     within a few seconds whatever happens to the command.
//!
//! routes:
//!     GET  /            html dashboard (auto refresh)
//!     GET  /api         raw snapshot as json
//!     GET  /api/status  snapshot plus derived freshness and displayed mode
//!     POST /api/mode?mode=fast|slow
//!
//! relationships:
//!     - reads/writes: store.rs (read, enqueue_command)
//!     - started by: main.rs
//!
//! ==============================================================================

use crate::chat::format_clock;
use crate::config::DashboardConfig;
use crate::domain::{now_ms, Millis};
use crate::store::{Snapshot, TelemetryStore};

use anyhow::{Context, Result};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, Json},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::info;

// ==============================================================================
// derived view helpers
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Freshness {
    /// no successful poll yet
    Waiting,
    /// heartbeat older than the stale threshold
    Stale { offline_secs: u64 },
    Fresh { since_change_secs: u64 },
}

pub fn freshness(snapshot: &Snapshot, now: Millis, stale_after_secs: u64) -> Freshness {
    let (Some(_), Some(heartbeat)) = (snapshot.current, snapshot.last_heartbeat_ms) else {
        return Freshness::Waiting;
    };

    let ping_ago = now.saturating_sub(heartbeat) / 1000;
    if ping_ago > stale_after_secs {
        return Freshness::Stale { offline_secs: ping_ago };
    }

    let changed = snapshot.last_update_ms.unwrap_or(heartbeat);
    Freshness::Fresh { since_change_secs: now.saturating_sub(changed) / 1000 }
}

pub fn ago_text(secs: u64) -> String {
    match secs {
        0..=1 => "just now".to_string(),
        2..=60 => format!("{}s ago", secs),
        61..=3600 => format!("{}m {}s ago", secs / 60, secs % 60),
        _ => format!("{}h {}m {}s ago", secs / 3600, (secs % 3600) / 60, secs % 60),
    }
}

/// seconds as h:mm
pub fn format_time_left(secs: i32) -> String {
    let secs = secs.max(0);
    format!("{}:{:02}", secs / 3600, (secs % 3600) / 60)
}

/// mode to show: a just-requested mode wins for `window_secs`, then the
/// device's confirmed mode
pub fn displayed_fast_mode(snapshot: &Snapshot, now: Millis, window_secs: u64) -> Option<bool> {
    if let Some(p) = snapshot.pending {
        if p.age_ms(now) < window_secs * 1000 {
            return Some(p.desired_fast_mode);
        }
    }
    snapshot.current.map(|s| s.fast_mode)
}

#[derive(Serialize)]
pub struct StatusView {
    #[serde(flatten)]
    pub snapshot: Snapshot,
    pub freshness: Freshness,
    pub displayed_fast_mode: Option<bool>,
}

// ==============================================================================
// server
// ==============================================================================

#[derive(Clone)]
pub struct DashboardState {
    pub store: TelemetryStore,
    pub config: DashboardConfig,
}

pub fn router(state: DashboardState) -> Router {
    Router::new()
        .route("/", get(dashboard_handler))
        .route("/api", get(api_handler))
        .route("/api/status", get(status_handler))
        .route("/api/mode", post(mode_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn run_server(state: DashboardState) -> Result<()> {
    let addr = state.config.bind_addr.clone();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind dashboard on {}", addr))?;
    info!(%addr, "dashboard live");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn api_handler(State(state): State<DashboardState>) -> Json<Snapshot> {
    Json(state.store.read().await)
}

async fn status_handler(State(state): State<DashboardState>) -> Json<StatusView> {
    let snapshot = state.store.read().await;
    let now = now_ms();
    Json(StatusView {
        freshness: freshness(&snapshot, now, state.config.stale_after_seconds),
        displayed_fast_mode: displayed_fast_mode(
            &snapshot,
            now,
            state.config.optimistic_window_seconds,
        ),
        snapshot,
    })
}

/// mode change params
#[derive(Deserialize)]
struct ModeParams {
    mode: String,
}

/// POST /api/mode?mode=fast|slow
async fn mode_handler(
    State(state): State<DashboardState>,
    Query(params): Query<ModeParams>,
) -> (StatusCode, Json<serde_json::Value>) {
    let fast = match params.mode.as_str() {
        "fast" => true,
        "slow" => false,
        _ => {
            let body = serde_json::json!({"status": "error", "message": "unknown mode"});
            return (StatusCode::BAD_REQUEST, Json(body));
        }
    };

    let cmd = state.store.enqueue_command(fast, now_ms()).await;
    info!(fast, "mode change queued from dashboard");
    let body = serde_json::json!({
        "status": "queued",
        "mode": params.mode,
        "created_at_ms": cmd.created_at_ms,
    });
    (StatusCode::OK, Json(body))
}

async fn dashboard_handler(State(state): State<DashboardState>) -> Html<String> {
    let snapshot = state.store.read().await;
    Html(render_page(&snapshot, now_ms(), &state.config))
}

pub fn render_page(snapshot: &Snapshot, now: Millis, cfg: &DashboardConfig) -> String {
    let Some(s) = snapshot.current else {
        return page("<p class=\"muted\">⏳ Waiting for data...</p>".to_string());
    };

    let status_line = match freshness(snapshot, now, cfg.stale_after_seconds) {
        Freshness::Waiting => "<p class=\"muted\">⏳ Waiting for data...</p>".to_string(),
        Freshness::Stale { offline_secs } => {
            format!("<p class=\"warn\">⚠️ Connection lost! Offline for {}s</p>", offline_secs)
        }
        Freshness::Fresh { since_change_secs } => format!(
            "<p class=\"muted\">{} | {} ({})</p>",
            if s.is_charging { "⚡ Charging..." } else { "🔋 On battery" },
            snapshot.last_update_ms.map(format_clock).unwrap_or_default(),
            ago_text(since_change_secs)
        ),
    };

    let pending = if snapshot.pending.is_some() {
        "<p class=\"info\">Waiting to apply mode change...</p>"
    } else {
        ""
    };

    let fast = displayed_fast_mode(snapshot, now, cfg.optimistic_window_seconds)
        .unwrap_or(s.fast_mode);
    let (fast_class, slow_class) = if fast { ("on", "") } else { ("", "on") };

    page(format!(
        r#"<h1>{battery}%</h1>
{status_line}
{pending}
<div class="metrics">
  <div><span>Input</span><b>{input} W</b></div>
  <div><span>Output</span><b>{output} W</b></div>
  <div><span>Time left</span><b>{left}</b></div>
  <div><span>Temp</span><b>{temp}°C</b></div>
</div>
<div class="mode">
  <button class="{slow_class}" onclick="setMode('slow')">Slow</button>
  <button class="{fast_class}" onclick="setMode('fast')">Fast</button>
</div>"#,
        battery = s.battery_percent,
        input = s.input_watts,
        output = s.output_watts,
        left = format_time_left(s.time_left_seconds),
        temp = s.temp_c,
    ))
}

fn page(body: String) -> String {
    format!(
        r#"<!doctype html>
<html>
<head>
<meta charset="utf-8">
<meta http-equiv="refresh" content="5">
<title>Power Station</title>
<style>
body {{ font-family: system-ui; padding: 2rem; background: #1a1a2e; color: #eee; text-align: center; }}
h1 {{ font-size: 80px; margin-bottom: 0; }}
.muted {{ color: #888; }} .warn {{ color: #ff6b6b; }} .info {{ color: #6bb5ff; }}
.metrics {{ display: flex; justify-content: center; gap: 2rem; margin: 2rem 0; }}
.metrics span {{ display: block; color: #888; }}
.mode button {{ padding: .6rem 1.4rem; background: #16213e; color: #eee; border: 1px solid #444; }}
.mode button.on {{ background: #0f3460; border-color: #6bb5ff; }}
</style>
<script>
function setMode(m) {{ fetch('/api/mode?mode=' + m, {{ method: 'POST' }}).then(() => location.reload()); }}
</script>
</head>
<body>
{}
</body>
</html>"#,
        body
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::PendingCommand;
    use crate::domain::DecodedState;

    fn snap(
        current: Option<DecodedState>,
        update: Option<Millis>,
        heartbeat: Option<Millis>,
    ) -> Snapshot {
        Snapshot {
            current,
            last_update_ms: update,
            last_heartbeat_ms: heartbeat,
            pending: None,
            history: Vec::new(),
        }
    }

    #[test]
    fn freshness_states() {
        let s = Some(DecodedState::default());
        assert_eq!(freshness(&snap(None, None, None), 0, 20), Freshness::Waiting);
        assert_eq!(
            freshness(&snap(s, Some(10_000), Some(50_000)), 60_000, 20),
            Freshness::Fresh { since_change_secs: 50 }
        );
        assert_eq!(
            freshness(&snap(s, Some(10_000), Some(30_000)), 60_000, 20),
            Freshness::Stale { offline_secs: 30 }
        );
    }

    #[test]
    fn ago_text_ranges() {
        assert_eq!(ago_text(1), "just now");
        assert_eq!(ago_text(45), "45s ago");
        assert_eq!(ago_text(125), "2m 5s ago");
        assert_eq!(ago_text(3725), "1h 2m 5s ago");
    }

    #[test]
    fn time_left_formatting() {
        assert_eq!(format_time_left(0), "0:00");
        assert_eq!(format_time_left(3 * 3600 + 7 * 60 + 59), "3:07");
        assert_eq!(format_time_left(-20), "0:00");
    }

    #[test]
    fn optimistic_mode_reconciles_after_window() {
        let slow = DecodedState { fast_mode: false, ..DecodedState::default() };
        let mut s = snap(Some(slow), Some(0), Some(0));
        s.pending = Some(PendingCommand { desired_fast_mode: true, created_at_ms: 10_000 });

        assert_eq!(displayed_fast_mode(&s, 12_000, 5), Some(true));
        // still pending, but the window is over: show what the device says
        assert_eq!(displayed_fast_mode(&s, 15_000, 5), Some(false));

        s.pending = None;
        assert_eq!(displayed_fast_mode(&s, 11_000, 5), Some(false));
    }

    #[test]
    fn page_shows_warning_when_stale() {
        let cfg = DashboardConfig { stale_after_seconds: 20, ..DashboardConfig::default() };
        let state = DecodedState { battery_percent: 77, ..DecodedState::default() };
        let s = snap(Some(state), Some(0), Some(0));
        let html = render_page(&s, 60_000, &cfg);
        assert!(html.contains("77%"));
        assert!(html.contains("Connection lost"));
    }

    #[test]
    fn page_waits_for_first_reading() {
        let html = render_page(&snap(None, None, None), 0, &DashboardConfig::default());
        assert!(html.contains("Waiting for data"));
    }

    fn web_state() -> DashboardState {
        DashboardState { store: TelemetryStore::new(10, 2), config: DashboardConfig::default() }
    }

    #[tokio::test]
    async fn unknown_mode_is_a_bad_request() {
        let state = web_state();
        let params = ModeParams { mode: "turbo".to_string() };
        let (status, Json(body)) = mode_handler(State(state.clone()), Query(params)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");
        assert!(state.store.peek_command().await.is_none());
    }

    #[tokio::test]
    async fn known_mode_is_queued() {
        let state = web_state();
        let params = ModeParams { mode: "fast".to_string() };
        let (status, Json(body)) = mode_handler(State(state.clone()), Query(params)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["mode"], "fast");
        let pending = state.store.peek_command().await.expect("queued");
        assert!(pending.desired_fast_mode);
    }
}
