//! ==============================================================================
//! chat.rs - chat bot transport and responder loop
//! ==============================================================================
//!
//! purpose:
//!     - ChatTransport: long-poll for inbound messages, send outbound ones.
//!     - ChatResponder: answers status requests from allowed chats and lets
//!       them queue a charge mode change. reads the store, never touches
//!       telemetry; the command slot is the only thing it writes.
//!
//! relationships:
//!     - used by: main.rs (spawns the responder), poller.rs (notifications)
//!     - reads/writes: store.rs
//!
//! ==============================================================================

use crate::config::ChatConfig;
use crate::domain::{now_ms, Millis};
use crate::store::{Snapshot, TelemetryStore};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use serde_json::json;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatUpdate {
    pub update_id: i64,
    pub chat_id: String,
    pub text: String,
}

pub trait ChatTransport: Send + Sync {
    /// updates with id strictly greater than `after`; empty on long-poll timeout
    fn get_updates(&self, after: i64) -> impl Future<Output = Result<Vec<ChatUpdate>>> + Send;

    fn send_message(&self, chat_id: &str, text: &str) -> impl Future<Output = Result<()>> + Send;
}

// ==============================================================================
// telegram bot api
// ==============================================================================

#[derive(Deserialize)]
struct TgResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    result: Option<T>,
}

#[derive(Deserialize)]
struct TgUpdate {
    update_id: i64,
    #[serde(default)]
    message: Option<TgMessage>,
}

#[derive(Deserialize)]
struct TgMessage {
    #[serde(default)]
    text: Option<String>,
    chat: TgChat,
}

#[derive(Deserialize)]
struct TgChat {
    id: i64,
}

#[derive(Clone)]
pub struct TelegramTransport {
    client: reqwest::Client,
    base_url: String,
    token: String,
    long_poll: Duration,
}

impl TelegramTransport {
    pub fn new(cfg: &ChatConfig) -> Result<Self> {
        let long_poll = Duration::from_secs(cfg.long_poll_seconds);
        let client = reqwest::Client::builder()
            .timeout(long_poll + Duration::from_secs(5))
            .build()
            .context("failed to build chat http client")?;

        Ok(Self {
            client,
            base_url: cfg.api_base_url.trim_end_matches('/').to_string(),
            token: cfg.bot_token.clone(),
            long_poll,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.base_url, self.token, method)
    }
}

fn flatten_updates(updates: Vec<TgUpdate>) -> Vec<ChatUpdate> {
    updates
        .into_iter()
        .map(|u| {
            let (chat_id, text) = match u.message {
                Some(m) => (m.chat.id.to_string(), m.text.unwrap_or_default()),
                None => (String::new(), String::new()),
            };
            ChatUpdate { update_id: u.update_id, chat_id, text }
        })
        .collect()
}

impl ChatTransport for TelegramTransport {
    async fn get_updates(&self, after: i64) -> Result<Vec<ChatUpdate>> {
        let query = [
            ("offset", (after + 1).to_string()),
            ("timeout", self.long_poll.as_secs().to_string()),
        ];
        let resp: TgResponse<Vec<TgUpdate>> = self
            .client
            .get(self.method_url("getUpdates"))
            .query(&query)
            .send()
            .await
            .context("getUpdates failed")?
            .json()
            .await
            .context("getUpdates body is not valid json")?;

        if !resp.ok {
            return Err(anyhow!("getUpdates rejected: {}", resp.description.unwrap_or_default()));
        }
        Ok(flatten_updates(resp.result.unwrap_or_default()))
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        self.client
            .post(self.method_url("sendMessage"))
            .json(&json!({ "chat_id": chat_id, "text": text }))
            .send()
            .await
            .context("sendMessage failed")?
            .error_for_status()
            .context("sendMessage rejected")?;
        Ok(())
    }
}

/// stand-in when no bot token is configured
#[derive(Clone, Default)]
pub struct DisabledChat;

impl ChatTransport for DisabledChat {
    async fn get_updates(&self, _after: i64) -> Result<Vec<ChatUpdate>> {
        Ok(Vec::new())
    }

    async fn send_message(&self, chat_id: &str, text: &str) -> Result<()> {
        debug!(chat_id, text, "chat disabled, dropping message");
        Ok(())
    }
}

// ==============================================================================
// responder
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatCommand {
    Status,
    SetFastMode(bool),
}

impl ChatCommand {
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.to_lowercase();
        if text.contains("/status") || text.contains("статус") || text.contains("start") {
            Some(ChatCommand::Status)
        } else if text.contains("/fast") {
            Some(ChatCommand::SetFastMode(true))
        } else if text.contains("/slow") {
            Some(ChatCommand::SetFastMode(false))
        } else {
            None
        }
    }
}

/// human readable status; None before the first reading
pub fn status_reply(snapshot: &Snapshot) -> Option<String> {
    let s = snapshot.current?;
    let updated = snapshot
        .last_update_ms
        .map(format_clock)
        .unwrap_or_else(|| "-".to_string());
    let mut reply = format!(
        "🔋 Status\n━━━━━━━━\nBattery: {}%\n🟢 Input: {} W\n🔌 Output: {} W\n🌡 Temperature: {}°C\n⚙️ Mode: {}\n🕒 Updated: {}",
        s.battery_percent,
        s.input_watts,
        s.output_watts,
        s.temp_c,
        if s.fast_mode { "fast" } else { "slow" },
        updated
    );
    if let Some(p) = snapshot.pending {
        let mode = if p.desired_fast_mode { "fast" } else { "slow" };
        reply.push_str(&format!("\n⏳ Pending: switch to {}", mode));
    }
    Some(reply)
}

/// local HH:MM:SS for a unix millisecond timestamp
pub fn format_clock(ts: Millis) -> String {
    use chrono::TimeZone;
    chrono::Local
        .timestamp_millis_opt(ts as i64)
        .single()
        .map(|t| t.format("%H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

pub struct ChatResponder<C> {
    transport: C,
    store: TelemetryStore,
    allowed: Vec<String>,
    offset: i64,
    idle_delay: Duration,
    error_backoff: Duration,
}

impl<C: ChatTransport> ChatResponder<C> {
    pub fn new(transport: C, store: TelemetryStore, cfg: &ChatConfig) -> Self {
        Self {
            transport,
            store,
            allowed: cfg.allowed_chat_ids(),
            offset: 0,
            idle_delay: Duration::from_millis(cfg.idle_delay_ms),
            error_backoff: Duration::from_secs(cfg.error_backoff_seconds),
        }
    }

    pub fn offset(&self) -> i64 {
        self.offset
    }

    /// one long-poll round; returns how many updates were handled
    pub async fn poll_once(&mut self) -> Result<usize> {
        let updates = self.transport.get_updates(self.offset).await?;
        let count = updates.len();
        for update in updates {
            self.offset = self.offset.max(update.update_id);
            self.handle(&update).await;
        }
        Ok(count)
    }

    async fn handle(&self, update: &ChatUpdate) {
        if !self.allowed.iter().any(|id| id == &update.chat_id) {
            debug!(chat_id = %update.chat_id, "ignoring message from unknown chat");
            return;
        }

        let reply = match ChatCommand::parse(&update.text) {
            None => return,
            Some(ChatCommand::Status) => match status_reply(&self.store.read().await) {
                Some(text) => text,
                None => "⏳ Waiting for data...".to_string(),
            },
            Some(ChatCommand::SetFastMode(fast)) => {
                self.store.enqueue_command(fast, now_ms()).await;
                info!(chat_id = %update.chat_id, fast, "mode change queued from chat");
                format!(
                    "✅ Queued: {} charging. It will be applied once the station is reachable.",
                    if fast { "fast" } else { "slow" }
                )
            }
        };

        if let Err(e) = self.transport.send_message(&update.chat_id, &reply).await {
            warn!(error = %e, "failed to send chat reply");
        }
    }

    /// runs forever; transport failures only delay the next round
    pub async fn run(mut self) {
        info!(allowed = self.allowed.len(), "chat responder started");
        loop {
            if self.store.current().await.is_none() {
                tokio::time::sleep(Duration::from_secs(2)).await;
                continue;
            }

            match self.poll_once().await {
                Ok(_) => tokio::time::sleep(self.idle_delay).await,
                Err(e) => {
                    warn!(error = %e, "chat poll failed");
                    tokio::time::sleep(self.error_backoff).await;
                }
            }
        }
    }
}
