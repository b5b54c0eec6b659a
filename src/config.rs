//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `monitor.toml`.
//!     loads configuration from file or falls back to defaults, then lets
//!     secrets come from the environment so they stay out of the file.
//!
//! structure:
//!     - DeviceConfig: cloud endpoint, device id and access token.
//!     - PollingConfig: adaptive poll intervals (active / idle / offline).
//!     - DecoderConfig, WatchdogConfig, PresenceConfig: engine thresholds.
//!     - CommandConfig, HistoryConfig: queue ttl and history size.
//!     - ChatConfig: bot transport and who may talk to it.
//!     - DashboardConfig: web ui bind address and display windows.
//!
//! the thresholds are tuned for one particular unit; they live here so a
//! different station can be tuned without recompiling.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct MonitorConfig {
    pub device: DeviceConfig,
    pub polling: PollingConfig,
    pub decoder: DecoderConfig,
    pub watchdog: WatchdogConfig,
    pub presence: PresenceConfig,
    pub commands: CommandConfig,
    pub history: HistoryConfig,
    pub chat: ChatConfig,
    pub dashboard: DashboardConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DeviceConfig {
    pub api_base_url: String,
    pub device_id: String,
    pub access_token: String,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct PollingConfig {
    pub active_interval_seconds: u64,
    pub idle_interval_seconds: u64,
    pub offline_backoff_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DecoderConfig {
    /// input above this counts as charging
    pub charging_threshold_watts: i32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WatchdogConfig {
    pub input_stale_seconds: u64,
    pub output_stale_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PresenceConfig {
    /// effective input above this means grid power is present
    pub threshold_watts: i32,
    /// consecutive readings without power before "power lost" is reported
    pub offline_debounce: u32,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CommandConfig {
    pub ttl_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct HistoryConfig {
    pub capacity: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChatConfig {
    pub api_base_url: String,
    pub bot_token: String,
    /// chat that receives power notifications
    pub chat_id: String,
    /// comma separated chat ids allowed to query; empty = chat_id only
    pub allowed_users: String,
    pub long_poll_seconds: u64,
    pub idle_delay_ms: u64,
    pub error_backoff_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub bind_addr: String,
    /// heartbeat age after which the ui shows a lost-link warning
    pub stale_after_seconds: u64,
    /// how long a freshly requested mode is shown before the device confirms it
    pub optimistic_window_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://openapi.tuyaeu.com".to_string(),
            device_id: String::new(),
            access_token: String::new(),
            request_timeout_seconds: 10,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            active_interval_seconds: 20,
            idle_interval_seconds: 120,
            offline_backoff_seconds: 300,
        }
    }
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self { charging_threshold_watts: 5 }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self { input_stale_seconds: 300, output_stale_seconds: 120 }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self { threshold_watts: 405, offline_debounce: 2 }
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self { ttl_seconds: 300 }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { capacity: 100 }
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.telegram.org".to_string(),
            bot_token: String::new(),
            chat_id: String::new(),
            allowed_users: String::new(),
            long_poll_seconds: 10,
            idle_delay_ms: 1000,
            error_backoff_seconds: 5,
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:3000".to_string(),
            stale_after_seconds: 360,
            optimistic_window_seconds: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl WatchdogConfig {
    pub fn input_stale(&self) -> Duration {
        Duration::from_secs(self.input_stale_seconds)
    }

    pub fn output_stale(&self) -> Duration {
        Duration::from_secs(self.output_stale_seconds)
    }
}

impl CommandConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

impl ChatConfig {
    pub fn enabled(&self) -> bool {
        !self.bot_token.is_empty()
    }

    pub fn allowed_chat_ids(&self) -> Vec<String> {
        let raw = if self.allowed_users.trim().is_empty() {
            &self.chat_id
        } else {
            &self.allowed_users
        };
        raw.split(',')
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect()
    }
}

impl MonitorConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        toml::from_str(content).map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let paths = [
            std::path::PathBuf::from("config").join("monitor.toml"),
            std::path::PathBuf::from("..").join("config").join("monitor.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    /// Overlay secrets and ids from the process environment
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F: Fn(&str) -> Option<String>>(&mut self, lookup: F) {
        let targets: [(&str, &mut String); 4] = [
            ("MONITOR_ACCESS_TOKEN", &mut self.device.access_token),
            ("MONITOR_DEVICE_ID", &mut self.device.device_id),
            ("MONITOR_BOT_TOKEN", &mut self.chat.bot_token),
            ("MONITOR_CHAT_ID", &mut self.chat.chat_id),
        ];
        for (key, slot) in targets {
            if let Some(value) = lookup(key).filter(|v| !v.is_empty()) {
                *slot = value;
            }
        }
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        let mask = |s: &str| if s.is_empty() { "(unset)" } else { "****" };
        println!("┌─────────────────────────────────────────┐");
        println!("│         MONITOR CONFIGURATION           │");
        println!("├─────────────────────────────────────────┤");
        let device = if self.device.device_id.is_empty() {
            "(unset)"
        } else {
            self.device.device_id.as_str()
        };
        println!("│ Device: {}", device);
        println!("│ Access Token: {}", mask(&self.device.access_token));
        println!(
            "│ Poll: {}s active / {}s idle / {}s offline",
            self.polling.active_interval_seconds,
            self.polling.idle_interval_seconds,
            self.polling.offline_backoff_seconds
        );
        println!(
            "│ Watchdog: in {}s / out {}s",
            self.watchdog.input_stale_seconds, self.watchdog.output_stale_seconds
        );
        println!(
            "│ Presence: >{}W, debounce {}",
            self.presence.threshold_watts, self.presence.offline_debounce
        );
        println!("│ Command TTL: {}s", self.commands.ttl_seconds);
        println!("│ Chat Bot: {}", if self.chat.enabled() { "enabled" } else { "disabled" });
        println!("│ Dashboard: {}", self.dashboard.bind_addr);
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn partial_file_keeps_defaults() {
        let cfg = MonitorConfig::parse(
            r#"
            [presence]
            threshold_watts = 300

            [chat]
            chat_id = "42"
            "#,
        )
        .expect("valid toml");

        assert_eq!(cfg.presence.threshold_watts, 300);
        assert_eq!(cfg.presence.offline_debounce, 2);
        assert_eq!(cfg.watchdog.input_stale_seconds, 300);
        assert_eq!(cfg.watchdog.output_stale_seconds, 120);
        assert_eq!(cfg.commands.ttl_seconds, 300);
        assert_eq!(cfg.history.capacity, 100);
        assert_eq!(cfg.chat.chat_id, "42");
        assert_eq!(cfg.chat.long_poll_seconds, 10);
    }

    #[test]
    fn empty_file_is_all_defaults() {
        let cfg = MonitorConfig::parse("").expect("valid toml");
        assert_eq!(cfg.polling, PollingConfig::default());
        assert!(!cfg.chat.enabled());
    }

    #[test]
    fn bad_toml_is_an_error() {
        assert!(MonitorConfig::parse("[polling\nidle = ").is_err());
    }

    #[test]
    fn allowed_users_default_to_notification_chat() {
        let mut chat = ChatConfig { chat_id: "100".to_string(), ..ChatConfig::default() };
        assert_eq!(chat.allowed_chat_ids(), vec!["100".to_string()]);

        chat.allowed_users = " 100, 200 ,,300".to_string();
        assert_eq!(chat.allowed_chat_ids(), vec!["100", "200", "300"]);
    }

    #[test]
    fn env_overrides_replace_secrets() {
        let env: HashMap<&str, &str> = [
            ("MONITOR_BOT_TOKEN", "abc"),
            ("MONITOR_DEVICE_ID", ""),
            ("MONITOR_CHAT_ID", "7"),
        ]
        .into();

        let mut cfg = MonitorConfig::default();
        cfg.device.device_id = "from-file".to_string();
        cfg.apply_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.chat.bot_token, "abc");
        assert_eq!(cfg.chat.chat_id, "7");
        assert_eq!(cfg.device.device_id, "from-file");
        assert!(cfg.chat.enabled());
    }
}
