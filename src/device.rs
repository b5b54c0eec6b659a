//! ==============================================================================
//! device.rs - cloud device api capability
//! ==============================================================================
//!
//! purpose:
//!     the engine's only way to reach the station. a trait so the poller can
//!     be driven by the real cloud client or by an in-memory fake.
//!
//! wire format:
//!     GET  {base}/v1.0/devices/{id}/status    -> {"success": bool, "result": [DataPoint]}
//!     POST {base}/v1.0/devices/{id}/commands  <- {"commands": [{"code", "value"}]}
//!                                              -> {"success": bool}
//!
//! the client sends a pre-issued bearer token and nothing more; obtaining and
//! refreshing that token is left to whatever fronts the vendor api.
//!
//! relationships:
//!     - used by: poller.rs
//!     - uses: reqwest
//!
//! ==============================================================================

use crate::config::DeviceConfig;
use crate::domain::DataPoint;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::future::Future;
use std::time::Duration;

/// status call result; `success == false` is treated like a transport error
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StatusResponse {
    pub success: bool,
    #[serde(default)]
    pub result: Vec<DataPoint>,
}

#[derive(Debug, Deserialize)]
struct CommandResponse {
    #[serde(default)]
    success: bool,
}

pub trait DeviceApi: Send + Sync {
    fn get_status(&self, device_id: &str) -> impl Future<Output = Result<StatusResponse>> + Send;

    /// true when the device acknowledged the command
    fn post_command(
        &self,
        device_id: &str,
        code: &str,
        value: Value,
    ) -> impl Future<Output = Result<bool>> + Send;
}

#[derive(Clone)]
pub struct HttpDeviceApi {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl HttpDeviceApi {
    pub fn new(cfg: &DeviceConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.request_timeout_seconds))
            .build()
            .context("failed to build device http client")?;

        Ok(Self {
            client,
            base_url: cfg.api_base_url.trim_end_matches('/').to_string(),
            access_token: cfg.access_token.clone(),
        })
    }

    fn url(&self, device_id: &str, leaf: &str) -> String {
        format!("{}/v1.0/devices/{}/{}", self.base_url, device_id, leaf)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.access_token.is_empty() {
            req
        } else {
            req.bearer_auth(&self.access_token)
        }
    }
}

impl DeviceApi for HttpDeviceApi {
    async fn get_status(&self, device_id: &str) -> Result<StatusResponse> {
        let resp = self
            .authorize(self.client.get(self.url(device_id, "status")))
            .send()
            .await
            .context("status request failed")?
            .error_for_status()
            .context("status request rejected")?;

        resp.json::<StatusResponse>().await.context("status body is not valid json")
    }

    async fn post_command(&self, device_id: &str, code: &str, value: Value) -> Result<bool> {
        let body = json!({ "commands": [{ "code": code, "value": value }] });
        let resp = self
            .authorize(self.client.post(self.url(device_id, "commands")))
            .json(&body)
            .send()
            .await
            .context("command request failed")?
            .error_for_status()
            .context("command request rejected")?;

        let parsed: CommandResponse = resp.json().await.context("command body is not valid json")?;
        Ok(parsed.success)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_body_parses() {
        let body = r#"{
            "success": true,
            "t": 1700000000000,
            "result": [
                {"code": "battery_percentage", "value": 87},
                {"code": "pd_switch_1", "value": false},
                {"code": "charged_data", "value": "yAAAAFYAAAA="}
            ]
        }"#;
        let parsed: StatusResponse = serde_json::from_str(body).expect("valid body");
        assert!(parsed.success);
        assert_eq!(parsed.result.len(), 3);
        assert_eq!(parsed.result[0], DataPoint::new("battery_percentage", 87));
    }

    #[test]
    fn failure_body_without_result_parses() {
        let body = r#"{"success": false, "code": 1010, "msg": "token invalid"}"#;
        let parsed: StatusResponse = serde_json::from_str(body).expect("valid body");
        assert!(!parsed.success);
        assert!(parsed.result.is_empty());
    }

    #[test]
    fn urls_are_built_from_trimmed_base() {
        let api = HttpDeviceApi::new(&DeviceConfig {
            api_base_url: "https://cloud.example/".to_string(),
            ..DeviceConfig::default()
        })
        .expect("client");
        assert_eq!(api.url("abc", "status"), "https://cloud.example/v1.0/devices/abc/status");
    }
}
