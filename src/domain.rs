//! ==============================================================================
//! domain.rs - shared telemetry types
//! ==============================================================================
//!
//! purpose:
//!     plain data passed between the decoder, the store, the loops and the
//!     dashboard. nothing in here does i/o.
//!
//! relationships:
//!     - produced by: device.rs (DataPoint), decoder.rs (DecodedState)
//!     - consumed by: store.rs, poller.rs, chat.rs, dashboard.rs
//!
//! ==============================================================================

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// unix timestamp in milliseconds
pub type Millis = u64;

/// current wall clock time in unix milliseconds
pub fn now_ms() -> Millis {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Millis)
        .unwrap_or(0)
}

// ==============================================================================
// raw sample - what the cloud returns
// ==============================================================================

/// one key-coded entry of a device status response
/// e.g. {"code": "battery_percentage", "value": 87}
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct DataPoint {
    pub code: String,
    pub value: Value,
}

impl DataPoint {
    pub fn new(code: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { code: code.into(), value: value.into() }
    }
}

/// the codes this engine understands
///
/// anything else in a status response is ignored. every code has a default
/// that is used when it is absent or carries a value of the wrong type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    /// integer 0-100, default 0
    BatteryPercentage,
    /// integer degrees celsius, default 0
    TempCurrent,
    /// boolean, true = slow charging, default false
    PdSwitch,
    /// base64 blob: (input watts, seconds to full), default absent
    ChargedData,
    /// base64 blob: (output watts, reserved, seconds to empty), default absent
    BatteryParameters,
}

impl Code {
    pub const ALL: [Code; 5] = [
        Code::BatteryPercentage,
        Code::TempCurrent,
        Code::PdSwitch,
        Code::ChargedData,
        Code::BatteryParameters,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Code::BatteryPercentage => "battery_percentage",
            Code::TempCurrent => "temp_current",
            Code::PdSwitch => "pd_switch_1",
            Code::ChargedData => "charged_data",
            Code::BatteryParameters => "battery_parameters",
        }
    }
}

/// code -> value mapping for a single poll
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawSample {
    values: HashMap<String, Value>,
}

impl RawSample {
    /// build from the cloud's list form; the first occurrence of a code wins
    pub fn from_points(points: &[DataPoint]) -> Self {
        let mut values = HashMap::new();
        for p in points {
            values.entry(p.code.clone()).or_insert_with(|| p.value.clone());
        }
        Self { values }
    }

    pub fn insert(&mut self, code: Code, value: impl Into<Value>) -> &mut Self {
        self.values.insert(code.as_str().to_string(), value.into());
        self
    }

    pub fn get(&self, code: Code) -> Option<&Value> {
        self.values.get(code.as_str())
    }

    /// integer channel, 0 when absent or not an integer
    pub fn int(&self, code: Code) -> i64 {
        self.get(code).and_then(Value::as_i64).unwrap_or(0)
    }

    /// boolean channel, false when absent or not a boolean
    pub fn flag(&self, code: Code) -> bool {
        self.get(code).and_then(Value::as_bool).unwrap_or(false)
    }

    /// base64 blob channel; empty strings are treated as absent
    pub fn blob(&self, code: Code) -> Option<&str> {
        self.get(code)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

// ==============================================================================
// decoded state - the trustworthy logical view
// ==============================================================================

/// logical station state for one poll cycle
///
/// replaced wholesale every cycle; never patched field by field.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedState {
    pub battery_percent: i32,
    pub temp_c: i32,
    pub input_watts: i32,
    pub output_watts: i32,
    /// time to full while net charging, else time to empty
    pub time_left_seconds: i32,
    pub is_charging: bool,
    pub fast_mode: bool,
}

/// one entry of the in-memory power history
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub timestamp_ms: Millis,
    pub input_watts: i32,
    pub output_watts: i32,
}
