//! ==============================================================================
//! decoder.rs - raw key-coded sample -> DecodedState
//! ==============================================================================
//!
//! purpose:
//!     turns one status response into a DecodedState. total: a malformed
//!     binary field only zeroes that field, it never fails the poll cycle.
//!
//! binary layout (little endian, signed 32-bit words):
//!     charged_data        [input_watts, seconds_to_full]
//!     battery_parameters  [output_watts, reserved, seconds_to_empty]
//!
//! relationships:
//!     - used by: poller.rs (decode_frame, then watchdog, then resolve)
//!     - uses: domain.rs (RawSample, Code, DecodedState)
//!
//! ==============================================================================

use crate::domain::{Code, DecodedState, RawSample};

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;

/// charged_data payload the firmware sends for "no input"; its words are
/// not meaningful and must not be unpacked
pub const ZERO_INPUT_SENTINEL: &str = "yAAAAFYAAAA=";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("invalid base64: {0}")]
    Base64(String),
    #[error("payload too short: need {need} bytes, got {got} ({hex})")]
    Short { need: usize, got: usize, hex: String },
}

/// power channels and both time estimates of one reading, before the
/// watchdog has had a say
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PowerFrame {
    pub battery_percent: i32,
    pub temp_c: i32,
    pub fast_mode: bool,
    pub input_watts: i32,
    pub output_watts: i32,
    pub time_to_full: i32,
    pub time_to_empty: i32,
}

impl PowerFrame {
    /// build the logical state from (possibly watchdog-adjusted) channel values
    pub fn resolve(
        &self,
        input_watts: i32,
        output_watts: i32,
        charging_threshold: i32,
    ) -> DecodedState {
        let time_left_seconds = if input_watts > output_watts {
            self.time_to_full
        } else {
            self.time_to_empty
        };

        DecodedState {
            battery_percent: self.battery_percent,
            temp_c: self.temp_c,
            input_watts,
            output_watts,
            time_left_seconds,
            is_charging: input_watts > charging_threshold,
            fast_mode: self.fast_mode,
        }
    }
}

/// decode a sample straight to its logical state
pub fn decode(sample: &RawSample, charging_threshold: i32) -> DecodedState {
    let frame = decode_frame(sample);
    frame.resolve(frame.input_watts, frame.output_watts, charging_threshold)
}

/// decode every known code into a PowerFrame
pub fn decode_frame(sample: &RawSample) -> PowerFrame {
    let battery_percent = sample.int(Code::BatteryPercentage) as i32;

    let (mut input_watts, time_to_full) = match sample.blob(Code::ChargedData) {
        None => (0, 0),
        Some(ZERO_INPUT_SENTINEL) => (0, 0),
        Some(blob) => match unpack::<2>(blob) {
            Ok([watts, secs]) => (watts, secs),
            Err(e) => {
                tracing::warn!(
                    code = Code::ChargedData.as_str(),
                    error = %e,
                    "malformed payload, using zero"
                );
                (0, 0)
            }
        },
    };

    let (output_watts, time_to_empty) = match sample.blob(Code::BatteryParameters) {
        None => (0, 0),
        Some(blob) => match unpack::<3>(blob) {
            Ok([watts, _reserved, secs]) => (watts, secs),
            Err(e) => {
                tracing::warn!(
                    code = Code::BatteryParameters.as_str(),
                    error = %e,
                    "malformed payload, using zero"
                );
                (0, 0)
            }
        },
    };

    // a full battery that still reports input is a firmware artefact
    if battery_percent == 100 {
        input_watts = 0;
    }

    PowerFrame {
        battery_percent,
        temp_c: sample.int(Code::TempCurrent) as i32,
        fast_mode: !sample.flag(Code::PdSwitch),
        input_watts,
        output_watts,
        time_to_full,
        time_to_empty,
    }
}

/// unpack the first N little-endian i32 words of a base64 blob;
/// trailing bytes are ignored
fn unpack<const N: usize>(blob: &str) -> Result<[i32; N], DecodeError> {
    let raw = BASE64
        .decode(blob.trim())
        .map_err(|e| DecodeError::Base64(e.to_string()))?;

    let need = N * 4;
    if raw.len() < need {
        return Err(DecodeError::Short { need, got: raw.len(), hex: hex::encode(&raw) });
    }

    let mut words = [0i32; N];
    for (word, chunk) in words.iter_mut().zip(raw.chunks_exact(4)) {
        *word = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(words)
}

/// encode words the way the device does; used to build samples in tests
#[cfg(test)]
pub(crate) fn encode_words(words: &[i32]) -> String {
    let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();
    BASE64.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(battery: i64, charged: Option<String>, params: Option<String>) -> RawSample {
        let mut s = RawSample::default();
        s.insert(Code::BatteryPercentage, battery);
        s.insert(Code::TempCurrent, 24);
        s.insert(Code::PdSwitch, true);
        if let Some(c) = charged {
            s.insert(Code::ChargedData, c);
        }
        if let Some(p) = params {
            s.insert(Code::BatteryParameters, p);
        }
        s
    }

    #[test]
    fn sentinel_always_means_zero_input() {
        for battery in [0, 37, 99, 100] {
            let s = sample(
                battery,
                Some(ZERO_INPUT_SENTINEL.to_string()),
                Some(encode_words(&[0, 0, 900])),
            );
            let state = decode(&s, 5);
            assert_eq!(state.input_watts, 0);
            assert!(!state.is_charging);
        }
    }

    #[test]
    fn sentinel_is_not_zero_when_unpacked() {
        // guards the special case: the generic path would report 200 W
        assert_eq!(unpack::<2>(ZERO_INPUT_SENTINEL), Ok([200, 86]));
    }

    #[test]
    fn time_left_is_time_to_full_while_net_charging() {
        let s = sample(50, Some(encode_words(&[300, 1800])), Some(encode_words(&[40, 7, 36000])));
        let state = decode(&s, 5);
        assert_eq!(state.input_watts, 300);
        assert_eq!(state.output_watts, 40);
        assert_eq!(state.time_left_seconds, 1800);
        assert!(state.is_charging);
    }

    #[test]
    fn time_left_is_time_to_empty_otherwise() {
        let s = sample(50, Some(encode_words(&[40, 1800])), Some(encode_words(&[300, 7, 5400])));
        assert_eq!(decode(&s, 5).time_left_seconds, 5400);

        // equal power is not net charging
        let s = sample(50, Some(encode_words(&[100, 1800])), Some(encode_words(&[100, 7, 5400])));
        assert_eq!(decode(&s, 5).time_left_seconds, 5400);
    }

    #[test]
    fn full_battery_forces_zero_input() {
        let s = sample(100, Some(encode_words(&[250, 60])), Some(encode_words(&[10, 0, 99999])));
        let state = decode(&s, 5);
        assert_eq!(state.input_watts, 0);
        assert!(!state.is_charging);
        assert_eq!(state.time_left_seconds, 99999);
    }

    #[test]
    fn malformed_payloads_only_zero_their_own_field() {
        let s = sample(60, Some("not base64!!".to_string()), Some(encode_words(&[120, 0, 3600])));
        let state = decode(&s, 5);
        assert_eq!(state.input_watts, 0);
        assert_eq!(state.output_watts, 120);
        assert_eq!(state.battery_percent, 60);

        // valid base64 but only one word
        let s = sample(60, Some(encode_words(&[500, 10])), Some(encode_words(&[120])));
        let state = decode(&s, 5);
        assert_eq!(state.input_watts, 500);
        assert_eq!(state.output_watts, 0);
    }

    #[test]
    fn short_payload_error_carries_hex_dump() {
        let err = unpack::<3>(&encode_words(&[1])).unwrap_err();
        assert_eq!(err, DecodeError::Short { need: 12, got: 4, hex: "01000000".to_string() });
    }

    #[test]
    fn trailing_bytes_are_ignored() {
        assert_eq!(unpack::<2>(&encode_words(&[7, 8, 9])), Ok([7, 8]));
    }

    #[test]
    fn empty_sample_decodes_to_defaults() {
        let state = decode(&RawSample::default(), 5);
        assert_eq!(
            state,
            DecodedState { fast_mode: true, ..DecodedState::default() }
        );
    }

    #[test]
    fn fast_mode_is_inverse_of_switch() {
        let mut s = RawSample::default();
        s.insert(Code::PdSwitch, false);
        assert!(decode(&s, 5).fast_mode);
        s.insert(Code::PdSwitch, true);
        assert!(!decode(&s, 5).fast_mode);
    }

    #[test]
    fn resolve_uses_effective_values() {
        let frame = PowerFrame {
            input_watts: 400,
            output_watts: 50,
            time_to_full: 600,
            time_to_empty: 8000,
            ..PowerFrame::default()
        };
        let state = frame.resolve(0, 50, 5);
        assert_eq!(state.input_watts, 0);
        assert!(!state.is_charging);
        assert_eq!(state.time_left_seconds, 8000);
    }
}
