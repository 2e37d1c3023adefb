//! Motor control wire protocol.
//!
//! UUIDs for the ESP32 motor service, command values, and the pure codec
//! functions converting between raw byte buffers and domain values. The codec
//! is deliberately tolerant on the decode side: a garbled status buffer yields
//! the documented default record instead of an error.

use crate::domain::models::SystemStatus;
use crate::infrastructure::bluetooth::error::BleError;
use tracing::warn;

/// Advertised name of the motor controller peripheral.
pub const DEVICE_NAME: &str = "ESP32-Motor-Control";

/// Motor control BLE service UUID.
pub const SERVICE_UUID: &str = "beb5483e-36e1-4688-b7f5-ea07361b26a8";

/// Run duration characteristic (write, u32 little-endian seconds).
pub const RUN_DURATION_CHAR_UUID: &str = "2f7a9c2e-6b1a-4b5e-8b2a-c1c2c3c4c5c6";

/// Stop interval characteristic (write, u32 little-endian seconds).
pub const STOP_DURATION_CHAR_UUID: &str = "3f8a9c2e-6b1a-4b5e-8b2a-c1c2c3c4c5c7";

/// System control characteristic (write, single byte: 0 = stop, 1 = run).
pub const SYSTEM_CONTROL_CHAR_UUID: &str = "4f9a9c2e-6b1a-4b5e-8b2a-c1c2c3c4c5c8";

/// Status query characteristic (read/notify, UTF-8 JSON).
pub const STATUS_QUERY_CHAR_UUID: &str = "5f9a9c2e-6b1a-4b5e-8b2a-c1c2c3c4c5c9";

/// Commands accepted by the system-control characteristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorCommand {
    Stop,
    Run,
}

impl MotorCommand {
    pub fn as_byte(self) -> u8 {
        match self {
            Self::Stop => 0,
            Self::Run => 1,
        }
    }
}

/// Encode an unsigned integer as a little-endian buffer of `width` bytes.
///
/// Only widths 1, 2 and 4 exist on the wire. Values wider than the requested
/// width are masked to it, matching the peripheral's firmware expectations.
pub fn encode_le(value: u32, width: usize) -> Result<Vec<u8>, BleError> {
    match width {
        1 => Ok(vec![value as u8]),
        2 => Ok((value as u16).to_le_bytes().to_vec()),
        4 => Ok(value.to_le_bytes().to_vec()),
        other => Err(BleError::UnsupportedWidth(other)),
    }
}

/// Decode a byte buffer as UTF-8 text.
///
/// Handles 1- to 4-byte sequences explicitly. A sequence cut off at the end of
/// the buffer truncates the output; a stray or invalid lead byte is dropped.
/// Never fails.
pub fn decode_utf8(buffer: &[u8]) -> String {
    let mut out = String::with_capacity(buffer.len());
    let mut i = 0;
    while i < buffer.len() {
        let byte = buffer[i];
        let len = if byte < 0x80 {
            1
        } else if byte & 0xE0 == 0xC0 {
            2
        } else if byte & 0xF0 == 0xE0 {
            3
        } else if byte & 0xF8 == 0xF0 {
            4
        } else {
            // stray continuation byte
            i += 1;
            continue;
        };
        if i + len > buffer.len() {
            // truncated trailing sequence
            break;
        }
        let code_point = match len {
            1 => byte as u32,
            2 => ((byte & 0x1F) as u32) << 6 | (buffer[i + 1] & 0x3F) as u32,
            3 => {
                ((byte & 0x0F) as u32) << 12
                    | ((buffer[i + 1] & 0x3F) as u32) << 6
                    | (buffer[i + 2] & 0x3F) as u32
            }
            _ => {
                ((byte & 0x07) as u32) << 18
                    | ((buffer[i + 1] & 0x3F) as u32) << 12
                    | ((buffer[i + 2] & 0x3F) as u32) << 6
                    | (buffer[i + 3] & 0x3F) as u32
            }
        };
        if let Some(c) = char::from_u32(code_point) {
            out.push(c);
        }
        i += len;
    }
    out
}

/// Decode the status characteristic's JSON payload.
///
/// Empty, blank or unparsable buffers yield [`SystemStatus::default`] — the
/// poll loop relies on that tolerance instead of treating a bad read as a
/// failure.
pub fn decode_status_json(buffer: &[u8]) -> SystemStatus {
    if buffer.is_empty() {
        warn!("empty status buffer, using default status");
        return SystemStatus::default();
    }

    let text = decode_utf8(buffer);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        warn!("blank status payload, using default status");
        return SystemStatus::default();
    }

    match serde_json::from_str(trimmed) {
        Ok(status) => status,
        Err(err) => {
            warn!(error = %err, "status JSON parse failed, using default status");
            SystemStatus::default()
        }
    }
}

/// Hex dump of a buffer for write-path diagnostics.
pub fn buffer_to_hex(buffer: &[u8]) -> String {
    buffer.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_le_widths() {
        assert_eq!(encode_le(0x2A, 1).unwrap(), vec![0x2A]);
        assert_eq!(encode_le(0x1234, 2).unwrap(), vec![0x34, 0x12]);
        assert_eq!(
            encode_le(0xDEADBEEF, 4).unwrap(),
            vec![0xEF, 0xBE, 0xAD, 0xDE]
        );
    }

    #[test]
    fn encode_le_rejects_unsupported_width() {
        assert_eq!(encode_le(1, 3), Err(BleError::UnsupportedWidth(3)));
        assert_eq!(encode_le(1, 0), Err(BleError::UnsupportedWidth(0)));
    }

    #[test]
    fn encode_le_masks_to_width() {
        assert_eq!(encode_le(0x1FF, 1).unwrap(), vec![0xFF]);
        assert_eq!(encode_le(0x1_0001, 2).unwrap(), vec![0x01, 0x00]);
    }

    #[test]
    fn encode_le_round_trips() {
        for (value, width) in [(0u32, 1), (255, 1), (40_000, 2), (3_000_000_000, 4)] {
            let buffer = encode_le(value, width).unwrap();
            assert_eq!(buffer.len(), width);
            let mut padded = [0u8; 4];
            padded[..width].copy_from_slice(&buffer);
            assert_eq!(u32::from_le_bytes(padded), value);
        }
    }

    #[test]
    fn decode_utf8_round_trips_multibyte() {
        for text in ["hello", "héllo", "日本語テスト", "🚀 motor 🟢", "мотор"] {
            assert_eq!(decode_utf8(text.as_bytes()), text);
        }
    }

    #[test]
    fn decode_utf8_truncates_incomplete_tail() {
        let mut bytes = "ok日".as_bytes().to_vec();
        bytes.pop(); // cut the 3-byte sequence short
        assert_eq!(decode_utf8(&bytes), "ok");
    }

    #[test]
    fn decode_utf8_drops_stray_continuation_bytes() {
        assert_eq!(decode_utf8(&[0x80, b'a', 0xBF, b'b']), "ab");
    }

    #[test]
    fn decode_status_json_defaults_on_garbage() {
        for buffer in [&b""[..], b"   ", b"not json", &[0xFF, 0xFE]] {
            let status = decode_status_json(buffer);
            assert_eq!(status.state, 0);
            assert_eq!(status.state_name, "STOPPED");
            assert_eq!(status.run_duration, 30);
            assert_eq!(status.stop_duration, 60);
        }
    }

    #[test]
    fn decode_status_json_fills_missing_fields() {
        let status = decode_status_json(br#"{"state": 1, "stateName": "RUNNING"}"#);
        assert_eq!(status.state, 1);
        assert_eq!(status.state_name, "RUNNING");
        assert_eq!(status.run_duration, 30);
        assert_eq!(status.stop_duration, 60);
        assert_eq!(status.cycle_count, 0);
        assert!(!status.auto_start);
        assert_eq!(status.chip_temperature, None);
    }

    #[test]
    fn decode_status_json_full_record() {
        let status = decode_status_json(
            br#"{"state":2,"stateName":"PAUSED","remainingRunTime":12,"remainingStopTime":3,
                "currentCycleCount":7,"runDuration":45,"stopDuration":90,"cycleCount":100,
                "autoStart":true,"uptime":61000,"freeHeap":152400,"chipTemperature":41.5}"#,
        );
        assert_eq!(status.state, 2);
        assert_eq!(status.remaining_run_time, 12);
        assert_eq!(status.run_duration, 45);
        assert_eq!(status.cycle_count, 100);
        assert!(status.auto_start);
        assert_eq!(status.uptime, 61_000);
        assert_eq!(status.chip_temperature, Some(41.5));
    }

    #[test]
    fn hex_dump() {
        assert_eq!(buffer_to_hex(&[0x00, 0x2A, 0xFF]), "002aff");
    }
}
