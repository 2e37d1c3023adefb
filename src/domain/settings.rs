use crate::infrastructure::bluetooth::codec;
use crate::infrastructure::bluetooth::error::codes;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            console_logging_enabled: default_true(),
            file_logging_enabled: default_false(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "motor_control_client".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Runtime settings for the BLE session.
///
/// Every knob has a serde default so a partial settings file keeps working
/// after upgrades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Advertised name the scanner filters for.
    #[serde(default = "default_device_name")]
    pub device_name: String,

    // Wire format
    #[serde(default = "default_service_uuid")]
    pub ble_service_uuid: String,
    #[serde(default = "default_run_duration_uuid")]
    pub run_duration_char_uuid: String,
    #[serde(default = "default_stop_duration_uuid")]
    pub stop_duration_char_uuid: String,
    #[serde(default = "default_system_control_uuid")]
    pub system_control_char_uuid: String,
    #[serde(default = "default_status_query_uuid")]
    pub status_query_char_uuid: String,

    // Discovery
    /// Settle window after starting discovery before the device list is read.
    #[serde(default = "default_scan_settle_ms")]
    pub scan_settle_ms: u64,
    /// Bounded scan attempts before reporting "not found".
    #[serde(default = "default_scan_max_attempts")]
    pub scan_max_attempts: u32,
    /// Fixed delay between scan attempts.
    #[serde(default = "default_scan_retry_interval_ms")]
    pub scan_retry_interval_ms: u64,

    // Connection
    #[serde(default = "default_connect_max_attempts")]
    pub connect_max_attempts: u32,
    /// Base delay; actual inter-attempt delay grows linearly with the attempt.
    #[serde(default = "default_connect_retry_delay_ms")]
    pub connect_retry_delay_ms: u64,
    /// Pause after a successful connect before verifying it.
    #[serde(default = "default_stabilize_delay_ms")]
    pub stabilize_delay_ms: u64,

    // Transport
    /// Deadline for a read's correlated value notification.
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    // Status polling
    #[serde(default = "default_status_poll_interval_ms")]
    pub status_poll_interval_ms: u64,
    /// Transport codes that end the connection when seen during a poll.
    #[serde(default = "default_fatal_error_codes")]
    pub fatal_error_codes: Vec<i32>,

    #[serde(default)]
    pub log_settings: LogSettings,
}

fn default_device_name() -> String {
    codec::DEVICE_NAME.to_string()
}
fn default_service_uuid() -> String {
    codec::SERVICE_UUID.to_string()
}
fn default_run_duration_uuid() -> String {
    codec::RUN_DURATION_CHAR_UUID.to_string()
}
fn default_stop_duration_uuid() -> String {
    codec::STOP_DURATION_CHAR_UUID.to_string()
}
fn default_system_control_uuid() -> String {
    codec::SYSTEM_CONTROL_CHAR_UUID.to_string()
}
fn default_status_query_uuid() -> String {
    codec::STATUS_QUERY_CHAR_UUID.to_string()
}
fn default_scan_settle_ms() -> u64 {
    2_000
}
fn default_scan_max_attempts() -> u32 {
    10
}
fn default_scan_retry_interval_ms() -> u64 {
    12_000
}
fn default_connect_max_attempts() -> u32 {
    3
}
fn default_connect_retry_delay_ms() -> u64 {
    1_000
}
fn default_stabilize_delay_ms() -> u64 {
    500
}
fn default_read_timeout_ms() -> u64 {
    5_000
}
fn default_status_poll_interval_ms() -> u64 {
    1_000
}
fn default_fatal_error_codes() -> Vec<i32> {
    vec![codes::NO_SERVICE, codes::NO_CONNECTION, codes::NO_RESPONSE]
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            ble_service_uuid: default_service_uuid(),
            run_duration_char_uuid: default_run_duration_uuid(),
            stop_duration_char_uuid: default_stop_duration_uuid(),
            system_control_char_uuid: default_system_control_uuid(),
            status_query_char_uuid: default_status_query_uuid(),
            scan_settle_ms: default_scan_settle_ms(),
            scan_max_attempts: default_scan_max_attempts(),
            scan_retry_interval_ms: default_scan_retry_interval_ms(),
            connect_max_attempts: default_connect_max_attempts(),
            connect_retry_delay_ms: default_connect_retry_delay_ms(),
            stabilize_delay_ms: default_stabilize_delay_ms(),
            read_timeout_ms: default_read_timeout_ms(),
            status_poll_interval_ms: default_status_poll_interval_ms(),
            fatal_error_codes: default_fatal_error_codes(),
            log_settings: LogSettings::default(),
        }
    }
}

/// Loads and persists [`Settings`] under the user config directory.
pub struct SettingsService {
    settings: Settings,
    path: PathBuf,
}

impl SettingsService {
    /// Load from disk, falling back to defaults when the file is missing or
    /// unreadable.
    pub fn load() -> Self {
        let path = Self::settings_path();
        let settings = match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str(&contents) {
                Ok(settings) => settings,
                Err(err) => {
                    tracing::warn!(error = %err, path = %path.display(), "settings file unreadable, using defaults");
                    Settings::default()
                }
            },
            Err(_) => Settings::default(),
        };
        Self { settings, path }
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.path, contents)?;
        Ok(())
    }

    fn settings_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("motor-control-client")
            .join("settings.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let settings = Settings::default();
        assert_eq!(settings.device_name, "ESP32-Motor-Control");
        assert_eq!(settings.ble_service_uuid, codec::SERVICE_UUID);
        assert_eq!(settings.scan_max_attempts, 10);
        assert_eq!(settings.scan_retry_interval_ms, 12_000);
        assert_eq!(settings.connect_max_attempts, 3);
        assert_eq!(settings.connect_retry_delay_ms, 1_000);
        assert_eq!(settings.read_timeout_ms, 5_000);
        assert_eq!(settings.fatal_error_codes, vec![10004, 10006, 10012]);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let settings: Settings =
            serde_json::from_str(r#"{"device_name": "Bench-Motor", "scan_max_attempts": 2}"#)
                .unwrap();
        assert_eq!(settings.device_name, "Bench-Motor");
        assert_eq!(settings.scan_max_attempts, 2);
        assert_eq!(settings.status_poll_interval_ms, 1_000);
        assert_eq!(settings.log_settings.level, "info");
    }

    #[test]
    fn settings_round_trip() {
        let settings = Settings::default();
        let json = serde_json::to_string(&settings).unwrap();
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back.ble_service_uuid, settings.ble_service_uuid);
        assert_eq!(back.fatal_error_codes, settings.fatal_error_codes);
    }
}
