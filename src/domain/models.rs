//! Domain models shared across the client.

use serde::{Deserialize, Serialize};

/// A device produced by discovery.
///
/// Valid until the connection ends or a new scan starts; never cached across
/// sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceDescriptor {
    /// Opaque transport handle for the device.
    pub id: String,
    /// Advertised device name.
    pub name: String,
    /// Signal strength in dBm at discovery time. Informational only.
    pub rssi: i16,
}

/// Connection lifecycle owned by the session.
///
/// The single source of truth for whether status polling may run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Operational state reported by the motor controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorState {
    Stopped,
    Running,
    Paused,
    Starting,
}

impl MotorState {
    /// Map a wire state code; unknown codes read as `Stopped`.
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Self::Running,
            2 => Self::Paused,
            3 => Self::Starting,
            _ => Self::Stopped,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::Running => "RUNNING",
            Self::Paused => "PAUSED",
            Self::Starting => "STARTING",
        }
    }
}

/// Snapshot of the controller's status at one poll tick.
///
/// Decoded from the status characteristic's JSON payload. Transient: replaced
/// wholesale on every successful poll. Every field carries a default so a
/// partial payload never fails the read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    /// State code (0=stopped, 1=running, 2=paused, 3=starting).
    #[serde(default)]
    pub state: u8,
    #[serde(default = "default_state_name")]
    pub state_name: String,
    /// Seconds left in the current run phase.
    #[serde(default)]
    pub remaining_run_time: u32,
    /// Seconds left in the current stop phase.
    #[serde(default)]
    pub remaining_stop_time: u32,
    #[serde(default)]
    pub current_cycle_count: u32,
    /// Configured run duration in seconds.
    #[serde(default = "default_run_duration")]
    pub run_duration: u32,
    /// Configured stop interval in seconds.
    #[serde(default = "default_stop_duration")]
    pub stop_duration: u32,
    #[serde(default)]
    pub cycle_count: u32,
    #[serde(default)]
    pub auto_start: bool,
    /// Device uptime in milliseconds.
    #[serde(default)]
    pub uptime: u64,
    /// Free heap in bytes.
    #[serde(default)]
    pub free_heap: u64,
    /// Chip temperature in degrees Celsius, when the firmware reports it.
    #[serde(default)]
    pub chip_temperature: Option<f32>,
}

fn default_state_name() -> String {
    "STOPPED".to_string()
}
fn default_run_duration() -> u32 {
    30
}
fn default_stop_duration() -> u32 {
    60
}

impl Default for SystemStatus {
    fn default() -> Self {
        Self {
            state: 0,
            state_name: default_state_name(),
            remaining_run_time: 0,
            remaining_stop_time: 0,
            current_cycle_count: 0,
            run_duration: default_run_duration(),
            stop_duration: default_stop_duration(),
            cycle_count: 0,
            auto_start: false,
            uptime: 0,
            free_heap: 0,
            chip_temperature: None,
        }
    }
}

impl SystemStatus {
    pub fn motor_state(&self) -> MotorState {
        MotorState::from_code(self.state)
    }

    /// Uptime rendered as days/hours/minutes/seconds.
    pub fn formatted_uptime(&self) -> String {
        if self.uptime == 0 {
            return "0s".to_string();
        }
        let total_seconds = self.uptime / 1000;
        let days = total_seconds / 86_400;
        let hours = (total_seconds % 86_400) / 3_600;
        let minutes = (total_seconds % 3_600) / 60;
        let seconds = total_seconds % 60;

        let mut out = String::new();
        if days > 0 {
            out.push_str(&format!("{days}d "));
        }
        if hours > 0 {
            out.push_str(&format!("{hours}h "));
        }
        if minutes > 0 {
            out.push_str(&format!("{minutes}m "));
        }
        if seconds > 0 || out.is_empty() {
            out.push_str(&format!("{seconds}s"));
        }
        out.trim_end().to_string()
    }

    /// Free heap rendered with binary units and one decimal place.
    pub fn formatted_free_heap(&self) -> String {
        if self.free_heap == 0 {
            return "0KB".to_string();
        }
        const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
        let mut value = self.free_heap as f64;
        let mut unit = 0;
        while value >= 1024.0 && unit < UNITS.len() - 1 {
            value /= 1024.0;
            unit += 1;
        }
        let rounded = (value * 10.0).round() / 10.0;
        if rounded.fract() == 0.0 {
            format!("{}{}", rounded as u64, UNITS[unit])
        } else {
            format!("{:.1}{}", rounded, UNITS[unit])
        }
    }
}

/// Events published by the session to its consumer (UI, console, tests).
#[derive(Debug, Clone)]
pub enum AppEvent {
    DeviceFound(DeviceDescriptor),
    ConnectionChanged(ConnectionState),
    SystemStatus(SystemStatus),
    Log(StatusMessage),
}

#[derive(Debug, Clone)]
pub struct StatusMessage {
    pub message: String,
    pub severity: MessageSeverity,
}

impl StatusMessage {
    pub fn new(message: impl Into<String>, severity: MessageSeverity) -> Self {
        Self {
            message: message.into(),
            severity,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageSeverity {
    Info,
    Success,
    Warning,
    Error,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn motor_state_from_code() {
        assert_eq!(MotorState::from_code(0), MotorState::Stopped);
        assert_eq!(MotorState::from_code(1), MotorState::Running);
        assert_eq!(MotorState::from_code(2), MotorState::Paused);
        assert_eq!(MotorState::from_code(3), MotorState::Starting);
        assert_eq!(MotorState::from_code(42), MotorState::Stopped);
    }

    #[test]
    fn default_status_matches_documented_defaults() {
        let status = SystemStatus::default();
        assert_eq!(status.state, 0);
        assert_eq!(status.state_name, "STOPPED");
        assert_eq!(status.run_duration, 30);
        assert_eq!(status.stop_duration, 60);
        assert_eq!(status.motor_state(), MotorState::Stopped);
    }

    #[test]
    fn uptime_formatting() {
        let mut status = SystemStatus::default();
        assert_eq!(status.formatted_uptime(), "0s");

        status.uptime = 5_000;
        assert_eq!(status.formatted_uptime(), "5s");

        status.uptime = 61_000;
        assert_eq!(status.formatted_uptime(), "1m 1s");

        // 1 day, 2 hours, 0 minutes, 3 seconds
        status.uptime = (86_400 + 7_200 + 3) * 1000;
        assert_eq!(status.formatted_uptime(), "1d 2h 3s");
    }

    #[test]
    fn free_heap_formatting() {
        let mut status = SystemStatus::default();
        assert_eq!(status.formatted_free_heap(), "0KB");

        status.free_heap = 512;
        assert_eq!(status.formatted_free_heap(), "512B");

        status.free_heap = 1536;
        assert_eq!(status.formatted_free_heap(), "1.5KB");

        status.free_heap = 2 * 1024 * 1024;
        assert_eq!(status.formatted_free_heap(), "2MB");
    }
}
