//! Resilient BLE client for the ESP32 motor controller.
//!
//! The crate connects to a single known peripheral, survives the flaky parts
//! of BLE (scans that come back empty, connects that fail, reads that never
//! answer) with bounded retries, and keeps a live view of the device through
//! a one-second status poll. All radio access goes through the
//! [`BleAdapter`](infrastructure::bluetooth::BleAdapter) trait, so the whole
//! client runs unchanged against the in-memory mock peripheral.
//!
//! Entry point for applications is
//! [`MotorBleService`](infrastructure::bluetooth::MotorBleService).

pub mod domain;
pub mod infrastructure;

pub use domain::models::{
    AppEvent, ConnectionState, DeviceDescriptor, MessageSeverity, MotorState, StatusMessage,
    SystemStatus,
};
pub use domain::settings::{LogSettings, Settings, SettingsService};
pub use infrastructure::bluetooth::codec::MotorCommand;
pub use infrastructure::bluetooth::{BleAdapter, BleError, MotorBleService, ScanOutcome};
