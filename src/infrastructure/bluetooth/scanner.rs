//! Device discovery with bounded auto-retry.
//!
//! A single scan opens the adapter, lets discovery settle for a fixed window,
//! then filters the accumulated device list by the configured name. The
//! auto-retry loop repeats empty or failed scans on a fixed interval up to a
//! bounded attempt count; running out of attempts is a reported outcome, not
//! an error.

use crate::domain::models::{AppEvent, DeviceDescriptor, MessageSeverity, StatusMessage};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::adapter::SharedAdapter;
use crate::infrastructure::bluetooth::error::BleError;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Discovery knobs, taken from [`Settings`].
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Advertised name to filter for.
    pub device_name: String,
    /// Settle window between starting discovery and reading the device list.
    pub settle: Duration,
    /// Bounded attempt count for the auto-retry loop.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub retry_interval: Duration,
}

impl From<&Settings> for ScanConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            device_name: settings.device_name.clone(),
            settle: Duration::from_millis(settings.scan_settle_ms),
            max_attempts: settings.scan_max_attempts,
            retry_interval: Duration::from_millis(settings.scan_retry_interval_ms),
        }
    }
}

/// Terminal outcome of the auto-retry scan loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Found(Vec<DeviceDescriptor>),
    /// All attempts came back empty. A reported condition, not a fault.
    NotFound {
        attempts: u32,
    },
}

/// BLE scanner for discovering the motor controller.
pub struct Scanner {
    adapter: SharedAdapter,
    config: ScanConfig,
    event_sender: mpsc::UnboundedSender<AppEvent>,
}

impl Scanner {
    pub fn new(
        adapter: SharedAdapter,
        config: ScanConfig,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        Self {
            adapter,
            config,
            event_sender,
        }
    }

    /// One discovery pass: open, discover, settle, filter by name.
    pub async fn scan_once(&self) -> Result<Vec<DeviceDescriptor>, BleError> {
        self.adapter.open().await?;
        self.adapter.start_discovery().await?;

        tokio::time::sleep(self.config.settle).await;

        let devices = self.adapter.devices().await;
        // Discovery is stopped regardless of how the device query went.
        if let Err(err) = self.adapter.stop_discovery().await {
            warn!(error = %err, "failed to stop discovery");
        }

        let matches: Vec<DeviceDescriptor> = devices?
            .into_iter()
            .filter(|d| d.name == self.config.device_name)
            .collect();

        debug!(count = matches.len(), name = %self.config.device_name, "scan finished");
        for device in &matches {
            let _ = self
                .event_sender
                .send(AppEvent::DeviceFound(device.clone()));
        }
        Ok(matches)
    }

    /// Scan until the device shows up or the attempt bound is hit.
    ///
    /// Scan failures are retried just like empty results; attempt counts are
    /// surfaced through the event stream as progress feedback.
    pub async fn scan_with_auto_retry(&self) -> ScanOutcome {
        let max_attempts = self.config.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.config.retry_interval).await;
                self.send_log(
                    format!("Retrying scan... ({}/{})", attempt, max_attempts),
                    MessageSeverity::Info,
                );
            } else {
                self.send_log("Scanning for device...", MessageSeverity::Info);
            }

            match self.scan_once().await {
                Ok(devices) if !devices.is_empty() => {
                    info!(attempt, count = devices.len(), "device found");
                    return ScanOutcome::Found(devices);
                }
                Ok(_) => {
                    debug!(attempt, "no matching devices yet");
                }
                Err(err) => {
                    warn!(attempt, error = %err, "scan attempt failed");
                }
            }
        }

        info!(attempts = max_attempts, "device not found, giving up");
        self.send_log(
            "Device not found. Check that it is powered on.",
            MessageSeverity::Warning,
        );
        ScanOutcome::NotFound {
            attempts: max_attempts,
        }
    }

    fn send_log(&self, message: impl Into<String>, severity: MessageSeverity) {
        let _ = self
            .event_sender
            .send(AppEvent::Log(StatusMessage::new(message, severity)));
    }
}
