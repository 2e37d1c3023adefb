//! Connect-with-retry and connection verification.
//!
//! A connect attempt is only counted as successful once the link has had a
//! short stabilization pause and a service re-enumeration (the cheapest
//! liveness probe the stack offers) has succeeded. Verification failure is
//! treated exactly like a failed connect. The delay between attempts grows
//! linearly with the attempt number.

use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::adapter::BleAdapter;
use crate::infrastructure::bluetooth::error::{codes, BleError};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct ConnectRetryConfig {
    pub max_attempts: u32,
    /// Base delay; attempt `n` waits `initial_delay * n` before attempt `n+1`.
    pub initial_delay: Duration,
    /// Pause after connect before verification.
    pub stabilize_delay: Duration,
}

impl Default for ConnectRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1_000),
            stabilize_delay: Duration::from_millis(500),
        }
    }
}

impl From<&Settings> for ConnectRetryConfig {
    fn from(settings: &Settings) -> Self {
        Self {
            max_attempts: settings.connect_max_attempts,
            initial_delay: Duration::from_millis(settings.connect_retry_delay_ms),
            stabilize_delay: Duration::from_millis(settings.stabilize_delay_ms),
        }
    }
}

/// Connect to a device, retrying with linearly increasing delays.
///
/// Exhausting all attempts propagates the last error.
pub async fn connect_with_retry(
    adapter: &dyn BleAdapter,
    device_id: &str,
    config: &ConnectRetryConfig,
) -> Result<(), BleError> {
    let max_attempts = config.max_attempts.max(1);
    let mut last_error = BleError::Transport {
        code: codes::NO_CONNECTION,
        message: "connect not attempted".to_string(),
    };

    for attempt in 1..=max_attempts {
        debug!(device_id, attempt, max_attempts, "connect attempt");
        match adapter.connect(device_id).await {
            Ok(()) => {
                // Let the link settle before probing it.
                tokio::time::sleep(config.stabilize_delay).await;
                if verify_connection(adapter, device_id).await {
                    info!(device_id, attempt, "connected and verified");
                    return Ok(());
                }
                warn!(device_id, attempt, "connection verification failed");
                last_error = BleError::Transport {
                    code: codes::NO_CONNECTION,
                    message: "connection verification failed".to_string(),
                };
            }
            Err(err) => {
                warn!(device_id, attempt, error = %err, "connect attempt failed");
                last_error = err;
            }
        }

        if attempt < max_attempts {
            let delay = config.initial_delay * attempt;
            debug!(device_id, delay_ms = delay.as_millis() as u64, "waiting before retry");
            tokio::time::sleep(delay).await;
        }
    }

    warn!(device_id, error = %last_error, "all connect attempts failed");
    Err(last_error)
}

/// Probe the connection by re-enumerating services. Never raises; any
/// transport failure reads as "not connected".
pub async fn verify_connection(adapter: &dyn BleAdapter, device_id: &str) -> bool {
    match adapter.services(device_id).await {
        Ok(_) => true,
        Err(err) => {
            warn!(device_id, error = %err, "connection verification probe failed");
            false
        }
    }
}
