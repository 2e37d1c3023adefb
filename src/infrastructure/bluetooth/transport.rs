//! Characteristic read/write/subscribe primitives and their retry wrappers.
//!
//! A read is two asynchronous events joined together: the request
//! acknowledgment and the later value notification matching the same
//! (device, service, characteristic) identity. The value subscription is a
//! broadcast receiver created *before* the request and dropped on every exit
//! path, so neither success, timeout nor a transport error can leak a
//! listener.

use crate::infrastructure::bluetooth::adapter::BleAdapter;
use crate::infrastructure::bluetooth::codec::buffer_to_hex;
use crate::infrastructure::bluetooth::error::BleError;
use crate::infrastructure::bluetooth::resolver::ResolvedCharacteristic;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

/// Default deadline for a read's correlated value notification.
pub const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Read a characteristic value, awaiting the correlated notification.
pub async fn read(
    adapter: &dyn BleAdapter,
    device_id: &str,
    target: &ResolvedCharacteristic,
    timeout: Duration,
) -> Result<Vec<u8>, BleError> {
    // Subscribe before requesting so a fast response cannot slip past us.
    let mut changes = adapter.value_changes();

    adapter
        .request_read(device_id, &target.service_id, &target.characteristic_id)
        .await?;

    let wait_for_value = async {
        loop {
            match changes.recv().await {
                Ok(change)
                    if change.matches(device_id, &target.service_id, &target.characteristic_id) =>
                {
                    debug!(
                        characteristic = %target.characteristic_id,
                        len = change.value.len(),
                        "read value received"
                    );
                    return Ok(change.value);
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "value channel lagged during read");
                    continue;
                }
                Err(RecvError::Closed) => return Err(BleError::ReadTimeout),
            }
        }
    };

    match tokio::time::timeout(timeout, wait_for_value).await {
        Ok(result) => result,
        Err(_) => {
            warn!(characteristic = %target.characteristic_id, "read timed out");
            Err(BleError::ReadTimeout)
        }
    }
}

/// Write a value to a characteristic. Single request/response.
pub async fn write(
    adapter: &dyn BleAdapter,
    device_id: &str,
    target: &ResolvedCharacteristic,
    payload: &[u8],
) -> Result<(), BleError> {
    debug!(
        characteristic = %target.characteristic_id,
        payload = %buffer_to_hex(payload),
        "writing characteristic"
    );
    adapter
        .write(
            device_id,
            &target.service_id,
            &target.characteristic_id,
            payload,
        )
        .await
}

/// [`read`] with bounded attempts and a fixed inter-attempt delay.
///
/// Exhausting the attempts re-raises the last error.
pub async fn read_with_retry(
    adapter: &dyn BleAdapter,
    device_id: &str,
    target: &ResolvedCharacteristic,
    timeout: Duration,
    max_attempts: u32,
    delay: Duration,
) -> Result<Vec<u8>, BleError> {
    let mut last_error = BleError::ReadTimeout;
    for attempt in 1..=max_attempts.max(1) {
        match read(adapter, device_id, target, timeout).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                warn!(
                    attempt,
                    max_attempts,
                    error = %err,
                    characteristic = %target.characteristic_id,
                    "read attempt failed"
                );
                last_error = err;
            }
        }
        if attempt < max_attempts {
            tokio::time::sleep(delay).await;
        }
    }
    Err(last_error)
}

/// Enable notifications on a characteristic.
///
/// Fails with [`BleError::NotifyUnsupported`] when the capability set lacks
/// both notify and indicate; callers fall back to polling in that case.
pub async fn subscribe(
    adapter: &dyn BleAdapter,
    device_id: &str,
    target: &ResolvedCharacteristic,
) -> Result<(), BleError> {
    if !target.properties.supports_notifications() {
        return Err(BleError::NotifyUnsupported(
            target.characteristic_id.clone(),
        ));
    }
    adapter
        .set_notify(
            device_id,
            &target.service_id,
            &target.characteristic_id,
            true,
        )
        .await
}

/// Disable notifications on a characteristic.
pub async fn unsubscribe(
    adapter: &dyn BleAdapter,
    device_id: &str,
    target: &ResolvedCharacteristic,
) -> Result<(), BleError> {
    adapter
        .set_notify(
            device_id,
            &target.service_id,
            &target.characteristic_id,
            false,
        )
        .await
}

/// [`subscribe`] with bounded attempts and a fixed inter-attempt delay.
///
/// A missing notify capability is permanent and fails immediately instead of
/// burning attempts.
pub async fn subscribe_with_retry(
    adapter: &dyn BleAdapter,
    device_id: &str,
    target: &ResolvedCharacteristic,
    max_attempts: u32,
    delay: Duration,
) -> Result<(), BleError> {
    let mut last_error = BleError::NotifyUnsupported(target.characteristic_id.clone());
    for attempt in 1..=max_attempts.max(1) {
        match subscribe(adapter, device_id, target).await {
            Ok(()) => return Ok(()),
            Err(err @ BleError::NotifyUnsupported(_)) => return Err(err),
            Err(err) => {
                warn!(
                    attempt,
                    max_attempts,
                    error = %err,
                    characteristic = %target.characteristic_id,
                    "notify subscription attempt failed"
                );
                last_error = err;
            }
        }
        if attempt < max_attempts {
            tokio::time::sleep(delay).await;
        }
    }
    Err(last_error)
}
