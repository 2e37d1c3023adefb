//! Service and characteristic resolution.
//!
//! Characteristic handles are invalidated whenever the connection drops, so
//! resolution deliberately re-enumerates on every call instead of caching.

use crate::infrastructure::bluetooth::adapter::{BleAdapter, CharacteristicProperties};
use crate::infrastructure::bluetooth::error::BleError;
use tracing::debug;

/// A characteristic located on a live connection.
#[derive(Debug, Clone)]
pub struct ResolvedCharacteristic {
    pub service_id: String,
    pub characteristic_id: String,
    pub properties: CharacteristicProperties,
}

/// Locate `target_characteristic_uuid` within `service_uuid` on the device.
///
/// UUIDs match case-insensitively. Fails with [`BleError::ServiceNotFound`] or
/// [`BleError::CharacteristicNotFound`] so callers can tell the two apart.
pub async fn resolve(
    adapter: &dyn BleAdapter,
    device_id: &str,
    service_uuid: &str,
    target_characteristic_uuid: &str,
) -> Result<ResolvedCharacteristic, BleError> {
    let services = adapter.services(device_id).await?;
    debug!(
        device_id,
        count = services.len(),
        uuids = ?services.iter().map(|s| s.uuid.as_str()).collect::<Vec<_>>(),
        "enumerated services"
    );

    let service = services
        .iter()
        .find(|s| s.uuid.eq_ignore_ascii_case(service_uuid))
        .ok_or_else(|| BleError::ServiceNotFound(service_uuid.to_string()))?;

    let characteristics = adapter.characteristics(device_id, &service.uuid).await?;
    debug!(
        service = %service.uuid,
        count = characteristics.len(),
        "enumerated characteristics"
    );

    let target = characteristics
        .into_iter()
        .find(|c| c.uuid.eq_ignore_ascii_case(target_characteristic_uuid))
        .ok_or_else(|| BleError::CharacteristicNotFound(target_characteristic_uuid.to_string()))?;

    debug!(characteristic = %target.uuid, properties = ?target.properties, "resolved characteristic");

    Ok(ResolvedCharacteristic {
        service_id: service.uuid.clone(),
        characteristic_id: target.uuid,
        properties: target.properties,
    })
}
