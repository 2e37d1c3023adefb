//! Transport boundary.
//!
//! The platform's native radio primitives (adapter power, discovery, GATT
//! enumeration, raw read/write/subscribe) are consumed through the
//! [`BleAdapter`] trait and never reimplemented here. Reads are split the way
//! real stacks split them: `request_read` only acknowledges the request, the
//! value itself arrives later on the [`value_changes`](BleAdapter::value_changes)
//! channel and must be correlated by (device, service, characteristic).

use crate::domain::models::DeviceDescriptor;
use crate::infrastructure::bluetooth::error::BleError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// A GATT service as enumerated from a connected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub uuid: String,
}

/// Capability set of a characteristic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CharacteristicProperties {
    pub read: bool,
    pub write: bool,
    pub notify: bool,
    pub indicate: bool,
}

impl CharacteristicProperties {
    /// Whether the peripheral can push values for this characteristic.
    pub fn supports_notifications(&self) -> bool {
        self.notify || self.indicate
    }
}

/// A characteristic as enumerated from a connected device.
///
/// Invalid once the connection ends; must be re-resolved on reconnect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicDescriptor {
    pub uuid: String,
    pub properties: CharacteristicProperties,
}

/// A characteristic value pushed by the adapter, either in response to a read
/// request or as a notification.
#[derive(Debug, Clone)]
pub struct ValueChange {
    pub device_id: String,
    pub service_id: String,
    pub characteristic_id: String,
    pub value: Vec<u8>,
}

impl ValueChange {
    /// Identity match for read correlation. Service and characteristic UUIDs
    /// compare case-insensitively; some stacks report them upper-cased.
    pub fn matches(&self, device_id: &str, service_id: &str, characteristic_id: &str) -> bool {
        self.device_id == device_id
            && self.service_id.eq_ignore_ascii_case(service_id)
            && self.characteristic_id.eq_ignore_ascii_case(characteristic_id)
    }
}

/// Connection state change reported out-of-band by the platform.
#[derive(Debug, Clone)]
pub struct LinkChange {
    pub device_id: String,
    pub connected: bool,
}

/// Black-box handle to the platform BLE stack.
///
/// All calls are asynchronous; failures surface as [`BleError::Transport`]
/// with the platform's numeric code where one exists.
#[async_trait]
pub trait BleAdapter: Send + Sync {
    /// Open (power up) the adapter. Idempotent.
    async fn open(&self) -> Result<(), BleError>;

    async fn start_discovery(&self) -> Result<(), BleError>;

    async fn stop_discovery(&self) -> Result<(), BleError>;

    /// Devices accumulated by the current discovery session.
    async fn devices(&self) -> Result<Vec<DeviceDescriptor>, BleError>;

    async fn connect(&self, device_id: &str) -> Result<(), BleError>;

    async fn disconnect(&self, device_id: &str) -> Result<(), BleError>;

    async fn services(&self, device_id: &str) -> Result<Vec<ServiceDescriptor>, BleError>;

    async fn characteristics(
        &self,
        device_id: &str,
        service_id: &str,
    ) -> Result<Vec<CharacteristicDescriptor>, BleError>;

    /// Issue a read request. Success only acknowledges the request; the value
    /// arrives as a [`ValueChange`].
    async fn request_read(
        &self,
        device_id: &str,
        service_id: &str,
        characteristic_id: &str,
    ) -> Result<(), BleError>;

    async fn write(
        &self,
        device_id: &str,
        service_id: &str,
        characteristic_id: &str,
        payload: &[u8],
    ) -> Result<(), BleError>;

    /// Enable or disable peripheral-initiated value pushes.
    async fn set_notify(
        &self,
        device_id: &str,
        service_id: &str,
        characteristic_id: &str,
        enable: bool,
    ) -> Result<(), BleError>;

    /// Characteristic value events (read responses and notifications).
    fn value_changes(&self) -> broadcast::Receiver<ValueChange>;

    /// Out-of-band connection state events, including involuntary link loss.
    fn link_changes(&self) -> broadcast::Receiver<LinkChange>;
}

pub type SharedAdapter = Arc<dyn BleAdapter>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_change_matches_case_insensitively() {
        let change = ValueChange {
            device_id: "dev-1".into(),
            service_id: "BEB5483E-36E1-4688-B7F5-EA07361B26A8".into(),
            characteristic_id: "5F9A9C2E-6B1A-4B5E-8B2A-C1C2C3C4C5C9".into(),
            value: vec![],
        };
        assert!(change.matches(
            "dev-1",
            "beb5483e-36e1-4688-b7f5-ea07361b26a8",
            "5f9a9c2e-6b1a-4b5e-8b2a-c1c2c3c4c5c9"
        ));
        assert!(!change.matches(
            "dev-2",
            "beb5483e-36e1-4688-b7f5-ea07361b26a8",
            "5f9a9c2e-6b1a-4b5e-8b2a-c1c2c3c4c5c9"
        ));
    }

    #[test]
    fn notification_capability() {
        let mut props = CharacteristicProperties::default();
        assert!(!props.supports_notifications());
        props.indicate = true;
        assert!(props.supports_notifications());
        props = CharacteristicProperties {
            notify: true,
            ..Default::default()
        };
        assert!(props.supports_notifications());
    }
}
