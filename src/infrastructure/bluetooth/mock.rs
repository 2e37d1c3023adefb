//! In-memory peripheral implementing the transport boundary.
//!
//! Backs the integration tests and the demo console. Behavior is scriptable:
//! connect attempts can be made to fail in sequence, read requests can return
//! errors or stay silent (to exercise the read timeout), and link loss can be
//! injected on demand.

use crate::domain::models::DeviceDescriptor;
use crate::infrastructure::bluetooth::adapter::{
    BleAdapter, CharacteristicDescriptor, CharacteristicProperties, LinkChange, ServiceDescriptor,
    ValueChange,
};
use crate::infrastructure::bluetooth::codec;
use crate::infrastructure::bluetooth::error::{codes, BleError};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::broadcast;

/// Default id of the simulated motor controller.
pub const MOCK_DEVICE_ID: &str = "mock-esp32-motor-1";

#[derive(Default)]
struct MockState {
    devices: Vec<DeviceDescriptor>,
    services: Vec<ServiceDescriptor>,
    characteristics: HashMap<String, Vec<CharacteristicDescriptor>>,
    /// Current value per characteristic uuid (lower-cased).
    values: HashMap<String, Vec<u8>>,
    connected: HashSet<String>,
    subscriptions: HashSet<String>,
    /// One-shot connect results consumed before the default behavior.
    connect_script: VecDeque<Result<(), BleError>>,
    /// One-shot read-request failures consumed before the default behavior.
    read_failures: VecDeque<BleError>,
    /// Persistent read-request failure applied after the one-shot queue.
    persistent_read_error: Option<BleError>,
    /// When false, read requests are acknowledged but no value is delivered.
    respond_to_reads: bool,
    /// When true, service enumeration fails even while connected.
    fail_verification: bool,
    scan_count: u32,
    connect_attempts: u32,
    read_requests: u32,
    writes: Vec<(String, Vec<u8>)>,
}

pub struct MockPeripheral {
    state: Mutex<MockState>,
    value_tx: broadcast::Sender<ValueChange>,
    link_tx: broadcast::Sender<LinkChange>,
}

impl MockPeripheral {
    /// An advertising motor controller exposing the full motor service.
    pub fn motor_device() -> Self {
        let mut state = MockState {
            respond_to_reads: true,
            ..Default::default()
        };
        state.devices.push(DeviceDescriptor {
            id: MOCK_DEVICE_ID.to_string(),
            name: codec::DEVICE_NAME.to_string(),
            rssi: -58,
        });
        state.services.push(ServiceDescriptor {
            uuid: codec::SERVICE_UUID.to_string(),
        });

        let write_only = CharacteristicProperties {
            write: true,
            ..Default::default()
        };
        let chars = vec![
            CharacteristicDescriptor {
                uuid: codec::RUN_DURATION_CHAR_UUID.to_string(),
                properties: write_only,
            },
            CharacteristicDescriptor {
                uuid: codec::STOP_DURATION_CHAR_UUID.to_string(),
                properties: write_only,
            },
            CharacteristicDescriptor {
                uuid: codec::SYSTEM_CONTROL_CHAR_UUID.to_string(),
                properties: write_only,
            },
            CharacteristicDescriptor {
                uuid: codec::STATUS_QUERY_CHAR_UUID.to_string(),
                properties: CharacteristicProperties {
                    read: true,
                    notify: true,
                    ..Default::default()
                },
            },
        ];
        state
            .characteristics
            .insert(codec::SERVICE_UUID.to_lowercase(), chars);
        state.values.insert(
            codec::STATUS_QUERY_CHAR_UUID.to_lowercase(),
            br#"{"state":1,"stateName":"RUNNING","remainingRunTime":25,"remainingStopTime":0,
                "currentCycleCount":3,"runDuration":30,"stopDuration":60,"cycleCount":12,
                "autoStart":false,"uptime":93000,"freeHeap":164532,"chipTemperature":38.2}"#
                .to_vec(),
        );

        Self::with_state(state)
    }

    /// A peripheral that never shows up in scans.
    pub fn absent() -> Self {
        Self::with_state(MockState {
            respond_to_reads: true,
            ..Default::default()
        })
    }

    fn with_state(state: MockState) -> Self {
        let (value_tx, _) = broadcast::channel(64);
        let (link_tx, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(state),
            value_tx,
            link_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -- scripting -------------------------------------------------------

    /// Queue a result for each upcoming connect attempt.
    pub fn script_connect(&self, results: impl IntoIterator<Item = Result<(), BleError>>) {
        self.lock().connect_script.extend(results);
    }

    /// Queue one-shot read-request failures.
    pub fn script_read_failures(&self, errors: impl IntoIterator<Item = BleError>) {
        self.lock().read_failures.extend(errors);
    }

    /// Make every read request fail from now on.
    pub fn fail_reads_with(&self, error: BleError) {
        self.lock().persistent_read_error = Some(error);
    }

    /// When disabled, read requests succeed but no value event follows.
    pub fn set_respond_to_reads(&self, respond: bool) {
        self.lock().respond_to_reads = respond;
    }

    /// Make service enumeration fail, so connection verification fails.
    pub fn set_fail_verification(&self, fail: bool) {
        self.lock().fail_verification = fail;
    }

    /// Replace the stored value of a characteristic.
    pub fn set_characteristic_value(&self, characteristic_uuid: &str, value: Vec<u8>) {
        self.lock()
            .values
            .insert(characteristic_uuid.to_lowercase(), value);
    }

    /// Strip a characteristic from the service table.
    pub fn remove_characteristic(&self, characteristic_uuid: &str) {
        for chars in self.lock().characteristics.values_mut() {
            chars.retain(|c| !c.uuid.eq_ignore_ascii_case(characteristic_uuid));
        }
    }

    /// Replace a characteristic's capability set.
    pub fn set_characteristic_properties(
        &self,
        characteristic_uuid: &str,
        properties: CharacteristicProperties,
    ) {
        for chars in self.lock().characteristics.values_mut() {
            for c in chars.iter_mut() {
                if c.uuid.eq_ignore_ascii_case(characteristic_uuid) {
                    c.properties = properties;
                }
            }
        }
    }

    /// Report an involuntary disconnect for the device.
    pub fn drop_link(&self, device_id: &str) {
        self.lock().connected.remove(device_id);
        let _ = self.link_tx.send(LinkChange {
            device_id: device_id.to_string(),
            connected: false,
        });
    }

    /// Push a notification value as the peripheral would.
    pub fn push_value(&self, service_id: &str, characteristic_id: &str, value: Vec<u8>) {
        let _ = self.value_tx.send(ValueChange {
            device_id: MOCK_DEVICE_ID.to_string(),
            service_id: service_id.to_string(),
            characteristic_id: characteristic_id.to_string(),
            value,
        });
    }

    // -- counters --------------------------------------------------------

    pub fn scan_count(&self) -> u32 {
        self.lock().scan_count
    }

    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    pub fn read_requests(&self) -> u32 {
        self.lock().read_requests
    }

    pub fn writes(&self) -> Vec<(String, Vec<u8>)> {
        self.lock().writes.clone()
    }

    /// Live subscriber count on the link event channel.
    pub fn link_receiver_count(&self) -> usize {
        self.link_tx.receiver_count()
    }

    pub fn is_subscribed(&self, characteristic_uuid: &str) -> bool {
        self.lock()
            .subscriptions
            .contains(&characteristic_uuid.to_lowercase())
    }
}

#[async_trait]
impl BleAdapter for MockPeripheral {
    async fn open(&self) -> Result<(), BleError> {
        Ok(())
    }

    async fn start_discovery(&self) -> Result<(), BleError> {
        self.lock().scan_count += 1;
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<(), BleError> {
        Ok(())
    }

    async fn devices(&self) -> Result<Vec<DeviceDescriptor>, BleError> {
        Ok(self.lock().devices.clone())
    }

    async fn connect(&self, device_id: &str) -> Result<(), BleError> {
        let result = {
            let mut state = self.lock();
            state.connect_attempts += 1;
            if let Some(scripted) = state.connect_script.pop_front() {
                scripted
            } else if state.devices.iter().any(|d| d.id == device_id) {
                Ok(())
            } else {
                Err(BleError::Transport {
                    code: codes::NO_CONNECTION,
                    message: format!("unknown device {device_id}"),
                })
            }
        };
        if result.is_ok() {
            self.lock().connected.insert(device_id.to_string());
            let _ = self.link_tx.send(LinkChange {
                device_id: device_id.to_string(),
                connected: true,
            });
        }
        result
    }

    async fn disconnect(&self, device_id: &str) -> Result<(), BleError> {
        self.lock().connected.remove(device_id);
        let _ = self.link_tx.send(LinkChange {
            device_id: device_id.to_string(),
            connected: false,
        });
        Ok(())
    }

    async fn services(&self, device_id: &str) -> Result<Vec<ServiceDescriptor>, BleError> {
        let state = self.lock();
        if !state.connected.contains(device_id) || state.fail_verification {
            return Err(BleError::Transport {
                code: codes::NO_CONNECTION,
                message: "not connected".to_string(),
            });
        }
        Ok(state.services.clone())
    }

    async fn characteristics(
        &self,
        device_id: &str,
        service_id: &str,
    ) -> Result<Vec<CharacteristicDescriptor>, BleError> {
        let state = self.lock();
        if !state.connected.contains(device_id) {
            return Err(BleError::Transport {
                code: codes::NO_CONNECTION,
                message: "not connected".to_string(),
            });
        }
        Ok(state
            .characteristics
            .get(&service_id.to_lowercase())
            .cloned()
            .unwrap_or_default())
    }

    async fn request_read(
        &self,
        device_id: &str,
        service_id: &str,
        characteristic_id: &str,
    ) -> Result<(), BleError> {
        let value = {
            let mut state = self.lock();
            state.read_requests += 1;
            if !state.connected.contains(device_id) {
                return Err(BleError::Transport {
                    code: codes::NO_CONNECTION,
                    message: "not connected".to_string(),
                });
            }
            if let Some(err) = state.read_failures.pop_front() {
                return Err(err);
            }
            if let Some(err) = state.persistent_read_error.clone() {
                return Err(err);
            }
            if !state.respond_to_reads {
                return Ok(());
            }
            state
                .values
                .get(&characteristic_id.to_lowercase())
                .cloned()
                .unwrap_or_default()
        };

        let _ = self.value_tx.send(ValueChange {
            device_id: device_id.to_string(),
            service_id: service_id.to_string(),
            characteristic_id: characteristic_id.to_string(),
            value,
        });
        Ok(())
    }

    async fn write(
        &self,
        device_id: &str,
        _service_id: &str,
        characteristic_id: &str,
        payload: &[u8],
    ) -> Result<(), BleError> {
        let mut state = self.lock();
        if !state.connected.contains(device_id) {
            return Err(BleError::Transport {
                code: codes::NO_CONNECTION,
                message: "not connected".to_string(),
            });
        }
        state
            .writes
            .push((characteristic_id.to_lowercase(), payload.to_vec()));
        Ok(())
    }

    async fn set_notify(
        &self,
        device_id: &str,
        _service_id: &str,
        characteristic_id: &str,
        enable: bool,
    ) -> Result<(), BleError> {
        let mut state = self.lock();
        if !state.connected.contains(device_id) {
            return Err(BleError::Transport {
                code: codes::NO_CONNECTION,
                message: "not connected".to_string(),
            });
        }
        let key = characteristic_id.to_lowercase();
        if enable {
            state.subscriptions.insert(key);
        } else {
            state.subscriptions.remove(&key);
        }
        Ok(())
    }

    fn value_changes(&self) -> broadcast::Receiver<ValueChange> {
        self.value_tx.subscribe()
    }

    fn link_changes(&self) -> broadcast::Receiver<LinkChange> {
        self.link_tx.subscribe()
    }
}
