//! Connection session.
//!
//! [`MotorBleService`] owns the per-device state machine
//! (`Disconnected → Connecting → Connected`, `Connecting → Failed →
//! Disconnected`, `Connected → Disconnected`), the status poll task and the
//! link-loss watch task, and exposes the upward API consumed by the
//! presentation layer. Timers and task handles live here and are cancelled
//! only here.

use crate::domain::models::{
    AppEvent, ConnectionState, DeviceDescriptor, MessageSeverity, StatusMessage, SystemStatus,
};
use crate::domain::settings::Settings;
use crate::infrastructure::bluetooth::adapter::{LinkChange, SharedAdapter};
use crate::infrastructure::bluetooth::codec::{self, MotorCommand};
use crate::infrastructure::bluetooth::connection::{self, ConnectRetryConfig};
use crate::infrastructure::bluetooth::error::{codes, BleError};
use crate::infrastructure::bluetooth::poller::{self, FatalCodePolicy};
use crate::infrastructure::bluetooth::resolver;
use crate::infrastructure::bluetooth::scanner::{ScanConfig, ScanOutcome, Scanner};
use crate::infrastructure::bluetooth::transport;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Operation classes protected by single-flight guards.
#[derive(Debug, Clone, Copy)]
enum OpClass {
    Scan,
    Connect,
}

impl OpClass {
    fn name(self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Connect => "connect",
        }
    }
}

struct SessionState {
    connection: ConnectionState,
    device: Option<DeviceDescriptor>,
    scanning: bool,
    connecting: bool,
}

#[derive(Default)]
struct SessionTasks {
    poll: Option<JoinHandle<()>>,
    link_watch: Option<JoinHandle<()>>,
}

pub(crate) struct SessionInner {
    adapter: SharedAdapter,
    settings: Settings,
    fatal_policy: FatalCodePolicy,
    event_sender: mpsc::UnboundedSender<AppEvent>,
    state: Mutex<SessionState>,
    tasks: Mutex<SessionTasks>,
}

/// RAII release for a single-flight guard.
struct OpGuard {
    inner: Arc<SessionInner>,
    op: OpClass,
}

impl Drop for OpGuard {
    fn drop(&mut self) {
        let mut state = self.inner.lock_state();
        match self.op {
            OpClass::Scan => state.scanning = false,
            OpClass::Connect => state.connecting = false,
        }
    }
}

/// The connection manager and session object for one motor controller.
pub struct MotorBleService {
    inner: Arc<SessionInner>,
}

impl MotorBleService {
    /// Create the session and start watching for out-of-band link loss.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        adapter: SharedAdapter,
        settings: Settings,
        event_sender: mpsc::UnboundedSender<AppEvent>,
    ) -> Self {
        let fatal_policy = FatalCodePolicy::new(settings.fatal_error_codes.iter().copied());
        let inner = Arc::new(SessionInner {
            adapter,
            settings,
            fatal_policy,
            event_sender,
            state: Mutex::new(SessionState {
                connection: ConnectionState::Disconnected,
                device: None,
                scanning: false,
                connecting: false,
            }),
            tasks: Mutex::new(SessionTasks::default()),
        });

        let watch = tokio::spawn(link_watch_loop(
            Arc::downgrade(&inner),
            inner.adapter.link_changes(),
        ));
        inner.lock_tasks().link_watch = Some(watch);

        Self { inner }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.connection_state()
    }

    pub fn connected_device(&self) -> Option<DeviceDescriptor> {
        self.inner.lock_state().device.clone()
    }

    /// Discover the configured device, auto-retrying empty scans.
    ///
    /// Returns [`BleError::AlreadyInProgress`] if a scan is running.
    pub async fn scan_devices(&self) -> Result<ScanOutcome, BleError> {
        let _guard = self.inner.begin(OpClass::Scan)?;
        let scanner = Scanner::new(
            self.inner.adapter.clone(),
            ScanConfig::from(&self.inner.settings),
            self.inner.event_sender.clone(),
        );
        Ok(scanner.scan_with_auto_retry().await)
    }

    /// One discovery pass without the retry loop.
    pub async fn scan_devices_once(&self) -> Result<Vec<DeviceDescriptor>, BleError> {
        let _guard = self.inner.begin(OpClass::Scan)?;
        let scanner = Scanner::new(
            self.inner.adapter.clone(),
            ScanConfig::from(&self.inner.settings),
            self.inner.event_sender.clone(),
        );
        scanner.scan_once().await
    }

    /// Connect with retry and verification, then start status polling.
    ///
    /// Returns [`BleError::AlreadyInProgress`] if a connect is running;
    /// calling while already connected is a no-op.
    pub async fn connect_device_with_retry(
        &self,
        device: &DeviceDescriptor,
    ) -> Result<(), BleError> {
        let _guard = self.inner.begin(OpClass::Connect)?;

        {
            let mut state = self.inner.lock_state();
            if state.connection == ConnectionState::Connected {
                debug!(device_id = %device.id, "already connected, ignoring connect request");
                return Ok(());
            }
            state.connection = ConnectionState::Connecting;
            state.device = Some(device.clone());
        }
        self.inner
            .emit(AppEvent::ConnectionChanged(ConnectionState::Connecting));
        self.inner.send_log(
            format!("Connecting to {}...", device.name),
            MessageSeverity::Info,
        );

        let config = ConnectRetryConfig::from(&self.inner.settings);
        match connection::connect_with_retry(&*self.inner.adapter, &device.id, &config).await {
            Ok(()) => {
                // Link loss during the retry loop tears the session down from
                // under us; only a still-pending attempt for this device may
                // claim the connection.
                let still_pending = {
                    let mut state = self.inner.lock_state();
                    let pending = state.connection == ConnectionState::Connecting
                        && state.device.as_ref().is_some_and(|d| d.id == device.id);
                    if pending {
                        state.connection = ConnectionState::Connected;
                    }
                    pending
                };
                if !still_pending {
                    warn!(device_id = %device.id, "session torn down during connect, releasing link");
                    if let Err(err) = self.inner.adapter.disconnect(&device.id).await {
                        warn!(device_id = %device.id, error = %err, "release of stale link failed");
                    }
                    return Err(BleError::Transport {
                        code: codes::NO_CONNECTION,
                        message: "session closed during connect".to_string(),
                    });
                }
                self.inner
                    .emit(AppEvent::ConnectionChanged(ConnectionState::Connected));
                self.inner
                    .send_log("Connection established", MessageSeverity::Success);
                self.inner.start_poller();
                Ok(())
            }
            Err(err) => {
                self.inner.lock_state().connection = ConnectionState::Failed;
                self.inner
                    .emit(AppEvent::ConnectionChanged(ConnectionState::Failed));
                self.inner
                    .send_log(err.user_message(), MessageSeverity::Error);
                // Failed is transient; the terminal state is Disconnected.
                self.inner.reset_to_disconnected();
                Err(err)
            }
        }
    }

    /// Disconnect and stop polling. Idempotent; a no-op without a connection.
    ///
    /// The session is reset even with no device attached, so a disconnect
    /// always lands in a clean `Disconnected` state.
    pub async fn disconnect_device(&self) -> Result<(), BleError> {
        let device = self.inner.lock_state().device.clone();
        if let Some(device) = &device {
            if let Err(err) = self.inner.adapter.disconnect(&device.id).await {
                warn!(device_id = %device.id, error = %err, "adapter disconnect failed");
            }
        } else {
            debug!("disconnect requested with no attached device");
        }
        if self.inner.reset_to_disconnected() {
            self.inner
                .send_log("Disconnected from device", MessageSeverity::Info);
        }
        Ok(())
    }

    /// Probe the current connection. `false` when no device is attached or
    /// the probe fails; never an error.
    pub async fn verify_connection(&self) -> bool {
        let device = self.inner.lock_state().device.clone();
        match device {
            Some(device) => connection::verify_connection(&*self.inner.adapter, &device.id).await,
            None => false,
        }
    }

    /// Read and decode the status characteristic.
    pub async fn get_system_status(&self) -> Result<SystemStatus, BleError> {
        let device_id = self.inner.require_connected()?;
        self.inner.fetch_status(&device_id).await
    }

    /// Write the run duration in seconds (valid range 1–999).
    pub async fn set_run_duration(&self, seconds: u32) -> Result<(), BleError> {
        if !(1..=999).contains(&seconds) {
            return Err(BleError::InvalidParameter(
                "run duration must be between 1 and 999 seconds".to_string(),
            ));
        }
        let uuid = self.inner.settings.run_duration_char_uuid.clone();
        let payload = codec::encode_le(seconds, 4)?;
        self.inner.write_characteristic(&uuid, &payload).await?;
        info!(seconds, "run duration applied");
        Ok(())
    }

    /// Write the stop interval in seconds (valid range 0–999).
    pub async fn set_stop_duration(&self, seconds: u32) -> Result<(), BleError> {
        if seconds > 999 {
            return Err(BleError::InvalidParameter(
                "stop interval must be between 0 and 999 seconds".to_string(),
            ));
        }
        let uuid = self.inner.settings.stop_duration_char_uuid.clone();
        let payload = codec::encode_le(seconds, 4)?;
        self.inner.write_characteristic(&uuid, &payload).await?;
        info!(seconds, "stop interval applied");
        Ok(())
    }

    /// Write the system-control command byte.
    pub async fn set_system_control(&self, command: MotorCommand) -> Result<(), BleError> {
        let uuid = self.inner.settings.system_control_char_uuid.clone();
        let payload = codec::encode_le(command.as_byte() as u32, 1)?;
        self.inner.write_characteristic(&uuid, &payload).await?;
        info!(?command, "system control applied");
        Ok(())
    }

    /// Read an arbitrary characteristic of the motor service with bounded
    /// attempts and a fixed inter-attempt delay.
    pub async fn read_characteristic_with_retry(
        &self,
        characteristic_uuid: &str,
        max_attempts: u32,
        delay_ms: u64,
    ) -> Result<Vec<u8>, BleError> {
        let device_id = self.inner.require_connected()?;
        let target = self.inner.resolve(&device_id, characteristic_uuid).await?;
        transport::read_with_retry(
            &*self.inner.adapter,
            &device_id,
            &target,
            self.inner.read_timeout(),
            max_attempts,
            Duration::from_millis(delay_ms),
        )
        .await
    }

    /// Enable notifications with bounded attempts. Fails fast with
    /// [`BleError::NotifyUnsupported`] when the characteristic cannot notify.
    pub async fn notify_characteristic_with_retry(
        &self,
        characteristic_uuid: &str,
        max_attempts: u32,
        delay_ms: u64,
    ) -> Result<(), BleError> {
        let device_id = self.inner.require_connected()?;
        let target = self.inner.resolve(&device_id, characteristic_uuid).await?;
        transport::subscribe_with_retry(
            &*self.inner.adapter,
            &device_id,
            &target,
            max_attempts,
            Duration::from_millis(delay_ms),
        )
        .await
    }

    /// Disable notifications on a characteristic.
    pub async fn unnotify_characteristic(&self, characteristic_uuid: &str) -> Result<(), BleError> {
        let device_id = self.inner.require_connected()?;
        let target = self.inner.resolve(&device_id, characteristic_uuid).await?;
        transport::unsubscribe(&*self.inner.adapter, &device_id, &target).await
    }

    /// Whether a characteristic supports notify or indicate.
    pub async fn check_notify_support(&self, characteristic_uuid: &str) -> Result<bool, BleError> {
        let device_id = self.inner.require_connected()?;
        let target = self.inner.resolve(&device_id, characteristic_uuid).await?;
        Ok(target.properties.supports_notifications())
    }

    /// Stop all background tasks and reset the session.
    pub fn shutdown(&self) {
        self.inner.reset_to_disconnected();
        let mut tasks = self.inner.lock_tasks();
        if let Some(handle) = tasks.link_watch.take() {
            handle.abort();
        }
    }
}

impl Drop for MotorBleService {
    // The link watch task would otherwise stay parked on the broadcast
    // channel until the next link event fails its weak upgrade.
    fn drop(&mut self) {
        let mut tasks = self.inner.lock_tasks();
        if let Some(handle) = tasks.poll.take() {
            handle.abort();
        }
        if let Some(handle) = tasks.link_watch.take() {
            handle.abort();
        }
    }
}

impl SessionInner {
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_tasks(&self) -> MutexGuard<'_, SessionTasks> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn begin(self: &Arc<Self>, op: OpClass) -> Result<OpGuard, BleError> {
        let mut state = self.lock_state();
        let flag = match op {
            OpClass::Scan => &mut state.scanning,
            OpClass::Connect => &mut state.connecting,
        };
        if *flag {
            return Err(BleError::AlreadyInProgress(op.name()));
        }
        *flag = true;
        Ok(OpGuard {
            inner: Arc::clone(self),
            op,
        })
    }

    pub(crate) fn connection_state(&self) -> ConnectionState {
        self.lock_state().connection
    }

    pub(crate) fn connected_device_id(&self) -> Option<String> {
        let state = self.lock_state();
        if state.connection == ConnectionState::Connected {
            state.device.as_ref().map(|d| d.id.clone())
        } else {
            None
        }
    }

    pub(crate) fn fatal_policy(&self) -> &FatalCodePolicy {
        &self.fatal_policy
    }

    fn require_connected(&self) -> Result<String, BleError> {
        self.connected_device_id().ok_or(BleError::NotConnected)
    }

    fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.settings.read_timeout_ms)
    }

    async fn resolve(
        &self,
        device_id: &str,
        characteristic_uuid: &str,
    ) -> Result<resolver::ResolvedCharacteristic, BleError> {
        resolver::resolve(
            &*self.adapter,
            device_id,
            &self.settings.ble_service_uuid,
            characteristic_uuid,
        )
        .await
    }

    async fn write_characteristic(
        &self,
        characteristic_uuid: &str,
        payload: &[u8],
    ) -> Result<(), BleError> {
        let device_id = self.require_connected()?;
        let target = self.resolve(&device_id, characteristic_uuid).await?;
        transport::write(&*self.adapter, &device_id, &target, payload).await
    }

    /// One status fetch: resolve (fresh every time), read, decode.
    pub(crate) async fn fetch_status(&self, device_id: &str) -> Result<SystemStatus, BleError> {
        let target = self
            .resolve(device_id, &self.settings.status_query_char_uuid)
            .await?;
        let buffer =
            transport::read(&*self.adapter, device_id, &target, self.read_timeout()).await?;
        Ok(codec::decode_status_json(&buffer))
    }

    pub(crate) fn publish_status(&self, status: SystemStatus) {
        self.emit(AppEvent::SystemStatus(status));
    }

    /// Start (or restart) the poll task. Idempotent: a prior task is always
    /// cancelled first so at most one interval runs per connection.
    fn start_poller(self: &Arc<Self>) {
        let mut tasks = self.lock_tasks();
        if let Some(handle) = tasks.poll.take() {
            handle.abort();
        }
        let interval = Duration::from_millis(self.settings.status_poll_interval_ms);
        tasks.poll = Some(tokio::spawn(poller::poll_loop(
            Arc::downgrade(self),
            interval,
        )));
    }

    fn stop_poller(&self) {
        if let Some(handle) = self.lock_tasks().poll.take() {
            handle.abort();
        }
    }

    /// Reset to `Disconnected`, clearing device identity and stopping the
    /// poller. Returns `false` when there was nothing to reset.
    pub(crate) fn reset_to_disconnected(&self) -> bool {
        let had_session = {
            let mut state = self.lock_state();
            let had = state.connection != ConnectionState::Disconnected || state.device.is_some();
            state.connection = ConnectionState::Disconnected;
            state.device = None;
            had
        };
        self.stop_poller();
        if had_session {
            self.emit(AppEvent::ConnectionChanged(ConnectionState::Disconnected));
        }
        had_session
    }

    /// Involuntary teardown: link loss or a fatal poll failure. Identical to a
    /// user disconnect plus a terminal error message.
    pub(crate) fn force_disconnect(&self, message: &str) {
        if self.reset_to_disconnected() {
            self.send_log(message, MessageSeverity::Error);
        }
    }

    pub(crate) fn emit(&self, event: AppEvent) {
        let _ = self.event_sender.send(event);
    }

    fn send_log(&self, message: impl Into<String>, severity: MessageSeverity) {
        self.emit(AppEvent::Log(StatusMessage::new(message, severity)));
    }
}

/// Watches the adapter's out-of-band connection events and treats an
/// involuntary disconnect of the current device like a user disconnect.
async fn link_watch_loop(
    session: Weak<SessionInner>,
    mut changes: tokio::sync::broadcast::Receiver<LinkChange>,
) {
    loop {
        match changes.recv().await {
            Ok(change) => {
                if change.connected {
                    continue;
                }
                let Some(inner) = session.upgrade() else {
                    break;
                };
                let is_current = inner
                    .lock_state()
                    .device
                    .as_ref()
                    .is_some_and(|d| d.id == change.device_id);
                if is_current {
                    warn!(device_id = %change.device_id, "link loss reported by adapter");
                    inner.force_disconnect("Device connection lost");
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "link change channel lagged");
            }
            Err(RecvError::Closed) => break,
        }
    }
}
