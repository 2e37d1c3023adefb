//! End-to-end discovery and connection behavior against the mock peripheral.
//!
//! All tests run on a paused tokio clock, so retry delays and settle windows
//! elapse instantly but remain exactly measurable.

use motor_control_client::infrastructure::bluetooth::codec;
use motor_control_client::infrastructure::bluetooth::error::codes;
use motor_control_client::infrastructure::bluetooth::mock::{MockPeripheral, MOCK_DEVICE_ID};
use motor_control_client::{
    AppEvent, BleError, ConnectionState, DeviceDescriptor, MotorBleService, ScanOutcome, Settings,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::Instant;

fn new_session(adapter: Arc<MockPeripheral>) -> (MotorBleService, UnboundedReceiver<AppEvent>) {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
    let service = MotorBleService::new(adapter, Settings::default(), tx);
    (service, rx)
}

fn motor_descriptor() -> DeviceDescriptor {
    DeviceDescriptor {
        id: MOCK_DEVICE_ID.to_string(),
        name: codec::DEVICE_NAME.to_string(),
        rssi: -58,
    }
}

fn transport_error(code: i32) -> BleError {
    BleError::Transport {
        code,
        message: "injected".to_string(),
    }
}

fn connection_changes(rx: &mut UnboundedReceiver<AppEvent>) -> Vec<ConnectionState> {
    let mut states = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let AppEvent::ConnectionChanged(state) = event {
            states.push(state);
        }
    }
    states
}

#[tokio::test(start_paused = true)]
async fn scan_finds_device_within_settle_window() {
    let adapter = Arc::new(MockPeripheral::motor_device());
    let (service, mut rx) = new_session(adapter.clone());

    let start = Instant::now();
    let outcome = service.scan_devices().await.unwrap();
    assert_eq!(start.elapsed(), Duration::from_millis(2_000));

    match outcome {
        ScanOutcome::Found(devices) => {
            assert_eq!(devices.len(), 1);
            assert_eq!(devices[0].name, codec::DEVICE_NAME);
        }
        other => panic!("expected Found, got {other:?}"),
    }
    assert_eq!(adapter.scan_count(), 1);

    let found = std::iter::from_fn(|| rx.try_recv().ok())
        .any(|event| matches!(event, AppEvent::DeviceFound(d) if d.id == MOCK_DEVICE_ID));
    assert!(found, "expected a DeviceFound event");
}

#[tokio::test(start_paused = true)]
async fn scan_gives_up_after_bounded_attempts() {
    let adapter = Arc::new(MockPeripheral::absent());
    let (service, _rx) = new_session(adapter.clone());

    let start = Instant::now();
    let outcome = service.scan_devices().await.unwrap();

    // 10 settle windows of 2s plus 9 retry intervals of 12s.
    assert_eq!(start.elapsed(), Duration::from_millis(128_000));
    assert_eq!(outcome, ScanOutcome::NotFound { attempts: 10 });
    assert_eq!(adapter.scan_count(), 10);
}

#[tokio::test(start_paused = true)]
async fn concurrent_scans_are_rejected() {
    let adapter = Arc::new(MockPeripheral::absent());
    let (service, _rx) = new_session(adapter);
    let service = Arc::new(service);

    let background = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.scan_devices().await })
    };
    tokio::task::yield_now().await;

    let second = service.scan_devices().await;
    assert!(matches!(second, Err(BleError::AlreadyInProgress("scan"))));

    background.abort();
}

#[tokio::test(start_paused = true)]
async fn connect_retries_with_linear_backoff() {
    let adapter = Arc::new(MockPeripheral::motor_device());
    adapter.script_connect([
        Err(transport_error(10_003)),
        Err(transport_error(10_003)),
        Ok(()),
    ]);
    let (service, mut rx) = new_session(adapter.clone());

    let start = Instant::now();
    service
        .connect_device_with_retry(&motor_descriptor())
        .await
        .unwrap();

    // 1s then 2s backoff, plus the 500ms stabilization pause.
    assert_eq!(start.elapsed(), Duration::from_millis(3_500));
    assert_eq!(adapter.connect_attempts(), 3);
    assert_eq!(service.state(), ConnectionState::Connected);

    let states = connection_changes(&mut rx);
    assert_eq!(
        states,
        vec![ConnectionState::Connecting, ConnectionState::Connected]
    );
}

#[tokio::test(start_paused = true)]
async fn connect_exhausts_attempts_and_reports_last_error() {
    let adapter = Arc::new(MockPeripheral::motor_device());
    adapter.script_connect([
        Err(transport_error(10_003)),
        Err(transport_error(10_003)),
        Err(transport_error(codes::NO_CONNECTION)),
    ]);
    let (service, mut rx) = new_session(adapter.clone());

    let start = Instant::now();
    let result = service.connect_device_with_retry(&motor_descriptor()).await;

    // Two inter-attempt delays, no stabilization pause on failed attempts.
    assert_eq!(start.elapsed(), Duration::from_millis(3_000));
    assert_eq!(adapter.connect_attempts(), 3);
    match result {
        Err(BleError::Transport { code, .. }) => assert_eq!(code, codes::NO_CONNECTION),
        other => panic!("expected last transport error, got {other:?}"),
    }

    assert_eq!(service.state(), ConnectionState::Disconnected);
    assert!(service.connected_device().is_none());
    let states = connection_changes(&mut rx);
    assert_eq!(
        states,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Failed,
            ConnectionState::Disconnected
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn verification_failure_counts_as_connect_failure() {
    let adapter = Arc::new(MockPeripheral::motor_device());
    adapter.set_fail_verification(true);
    let (service, _rx) = new_session(adapter.clone());

    let result = service.connect_device_with_retry(&motor_descriptor()).await;

    assert_eq!(adapter.connect_attempts(), 3);
    match result {
        Err(BleError::Transport { code, message }) => {
            assert_eq!(code, codes::NO_CONNECTION);
            assert!(message.contains("verification"));
        }
        other => panic!("expected verification failure, got {other:?}"),
    }
    assert_eq!(service.state(), ConnectionState::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn connect_while_connected_is_a_noop() {
    let adapter = Arc::new(MockPeripheral::motor_device());
    let (service, _rx) = new_session(adapter.clone());

    service
        .connect_device_with_retry(&motor_descriptor())
        .await
        .unwrap();
    assert_eq!(adapter.connect_attempts(), 1);

    service
        .connect_device_with_retry(&motor_descriptor())
        .await
        .unwrap();
    assert_eq!(adapter.connect_attempts(), 1);
    assert_eq!(service.state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn disconnect_is_idempotent() {
    let adapter = Arc::new(MockPeripheral::motor_device());
    let (service, mut rx) = new_session(adapter);

    service.disconnect_device().await.unwrap();
    assert!(connection_changes(&mut rx).is_empty());

    service
        .connect_device_with_retry(&motor_descriptor())
        .await
        .unwrap();
    service.disconnect_device().await.unwrap();
    service.disconnect_device().await.unwrap();

    assert_eq!(service.state(), ConnectionState::Disconnected);
    let states = connection_changes(&mut rx);
    assert_eq!(
        states,
        vec![
            ConnectionState::Connecting,
            ConnectionState::Connected,
            ConnectionState::Disconnected
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn link_loss_forces_disconnect() {
    let adapter = Arc::new(MockPeripheral::motor_device());
    let (service, mut rx) = new_session(adapter.clone());

    service
        .connect_device_with_retry(&motor_descriptor())
        .await
        .unwrap();
    assert_eq!(service.state(), ConnectionState::Connected);

    adapter.drop_link(MOCK_DEVICE_ID);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(service.state(), ConnectionState::Disconnected);
    assert!(service.connected_device().is_none());
    let states = connection_changes(&mut rx);
    assert_eq!(states.last(), Some(&ConnectionState::Disconnected));
}

#[tokio::test(start_paused = true)]
async fn link_loss_during_stabilize_does_not_wedge_the_session() {
    let adapter = Arc::new(MockPeripheral::motor_device());
    let (service, _rx) = new_session(adapter.clone());
    let service = Arc::new(service);

    let connect_task = {
        let service = Arc::clone(&service);
        tokio::spawn(async move { service.connect_device_with_retry(&motor_descriptor()).await })
    };
    // Let the first attempt reach the stabilization pause, then lose the link.
    tokio::task::yield_now().await;
    adapter.drop_link(MOCK_DEVICE_ID);

    // The transport retry may bring the link back up, but the torn-down
    // session must not be claimed by it.
    let result = connect_task.await.unwrap();
    assert!(result.is_err());
    assert_eq!(service.state(), ConnectionState::Disconnected);
    assert!(service.connected_device().is_none());

    // The session stays usable: a fresh connect goes through.
    service
        .connect_device_with_retry(&motor_descriptor())
        .await
        .unwrap();
    assert_eq!(service.state(), ConnectionState::Connected);
    assert!(service.connected_device().is_some());
    let status = service.get_system_status().await.unwrap();
    assert_eq!(status.state_name, "RUNNING");
}

#[tokio::test(start_paused = true)]
async fn disconnect_recovers_a_session_without_a_device() {
    let adapter = Arc::new(MockPeripheral::motor_device());
    let (service, _rx) = new_session(adapter);

    // Even with nothing attached, disconnect must land in Disconnected.
    service.disconnect_device().await.unwrap();
    assert_eq!(service.state(), ConnectionState::Disconnected);

    service
        .connect_device_with_retry(&motor_descriptor())
        .await
        .unwrap();
    service.disconnect_device().await.unwrap();
    service.disconnect_device().await.unwrap();
    assert_eq!(service.state(), ConnectionState::Disconnected);
    assert!(service.connected_device().is_none());
}

#[tokio::test(start_paused = true)]
async fn dropping_the_service_ends_background_tasks() {
    let adapter = Arc::new(MockPeripheral::motor_device());
    let (service, _rx) = new_session(adapter.clone());
    tokio::task::yield_now().await;
    assert_eq!(adapter.link_receiver_count(), 1);

    drop(service);
    // Let the runtime reap the aborted watch task.
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(adapter.link_receiver_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn foreign_link_loss_is_ignored() {
    let adapter = Arc::new(MockPeripheral::motor_device());
    let (service, _rx) = new_session(adapter.clone());

    service
        .connect_device_with_retry(&motor_descriptor())
        .await
        .unwrap();

    adapter.drop_link("some-other-device");
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(service.state(), ConnectionState::Connected);
}
