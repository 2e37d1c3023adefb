//! Console demo: runs the full client flow against the in-memory peripheral.
//!
//! Scans for the controller, connects, reads status, applies a configuration,
//! starts the motor, watches the status poll for a moment, then disconnects.

use motor_control_client::infrastructure::bluetooth::codec;
use motor_control_client::infrastructure::bluetooth::mock::MockPeripheral;
use motor_control_client::infrastructure::logging;
use motor_control_client::{
    AppEvent, MotorBleService, MotorCommand, ScanOutcome, SettingsService,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings_service = SettingsService::load();
    let settings = settings_service.get().clone();
    let _logging = logging::init_logger(&settings.log_settings)?;

    info!("Starting motor control console");

    let adapter = Arc::new(MockPeripheral::motor_device());
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                AppEvent::DeviceFound(device) => {
                    println!("found {} ({}, {} dBm)", device.name, device.id, device.rssi);
                }
                AppEvent::ConnectionChanged(state) => println!("connection: {state:?}"),
                AppEvent::SystemStatus(status) => println!(
                    "status: {} cycle={} uptime={}",
                    status.state_name,
                    status.current_cycle_count,
                    status.formatted_uptime()
                ),
                AppEvent::Log(message) => {
                    println!("[{:?}] {}", message.severity, message.message);
                }
            }
        }
    });

    let service = MotorBleService::new(adapter, settings, event_tx);

    let device = match service.scan_devices().await? {
        ScanOutcome::Found(mut devices) => devices.remove(0),
        ScanOutcome::NotFound { attempts } => {
            anyhow::bail!("device not found after {attempts} scan attempts");
        }
    };

    service.connect_device_with_retry(&device).await?;

    let status = service.get_system_status().await?;
    println!(
        "initial status: {} run={}s stop={}s heap={}",
        status.state_name,
        status.run_duration,
        status.stop_duration,
        status.formatted_free_heap()
    );

    service.set_run_duration(45).await?;
    service.set_stop_duration(90).await?;
    service.set_system_control(MotorCommand::Run).await?;

    if service
        .check_notify_support(codec::STATUS_QUERY_CHAR_UUID)
        .await?
    {
        service
            .notify_characteristic_with_retry(codec::STATUS_QUERY_CHAR_UUID, 3, 200)
            .await?;
    }

    // Let the status poll run a few rounds.
    tokio::time::sleep(Duration::from_secs(3)).await;

    service.disconnect_device().await?;
    service.shutdown();
    drop(service);
    printer.await?;

    info!("Done");
    Ok(())
}
