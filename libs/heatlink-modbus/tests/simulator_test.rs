//! Register access against the in-memory simulator over real TCP

#![allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable

use std::net::SocketAddr;
use std::time::Duration;

use heatlink_modbus::{
    ConnectionManager, ConnectionParams, DataFormat, ModbusItem, ModbusSimulator, PointKind,
    Reading, RegisterObject, SubDevice,
};
use tracing_test::traced_test;

fn params_for(addr: SocketAddr) -> ConnectionParams {
    let mut params = ConnectionParams::new(addr.ip().to_string());
    params.port = addr.port();
    params.timeout = Duration::from_millis(500);
    params
}

async fn connected_manager(sim: &ModbusSimulator) -> ConnectionManager {
    let addr = sim.start().await.unwrap();
    let manager = ConnectionManager::new(params_for(addr));
    assert!(manager.connect(true).await);
    manager
}

fn outside_temperature() -> ModbusItem {
    ModbusItem::new(
        30001,
        "outside_temperature",
        DataFormat::Temperature,
        PointKind::Sensor,
        SubDevice::System,
    )
}

fn room_setpoint() -> ModbusItem {
    ModbusItem::new(
        41103,
        "room_setpoint_comfort",
        DataFormat::Temperature,
        PointKind::Number,
        SubDevice::HeatingCircuit1,
    )
}

// ============================================================================
// Reads
// ============================================================================

#[tokio::test]
async fn test_read_negative_temperature() {
    let sim = ModbusSimulator::new();
    sim.set_input(30001, 65290).await;
    let manager = connected_manager(&sim).await;

    let item = outside_temperature();
    let reading = RegisterObject::new(&manager, &item).read().await;
    assert_eq!(reading, Reading::Value(-246));

    sim.shutdown().await;
}

#[tokio::test]
async fn test_read_holding_for_writable_kind() {
    let sim = ModbusSimulator::new();
    sim.set_holding(41103, 215).await;
    // Same address in the input table must not be used
    sim.set_input(41103, 1).await;
    let manager = connected_manager(&sim).await;

    let item = room_setpoint();
    let reading = RegisterObject::new(&manager, &item).read().await;
    assert_eq!(reading, Reading::Value(215));

    sim.shutdown().await;
}

#[tokio::test]
async fn test_illegal_address_marks_invalid() {
    let sim = ModbusSimulator::new();
    let manager = connected_manager(&sim).await;

    let item = ModbusItem::new(
        33104,
        "second_generator_status",
        DataFormat::Status,
        PointKind::Sensor,
        SubDevice::SecondGenerator,
    );
    let reading = RegisterObject::new(&manager, &item).read().await;
    assert_eq!(reading, Reading::Invalid);
    assert!(manager.is_connected(), "exception responses keep the session");

    sim.shutdown().await;
}

#[tokio::test]
async fn test_percentage_sentinel() {
    let sim = ModbusSimulator::new();
    sim.set_input(33103, 65535).await;
    let manager = connected_manager(&sim).await;

    let item = ModbusItem::new(
        33103,
        "compressor_power",
        DataFormat::Percentage,
        PointKind::Sensor,
        SubDevice::HeatPump,
    );
    assert_eq!(
        RegisterObject::new(&manager, &item).read().await,
        Reading::Invalid
    );

    sim.shutdown().await;
}

#[tokio::test]
async fn test_slow_device_yields_unavailable() {
    let sim = ModbusSimulator::new();
    sim.set_input(30001, 100).await;
    let addr = sim.start().await.unwrap();

    let mut params = params_for(addr);
    params.timeout = Duration::from_millis(50);
    let manager = ConnectionManager::new(params);
    assert!(manager.connect(true).await);

    sim.set_response_delay(Duration::from_millis(400));
    let item = outside_temperature();
    assert_eq!(
        RegisterObject::new(&manager, &item).read().await,
        Reading::Unavailable
    );

    sim.shutdown().await;
}

#[tokio::test]
async fn test_late_reply_discarded() {
    let sim = ModbusSimulator::new();
    sim.set_input(30001, 100).await;
    let addr = sim.start().await.unwrap();

    let mut params = params_for(addr);
    params.timeout = Duration::from_millis(100);
    let manager = ConnectionManager::new(params);
    assert!(manager.connect(true).await);

    // Request and retry both time out, their replies arrive later
    sim.set_response_delay(Duration::from_millis(150));
    let item = outside_temperature();
    assert_eq!(
        RegisterObject::new(&manager, &item).read().await,
        Reading::Unavailable
    );
    assert!(manager.is_connected());

    sim.set_response_delay(Duration::ZERO);
    tokio::time::sleep(Duration::from_millis(500)).await;

    assert_eq!(
        RegisterObject::new(&manager, &item).read().await,
        Reading::Value(100)
    );
    assert!(manager.is_connected());

    sim.shutdown().await;
}

#[tokio::test]
async fn test_retry_after_timeout_succeeds() {
    let sim = ModbusSimulator::new();
    sim.set_input(30001, 100).await;
    let addr = sim.start().await.unwrap();

    let mut params = params_for(addr);
    params.timeout = Duration::from_millis(200);
    let manager = ConnectionManager::new(params);
    assert!(manager.connect(true).await);

    // Only the first request is slow
    sim.set_response_delay(Duration::from_millis(250));
    let speed_up = {
        let sim = sim.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            sim.set_response_delay(Duration::ZERO);
        })
    };

    let item = outside_temperature();
    assert_eq!(
        RegisterObject::new(&manager, &item).read().await,
        Reading::Value(100)
    );
    assert!(manager.is_connected());
    assert_eq!(sim.request_count(), 2);

    speed_up.await.unwrap();
    sim.shutdown().await;
}

#[tokio::test]
async fn test_device_gone_drops_session() {
    let sim = ModbusSimulator::new();
    sim.set_input(30001, 100).await;
    let manager = connected_manager(&sim).await;

    sim.shutdown().await;
    // Give the aborted connection task time to close its socket
    tokio::time::sleep(Duration::from_millis(50)).await;

    let item = outside_temperature();
    assert_eq!(
        RegisterObject::new(&manager, &item).read().await,
        Reading::Unavailable
    );
    assert!(!manager.is_connected());

    assert!(!manager.connect(false).await);
    assert_eq!(manager.stats().await.consecutive_failures, 1);
}

// ============================================================================
// Writes
// ============================================================================

#[tokio::test]
async fn test_write_negative_temperature_encoding() {
    let sim = ModbusSimulator::new();
    sim.set_holding(41103, 200).await;
    let manager = connected_manager(&sim).await;

    let item = room_setpoint();
    RegisterObject::new(&manager, &item)
        .write(-50)
        .await
        .unwrap();
    assert_eq!(sim.holding(41103).await, Some(65486));

    let reading = RegisterObject::new(&manager, &item).read().await;
    assert_eq!(reading, Reading::Value(-50));

    sim.shutdown().await;
}

#[tokio::test]
async fn test_write_read_only_kind_sends_nothing() {
    let sim = ModbusSimulator::new();
    sim.set_holding(40001, 1).await;
    let manager = connected_manager(&sim).await;

    let item = ModbusItem::new(
        40001,
        "system_mode",
        DataFormat::Status,
        PointKind::NumberRo,
        SubDevice::System,
    );
    RegisterObject::new(&manager, &item).write(3).await.unwrap();
    assert_eq!(sim.request_count(), 0);
    assert_eq!(sim.holding(40001).await, Some(1));

    sim.shutdown().await;
}

// ============================================================================
// Connection manager over TCP
// ============================================================================

#[tokio::test]
#[traced_test]
async fn test_unreachable_device_enters_backoff_once() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let manager = ConnectionManager::new(params_for(addr));
    for _ in 0..2 {
        assert!(!manager.connect(true).await);
    }
    assert!(!logs_contain("Entering backoff"));

    // Third failure, outside startup, starts the episode
    assert!(!manager.connect(false).await);
    let stats = manager.stats().await;
    assert_eq!(stats.consecutive_failures, 3);
    assert_eq!(stats.backoff_episodes, 1);
    assert!(logs_contain("Entering backoff"));

    // Non-startup call inside the window does not touch the network
    assert!(!manager.connect(false).await);
    assert_eq!(manager.stats().await.consecutive_failures, 3);
}

#[tokio::test]
#[traced_test]
async fn test_startup_failures_do_not_enter_backoff() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let manager = ConnectionManager::new(params_for(addr));
    for _ in 0..4 {
        assert!(!manager.connect(true).await);
    }

    let stats = manager.stats().await;
    assert_eq!(stats.consecutive_failures, 4);
    assert_eq!(stats.backoff_episodes, 0);
    assert!(!logs_contain("Entering backoff"));
}
