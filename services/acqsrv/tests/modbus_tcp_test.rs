//! End-to-end polling and writes over Modbus TCP against the local simulator

use std::io::Write;
use std::time::Duration;

use acqsrv::codec::TagValue;
use acqsrv::model::{Quality, Region};
use acqsrv::test_utils::{DataBank, ModbusTcpSimulator};
use acqsrv::{AppConfig, DeviceHandle, DeviceState, Gateway};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

fn config_yaml(port: u16, bad_comm_wait_ms: u64) -> String {
    format!(
        r#"
devices:
  - name: plc
    slave_id: 1
    connection:
      kind: tcp
      host: 127.0.0.1
      port: {port}
      timeout_ms: 500
    bad_comm_wait_ms: {bad_comm_wait_ms}
    groups:
      - name: fast
        period_ms: 100
    tags:
      - name: temperature
        units: degC
        region: input_registers
        address: 0
        value_type: float32
        groups: [fast]
      - name: setpoint
        region: holding_registers
        address: 10
        value_type: int16
        access: read_write
        scale: {{ min: 0.0, max: 100.0, raw_max: 1000.0 }}
        groups: [fast]
      - name: status_bit3
        region: holding_registers
        address: 20
        value_type: bool
        bit: 3
        groups: [fast]
      - name: pump
        region: coils
        address: 5
        value_type: bool
        access: read_write
        groups: [fast]
"#
    )
}

fn load(yaml: &str) -> AppConfig {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(yaml.as_bytes()).unwrap();
    AppConfig::load(file.path()).unwrap()
}

async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

fn value(handle: &DeviceHandle, name: &str) -> Option<TagValue> {
    handle.tag_values(&[name])[0].as_ref().and_then(|s| s.value)
}

#[tokio::test]
async fn poll_and_write_over_tcp() {
    let mut bank = DataBank::new();
    bank.set_registers(Region::InputRegisters, 0, &[0x41C8, 0x0000]);
    bank.set_register(Region::HoldingRegisters, 10, 500);
    bank.set_register(Region::HoldingRegisters, 20, 0b1000);
    bank.set_bit(Region::Coils, 5, true);
    let simulator = ModbusTcpSimulator::start(bank).await.unwrap();

    let config = load(&config_yaml(simulator.port(), 1000));
    let shutdown = CancellationToken::new();
    let gateway = Gateway::start(&config, &shutdown).unwrap();
    let handle = gateway.device("plc").unwrap().clone();

    assert!(
        wait_until(|| handle
            .all_values()
            .iter()
            .all(|s| s.quality == Quality::Good))
        .await,
        "tags never became good: {:?}",
        handle.all_values()
    );
    assert_eq!(handle.state(), DeviceState::Polling);
    assert_eq!(value(&handle, "temperature"), Some(TagValue::Float(25.0)));
    assert_eq!(value(&handle, "setpoint"), Some(TagValue::Float(50.0)));
    assert_eq!(value(&handle, "status_bit3"), Some(TagValue::Bool(true)));
    assert_eq!(value(&handle, "pump"), Some(TagValue::Bool(true)));

    let report = handle
        .write([
            ("setpoint", TagValue::Float(75.0)),
            ("pump", TagValue::Bool(false)),
            ("temperature", TagValue::Float(1.0)),
        ])
        .await
        .unwrap();
    assert_eq!(report["setpoint"], Ok(()));
    assert_eq!(report["pump"], Ok(()));
    assert!(report["temperature"].is_err());
    assert_eq!(simulator.register(Region::HoldingRegisters, 10), 750);
    assert!(!simulator.bank().lock().bit(Region::Coils, 5));

    assert!(wait_until(|| value(&handle, "setpoint") == Some(TagValue::Float(75.0))).await);
    assert!(wait_until(|| value(&handle, "pump") == Some(TagValue::Bool(false))).await);

    let info = handle.tag_info("temperature").unwrap();
    assert_eq!(info.units.as_deref(), Some("degC"));
    assert_eq!(info.period_ms, 100);

    shutdown.cancel();
    gateway.shutdown().await;
}

#[tokio::test]
async fn unreachable_endpoint_reports_comm_failure() {
    // Reserve a port, then close it so connects are refused
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let config = load(&config_yaml(port, 200));
    let shutdown = CancellationToken::new();
    let gateway = Gateway::start(&config, &shutdown).unwrap();
    let handle = gateway.device("plc").unwrap().clone();

    assert!(
        wait_until(|| handle
            .all_values()
            .iter()
            .all(|s| s.quality == Quality::BadCommFailure))
        .await
    );
    assert_ne!(handle.state(), DeviceState::Polling);

    let report = handle
        .write([("setpoint", TagValue::Float(10.0))])
        .await
        .unwrap();
    assert!(report["setpoint"].is_err());

    gateway.shutdown().await;
}
