//! Device behaviour through the gateway, against the in-memory simulated device

use std::time::Duration;

use acqsrv::codec::{ByteOrder, TagValue, ValueType};
use acqsrv::device::{DeviceState, SchedulePolicy};
use acqsrv::model::{Access, GroupDef, Quality, Region, TagDef, TagTable};
use acqsrv::protocols::modbus::RequestLimits;
use acqsrv::test_utils::{SimRequest, SimulatedDevice};
use acqsrv::{DeviceHandle, DeviceSpec, Gateway, WriteError};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

fn device_spec(table: TagTable, schedule: SchedulePolicy) -> DeviceSpec {
    DeviceSpec {
        name: "plc".to_string(),
        unit_id: 1,
        byte_order: ByteOrder::ABCD,
        schedule,
        limits: RequestLimits::default(),
        table,
    }
}

fn start(spec: DeviceSpec, device: &SimulatedDevice) -> (Gateway, DeviceHandle) {
    let root = CancellationToken::new();
    let mut gateway = Gateway::new(&root);
    let handle = gateway.add_device(spec, device.session()).unwrap();
    (gateway, handle)
}

fn quality(handle: &DeviceHandle, name: &str) -> Quality {
    handle.tag_values(&[name])[0].as_ref().unwrap().quality
}

fn value(handle: &DeviceHandle, name: &str) -> Option<TagValue> {
    handle.tag_values(&[name])[0].as_ref().unwrap().value
}

fn reads_at(device: &SimulatedDevice, address: u16) -> usize {
    device
        .requests()
        .iter()
        .filter(|r| matches!(r, SimRequest::ReadRegisters { start, .. } if *start == address))
        .count()
}

#[tokio::test(start_paused = true)]
async fn tags_polled_at_their_group_period() {
    let table = TagTable::builder(Duration::from_secs(1))
        .group(GroupDef::new("fast", Duration::from_secs(1)))
        .unwrap()
        .group(GroupDef::new("slow", Duration::from_secs(5)))
        .unwrap()
        .tag(TagDef::new("a", Region::HoldingRegisters, 0, ValueType::UInt16).with_groups(["fast"]))
        .unwrap()
        .tag(TagDef::new("b", Region::HoldingRegisters, 500, ValueType::UInt16).with_groups(["slow"]))
        .unwrap()
        .build();
    let device = SimulatedDevice::new();
    let (gateway, handle) = start(device_spec(table, SchedulePolicy::default()), &device);

    sleep(Duration::from_millis(10)).await;
    assert_eq!((reads_at(&device, 0), reads_at(&device, 500)), (1, 1));

    sleep(Duration::from_millis(1190)).await;
    assert_eq!((reads_at(&device, 0), reads_at(&device, 500)), (2, 1));

    sleep(Duration::from_millis(2300)).await;
    assert_eq!((reads_at(&device, 0), reads_at(&device, 500)), (4, 1));

    sleep(Duration::from_millis(1600)).await;
    assert!(reads_at(&device, 0) >= 5);
    assert_eq!(reads_at(&device, 500), 2);
    assert_eq!(quality(&handle, "a"), Quality::Good);
    assert_eq!(quality(&handle, "b"), Quality::Good);

    gateway.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn write_batch_reports_per_name() {
    let table = TagTable::builder(Duration::from_secs(1))
        .tag(
            TagDef::new("setpoint", Region::HoldingRegisters, 100, ValueType::Int32)
                .with_access(Access::ReadWrite),
        )
        .unwrap()
        .build();
    let device = SimulatedDevice::new();
    let (gateway, handle) = start(device_spec(table, SchedulePolicy::default()), &device);
    sleep(Duration::from_millis(10)).await;

    let report = handle
        .write([
            ("setpoint", TagValue::Int(-70_000)),
            ("no_such_tag", TagValue::Int(1)),
        ])
        .await
        .unwrap();

    assert_eq!(report.len(), 2);
    assert_eq!(report["setpoint"], Ok(()));
    assert_eq!(report["no_such_tag"], Err(WriteError::UnknownTag));
    assert!(device.requests().contains(&SimRequest::WriteRegisters {
        start: 100,
        values: vec![0xFFFE, 0xEE90],
    }));

    // Invalidated by the write, so read back on the next pass
    sleep(Duration::from_millis(50)).await;
    assert_eq!(value(&handle, "setpoint"), Some(TagValue::Int(-70_000)));

    gateway.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unreachable_device_backs_off_then_recovers() {
    let table = TagTable::builder(Duration::from_secs(1))
        .tag(TagDef::new("a", Region::InputRegisters, 0, ValueType::UInt16))
        .unwrap()
        .tag(TagDef::new("b", Region::InputRegisters, 1, ValueType::UInt16))
        .unwrap()
        .build();
    let device = SimulatedDevice::new();
    device.set_registers(Region::InputRegisters, 0, &[7, 8]);
    device.fail_connect(true);
    let (gateway, handle) = start(device_spec(table, SchedulePolicy::default()), &device);

    sleep(Duration::from_millis(10)).await;
    assert_eq!(quality(&handle, "a"), Quality::BadCommFailure);
    assert_eq!(quality(&handle, "b"), Quality::BadCommFailure);
    assert_eq!(handle.state(), DeviceState::Disconnected);

    // No retry before the bad-comm wait
    sleep(Duration::from_secs(9)).await;
    assert_eq!(device.connect_attempts(), 1);

    device.clear_failures();
    sleep(Duration::from_secs(2)).await;
    assert_eq!(device.connect_attempts(), 2);
    assert_eq!(handle.state(), DeviceState::Polling);
    assert_eq!(quality(&handle, "a"), Quality::Good);
    assert_eq!(value(&handle, "b"), Some(TagValue::Int(8)));

    gateway.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn failed_window_keeps_last_value() {
    let table = TagTable::builder(Duration::from_secs(1))
        .tag(TagDef::new("a", Region::HoldingRegisters, 0, ValueType::UInt16))
        .unwrap()
        .build();
    let device = SimulatedDevice::new();
    device.set_register(Region::HoldingRegisters, 0, 5);
    let (gateway, handle) = start(device_spec(table, SchedulePolicy::default()), &device);

    sleep(Duration::from_millis(10)).await;
    assert_eq!(quality(&handle, "a"), Quality::Good);

    device.fail_range(Region::HoldingRegisters, 0, 1);
    sleep(Duration::from_millis(1500)).await;
    let snapshot = handle.tag_values(&["a"])[0].clone().unwrap();
    assert_eq!(snapshot.quality, Quality::Bad);
    assert_eq!(snapshot.value, Some(TagValue::Int(5)));
    assert!(snapshot.good_at <= snapshot.updated_at);
    // A protocol exception does not drop the session
    assert_eq!(handle.state(), DeviceState::Polling);

    gateway.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn lost_session_reconnects() {
    let table = TagTable::builder(Duration::from_secs(1))
        .tag(TagDef::new("a", Region::HoldingRegisters, 0, ValueType::UInt16))
        .unwrap()
        .build();
    let device = SimulatedDevice::new();
    let (gateway, handle) = start(device_spec(table, SchedulePolicy::default()), &device);
    sleep(Duration::from_millis(10)).await;
    assert_eq!(device.connect_attempts(), 1);

    device.drop_connection();
    sleep(Duration::from_secs(2)).await;
    assert_eq!(device.connect_attempts(), 2);
    assert!(device.is_connected());
    assert_eq!(handle.state(), DeviceState::Polling);

    gateway.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn keep_alive_group_polled_only_while_read() {
    let table = TagTable::builder(Duration::from_secs(1))
        .group(GroupDef::new("hmi", Duration::from_secs(1)).with_keep_alive(Duration::from_secs(10)))
        .unwrap()
        .tag(
            TagDef::new("level", Region::InputRegisters, 3, ValueType::UInt16)
                .with_groups(["hmi"]),
        )
        .unwrap()
        .build();
    let schedule = SchedulePolicy {
        update_inactive: false,
        ..Default::default()
    };
    let device = SimulatedDevice::new();
    let (gateway, handle) = start(device_spec(table, schedule), &device);

    // The forced read after connecting covers inactive tags
    sleep(Duration::from_millis(10)).await;
    assert_eq!(device.requests().len(), 1);

    device.clear_requests();
    sleep(Duration::from_secs(15)).await;
    assert!(device.requests().is_empty());

    let values = handle.group_values("hmi").unwrap();
    assert_eq!(values.len(), 1);
    sleep(Duration::from_secs(6)).await;
    assert!(!device.requests().is_empty());

    assert!(handle.group_values("missing").is_err());
    gateway.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn disabled_group_stops_polling() {
    let table = TagTable::builder(Duration::from_secs(1))
        .group(GroupDef::new("main", Duration::from_secs(1)))
        .unwrap()
        .tag(
            TagDef::new("a", Region::HoldingRegisters, 0, ValueType::UInt16).with_groups(["main"]),
        )
        .unwrap()
        .build();
    let schedule = SchedulePolicy {
        update_inactive: false,
        ..Default::default()
    };
    let device = SimulatedDevice::new();
    let (gateway, handle) = start(device_spec(table, schedule), &device);

    sleep(Duration::from_secs(3)).await;
    assert!(device.requests().len() >= 2);

    handle.set_group_active("main", false).unwrap();
    sleep(Duration::from_secs(1)).await;
    device.clear_requests();
    sleep(Duration::from_secs(20)).await;
    assert!(device.requests().is_empty());

    assert_eq!(
        handle.tags_groups().get("a").cloned(),
        Some(vec!["main".to_string()])
    );
    assert!(handle.set_group_active("missing", true).is_err());
    gateway.shutdown().await;
}
