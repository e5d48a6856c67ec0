//! Gateway runtime: one task per device, handles by name, shared shutdown

use ahash::AHashMap;
use futures::future::join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;
use crate::device::{spawn_device, DeviceHandle, DeviceSpec};
use crate::error::{AcqError, Result};
use crate::transport::TransportSession;

pub struct Gateway {
    devices: AHashMap<String, DeviceHandle>,
    tasks: Vec<(String, JoinHandle<()>)>,
    cancel: CancellationToken,
}

impl Gateway {
    /// Empty gateway; device tasks stop when `parent` is cancelled
    pub fn new(parent: &CancellationToken) -> Self {
        Self {
            devices: AHashMap::new(),
            tasks: Vec::new(),
            cancel: parent.child_token(),
        }
    }

    /// Build every configured device and start polling
    ///
    /// Nothing is spawned unless the whole device set is valid.
    pub fn start(config: &AppConfig, parent: &CancellationToken) -> Result<Self> {
        let devices = config.build_devices()?;
        let mut gateway = Self::new(parent);

        if devices.is_empty() {
            warn!("No devices configured");
        }
        for (spec, connection) in devices {
            info!(
                device = %spec.name,
                endpoint = %connection.endpoint(),
                tags = spec.table.len(),
                "Starting device"
            );
            gateway.add_device(spec, connection.open_session())?;
        }
        info!("Gateway started with {} device(s)", gateway.devices.len());
        Ok(gateway)
    }

    /// Spawn a device task over any session
    pub fn add_device<S>(&mut self, spec: DeviceSpec, session: S) -> Result<DeviceHandle>
    where
        S: TransportSession + 'static,
    {
        if self.devices.contains_key(&spec.name) {
            return Err(AcqError::config(format!(
                "Duplicate device name: {}",
                spec.name
            )));
        }
        spec.check_spans()?;

        let name = spec.name.clone();
        let (handle, task) = spawn_device(spec, session, self.cancel.clone());
        self.devices.insert(name.clone(), handle.clone());
        self.tasks.push((name, task));
        Ok(handle)
    }

    pub fn device(&self, name: &str) -> Option<&DeviceHandle> {
        self.devices.get(name)
    }

    pub fn devices(&self) -> impl Iterator<Item = &DeviceHandle> {
        self.devices.values()
    }

    /// Device names in sorted order
    pub fn device_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.devices.keys().cloned().collect();
        names.sort();
        names
    }

    /// Hand a new tag/group set to a running device
    pub async fn reconfigure(&self, spec: DeviceSpec) -> Result<()> {
        let handle = self
            .devices
            .get(&spec.name)
            .ok_or_else(|| AcqError::state(format!("Unknown device: {}", spec.name)))?;
        handle.reconfigure(spec).await
    }

    /// Apply a reloaded configuration to the devices already running
    ///
    /// Devices added to or removed from the file are reported, not started
    /// or stopped.
    pub async fn reconfigure_from(&self, config: &AppConfig) -> Result<()> {
        let devices = config.build_devices()?;
        for (spec, _) in devices {
            if self.devices.contains_key(&spec.name) {
                self.reconfigure(spec).await?;
            } else {
                warn!(device = %spec.name, "Device not running, restart required");
            }
        }
        for name in self.devices.keys() {
            if config.device(name).is_none() {
                warn!(device = %name, "Device removed from configuration, still running");
            }
        }
        Ok(())
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop every device and wait for the tasks to finish
    pub async fn shutdown(self) {
        info!("Stopping {} device(s)", self.tasks.len());
        self.cancel.cancel();

        let (names, tasks): (Vec<_>, Vec<_>) = self.tasks.into_iter().unzip();
        for (name, result) in names.iter().zip(join_all(tasks).await) {
            match result {
                Ok(()) => debug!(device = %name, "Device task joined"),
                Err(e) => error!(device = %name, "Device task failed: {}", e),
            }
        }
        info!("Gateway stopped");
    }

    /// Run until the parent token is cancelled, then shut down
    pub async fn run_until_cancelled(self) {
        self.cancel.cancelled().await;
        self.shutdown().await;
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::codec::{ByteOrder, TagValue, ValueType};
    use crate::device::{DeviceState, SchedulePolicy};
    use crate::model::{Quality, Region, TagDef, TagTable};
    use crate::protocols::modbus::RequestLimits;
    use crate::test_utils::SimulatedDevice;
    use std::time::Duration;

    fn spec(name: &str, tags: &[(&str, u16)]) -> DeviceSpec {
        let mut builder = TagTable::builder(Duration::from_secs(1));
        for &(tag, addr) in tags {
            builder = builder
                .tag(TagDef::new(tag, Region::HoldingRegisters, addr, ValueType::UInt16))
                .unwrap();
        }
        DeviceSpec {
            name: name.to_string(),
            unit_id: 1,
            byte_order: ByteOrder::ABCD,
            schedule: SchedulePolicy::default(),
            limits: RequestLimits::default(),
            table: builder.build(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_add_and_poll_devices() {
        let root = CancellationToken::new();
        let mut gateway = Gateway::new(&root);
        let plc = SimulatedDevice::new();
        plc.set_register(Region::HoldingRegisters, 0, 42);

        gateway
            .add_device(spec("plc", &[("a", 0)]), plc.session())
            .unwrap();
        assert!(gateway
            .add_device(spec("plc", &[("a", 0)]), plc.session())
            .is_err());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let handle = gateway.device("plc").unwrap();
        assert_eq!(handle.state(), DeviceState::Polling);
        let values = handle.tag_values(&["a"]);
        let snapshot = values[0].as_ref().unwrap();
        assert_eq!(snapshot.value, Some(TagValue::Int(42)));
        assert_eq!(snapshot.quality, Quality::Good);

        gateway.shutdown().await;
        assert!(!plc.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_running_device() {
        let root = CancellationToken::new();
        let mut gateway = Gateway::new(&root);
        let plc = SimulatedDevice::new();
        plc.set_registers(Region::HoldingRegisters, 0, &[1, 2]);
        gateway
            .add_device(spec("plc", &[("a", 0)]), plc.session())
            .unwrap();

        gateway.reconfigure(spec("plc", &[("b", 1)])).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let handle = gateway.device("plc").unwrap();
        assert!(handle.tag_info("a").is_none());
        let values = handle.tag_values(&["b"]);
        assert_eq!(values[0].as_ref().unwrap().value, Some(TagValue::Int(2)));

        assert!(gateway.reconfigure(spec("other", &[])).await.is_err());
        gateway.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_cancellation_stops_devices() {
        let root = CancellationToken::new();
        let mut gateway = Gateway::new(&root);
        let plc = SimulatedDevice::new();
        let handle = gateway
            .add_device(spec("plc", &[("a", 0)]), plc.session())
            .unwrap();

        root.cancel();
        gateway.run_until_cancelled().await;
        assert_eq!(handle.state(), DeviceState::Disconnected);
        assert!(handle.write([("a", TagValue::Int(1))]).await.is_err());
    }
}
