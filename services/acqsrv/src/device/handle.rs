//! Consumer-side view of a running device

use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use super::orchestrator::{DeviceCommand, WriteReport};
use super::{DeviceShared, DeviceSpec, DeviceState};
use crate::codec::TagValue;
use crate::error::{AcqError, Result};
use crate::model::{TagInfo, TagSnapshot, TagTable};

/// Cheap to clone; reads never wait on the device task
#[derive(Debug, Clone)]
pub struct DeviceHandle {
    shared: Arc<DeviceShared>,
    commands: mpsc::Sender<DeviceCommand>,
}

impl DeviceHandle {
    pub(crate) fn new(shared: Arc<DeviceShared>, commands: mpsc::Sender<DeviceCommand>) -> Self {
        Self { shared, commands }
    }

    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub fn state(&self) -> DeviceState {
        self.shared.state()
    }

    pub fn table(&self) -> Arc<TagTable> {
        self.shared.table()
    }

    /// Snapshots in request order; `None` for unknown names
    pub fn tag_values<S: AsRef<str>>(&self, names: &[S]) -> Vec<Option<TagSnapshot>> {
        self.table().tag_values(names)
    }

    /// Snapshots of a group's tags; marks the group as recently used
    pub fn group_values(&self, group: &str) -> Result<Vec<TagSnapshot>> {
        self.table().group_values(group, Instant::now())
    }

    pub fn all_values(&self) -> Vec<TagSnapshot> {
        self.table().all_values()
    }

    pub fn tag_info(&self, name: &str) -> Option<TagInfo> {
        self.table().tag_info(name)
    }

    /// Tag name to group names
    pub fn tags_groups(&self) -> BTreeMap<String, Vec<String>> {
        self.table().tags_groups()
    }

    pub fn set_group_active(&self, group: &str, active: bool) -> Result<()> {
        self.table().set_group_active(group, active)
    }

    /// Queue a write batch and wait for its per-name report
    pub async fn write<I, S>(&self, values: I) -> Result<WriteReport>
    where
        I: IntoIterator<Item = (S, TagValue)>,
        S: Into<String>,
    {
        let values: BTreeMap<String, TagValue> =
            values.into_iter().map(|(name, value)| (name.into(), value)).collect();
        let (reply, rx) = oneshot::channel();
        self.send(DeviceCommand::Write { values, reply }).await?;
        rx.await.map_err(|_| self.stopped())
    }

    /// Replace the device's tags and groups; returns once applied
    pub async fn reconfigure(&self, spec: DeviceSpec) -> Result<()> {
        spec.check_spans()?;
        let (reply, rx) = oneshot::channel();
        self.send(DeviceCommand::Reconfigure {
            spec: Box::new(spec),
            reply,
        })
        .await?;
        rx.await.map_err(|_| self.stopped())
    }

    async fn send(&self, command: DeviceCommand) -> Result<()> {
        self.commands.send(command).await.map_err(|_| self.stopped())
    }

    fn stopped(&self) -> AcqError {
        AcqError::state(format!("Device '{}' task is not running", self.name()))
    }
}
