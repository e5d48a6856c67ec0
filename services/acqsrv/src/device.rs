//! Per-device polling engine
//!
//! Each device runs one [`DeviceOrchestrator`] task that owns its session.
//! Consumers talk to it through a cloneable [`DeviceHandle`]: reads go
//! straight to the shared tag table, writes and reconfiguration are queued
//! and applied between poll cycles.

pub mod handle;
pub mod orchestrator;
pub mod scheduler;

use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::ByteOrder;
use crate::error::{AcqError, Result};
use crate::model::TagTable;
use crate::protocols::modbus::RequestLimits;
use crate::transport::TransportSession;

pub use handle::DeviceHandle;
pub use orchestrator::{DeviceCommand, DeviceOrchestrator, WriteReport};
pub use scheduler::{next_deadline, select_due, DuePass, SchedulePolicy, SleepPolicy};

/// Pending commands per device before senders wait
const COMMAND_QUEUE_DEPTH: usize = 32;

/// Connection state of a device task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Disconnected,
    Connecting,
    Polling,
}

/// A fully built device: identity, policies and its tag/group set
#[derive(Debug)]
pub struct DeviceSpec {
    pub name: String,
    pub unit_id: u8,
    pub byte_order: ByteOrder,
    pub schedule: SchedulePolicy,
    pub limits: RequestLimits,
    pub table: TagTable,
}

impl DeviceSpec {
    /// Every tag must fit in a single read (and, if writable, write) request
    pub fn check_spans(&self) -> Result<()> {
        self.limits.validate()?;
        for tag in self.table.tags() {
            let read_span = self.limits.read_span(tag.region());
            if tag.length() > read_span {
                return Err(AcqError::config(format!(
                    "Device '{}', tag '{}': length {} exceeds read limit {}",
                    self.name,
                    tag.name(),
                    tag.length(),
                    read_span
                )));
            }
            let write_span = self.limits.write_span(tag.region());
            if tag.access().writable() && tag.length() > write_span {
                return Err(AcqError::config(format!(
                    "Device '{}', tag '{}': length {} exceeds write limit {}",
                    self.name,
                    tag.name(),
                    tag.length(),
                    write_span
                )));
            }
        }
        Ok(())
    }
}

/// State visible to consumers while the task runs
#[derive(Debug)]
pub struct DeviceShared {
    name: String,
    table: RwLock<Arc<TagTable>>,
    state: RwLock<DeviceState>,
}

impl DeviceShared {
    pub(crate) fn new(name: String, table: Arc<TagTable>) -> Self {
        Self {
            name,
            table: RwLock::new(table),
            state: RwLock::new(DeviceState::Disconnected),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current tag table; a reconfiguration swaps it as a whole
    pub fn table(&self) -> Arc<TagTable> {
        Arc::clone(&self.table.read())
    }

    pub fn state(&self) -> DeviceState {
        *self.state.read()
    }

    pub(crate) fn set_table(&self, table: Arc<TagTable>) {
        *self.table.write() = table;
    }

    pub(crate) fn set_state(&self, state: DeviceState) {
        *self.state.write() = state;
    }
}

/// Start a device task on the current runtime
pub fn spawn_device<S>(
    spec: DeviceSpec,
    session: S,
    cancel: CancellationToken,
) -> (DeviceHandle, JoinHandle<()>)
where
    S: TransportSession + 'static,
{
    let (tx, rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
    let orchestrator = DeviceOrchestrator::new(spec, session, cancel);
    let handle = DeviceHandle::new(orchestrator.shared(), tx);
    let task = tokio::spawn(orchestrator.run(rx));
    (handle, task)
}
