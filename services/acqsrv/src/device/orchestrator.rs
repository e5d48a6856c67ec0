//! Device run loop: connect, poll due tags window by window, apply writes

use ahash::AHashMap;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use errors::GatewayErrorTrait;

use super::scheduler::{next_deadline, select_due, SchedulePolicy, SleepPolicy};
use super::{DeviceShared, DeviceSpec, DeviceState};
use crate::codec::{ConverterCache, TagValue};
use crate::error::{Result, WriteError};
use crate::model::{Quality, Region, TagId, TagTable};
use crate::protocols::modbus::{plan_windows, PlanItem, RequestLimits, Window};
use crate::transport::TransportSession;

/// Per-name outcome of a write batch
pub type WriteReport = BTreeMap<String, std::result::Result<(), WriteError>>;

/// Work queued by consumers, applied between cycles
#[derive(Debug)]
pub enum DeviceCommand {
    Write {
        values: BTreeMap<String, TagValue>,
        reply: oneshot::Sender<WriteReport>,
    },
    Reconfigure {
        spec: Box<DeviceSpec>,
        reply: oneshot::Sender<()>,
    },
}

enum Payload {
    Bit(bool),
    Registers(Vec<u16>),
}

pub struct DeviceOrchestrator<S> {
    name: String,
    unit_id: u8,
    session: S,
    shared: Arc<DeviceShared>,
    table: Arc<TagTable>,
    schedule: SchedulePolicy,
    sleep: SleepPolicy,
    limits: RequestLimits,
    cache: ConverterCache,
    force_read: bool,
    cancel: CancellationToken,
}

impl<S: TransportSession> DeviceOrchestrator<S> {
    pub fn new(spec: DeviceSpec, session: S, cancel: CancellationToken) -> Self {
        let table = Arc::new(spec.table);
        let shared = Arc::new(DeviceShared::new(spec.name.clone(), Arc::clone(&table)));
        Self {
            name: spec.name,
            unit_id: spec.unit_id,
            session,
            shared,
            table,
            schedule: spec.schedule,
            sleep: SleepPolicy::default(),
            limits: spec.limits,
            cache: ConverterCache::new(spec.byte_order),
            force_read: true,
            cancel,
        }
    }

    pub fn with_sleep_policy(mut self, sleep: SleepPolicy) -> Self {
        self.sleep = sleep;
        self
    }

    pub fn shared(&self) -> Arc<DeviceShared> {
        Arc::clone(&self.shared)
    }

    pub fn table(&self) -> &Arc<TagTable> {
        &self.table
    }

    pub fn state(&self) -> DeviceState {
        self.shared.state()
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    fn set_state(&self, state: DeviceState) {
        self.shared.set_state(state);
    }

    /// Run until cancelled or every handle is dropped
    pub async fn run(mut self, mut commands: mpsc::Receiver<DeviceCommand>) {
        info!(device = %self.name, tags = self.table.len(), "Device task started");
        let mut deadline = Instant::now();

        loop {
            let wait = self.sleep.wait(deadline, Instant::now());
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                command = commands.recv() => match command {
                    Some(command) => {
                        if self.handle_command(command).await {
                            deadline = Instant::now();
                        }
                    },
                    None => break,
                },
                _ = tokio::time::sleep(wait) => {
                    // Early wake-ups only re-evaluate while connected
                    if Instant::now() >= deadline || self.session.is_open() {
                        deadline = self.run_cycle().await;
                    }
                },
            }
        }

        self.session.disconnect().await;
        self.set_state(DeviceState::Disconnected);
        info!(device = %self.name, "Device task stopped");
    }

    /// Apply a command; returns true when the next cycle should run at once
    async fn handle_command(&mut self, command: DeviceCommand) -> bool {
        match command {
            DeviceCommand::Write { values, reply } => {
                let report = self.write(values).await;
                let written = report.values().any(|r| r.is_ok());
                let _ = reply.send(report);
                // Read back what was just written
                written
            },
            DeviceCommand::Reconfigure { spec, reply } => {
                self.reconfigure(*spec);
                let _ = reply.send(());
                true
            },
        }
    }

    /// One scheduler pass; returns the next deadline
    pub async fn run_cycle(&mut self) -> Instant {
        if !self.session.is_open() {
            return self.connect().await;
        }
        self.poll(Instant::now()).await
    }

    async fn connect(&mut self) -> Instant {
        self.set_state(DeviceState::Connecting);
        match self.session.ensure_connected().await {
            Ok(()) => {
                info!(device = %self.name, "Device connected, full read scheduled");
                self.force_read = true;
                self.set_state(DeviceState::Polling);
                Instant::now()
            },
            Err(e) => {
                let now = Instant::now();
                for tag in self.table.tags() {
                    tag.apply_failure(Quality::BadCommFailure, now);
                }
                self.set_state(DeviceState::Disconnected);
                warn!(
                    device = %self.name,
                    code = e.error_code(),
                    category = ?e.category(),
                    error = %e,
                    retry_in_ms = self.schedule.bad_comm_wait.as_millis() as u64,
                    "Communication failure"
                );
                now + self.schedule.bad_comm_wait
            },
        }
    }

    async fn poll(&mut self, now: Instant) -> Instant {
        self.set_state(DeviceState::Polling);
        let force = std::mem::take(&mut self.force_read);
        let table = Arc::clone(&self.table);
        let pass = select_due(&table, &self.schedule, now, force);
        if pass.due.is_empty() {
            return pass.next_due;
        }

        let mut by_region: BTreeMap<Region, Vec<PlanItem<TagId>>> = BTreeMap::new();
        for &id in &pass.due {
            let tag = table.tag(id);
            by_region
                .entry(tag.region())
                .or_default()
                .push(PlanItem::new(tag.address(), tag.length(), id));
        }

        let (mut windows_read, mut windows_failed) = (0usize, 0usize);
        for (region, items) in by_region {
            let windows =
                match plan_windows(&items, self.limits.read_span(region), self.limits.max_gap) {
                    Ok(windows) => windows,
                    Err(e) => {
                        warn!(device = %self.name, %region, error = %e, "Cannot plan reads");
                        let at = Instant::now();
                        for item in &items {
                            table.tag(item.key).apply_failure(Quality::Bad, at);
                        }
                        continue;
                    },
                };

            for window in windows {
                if self.cancel.is_cancelled() {
                    debug!(device = %self.name, "Cycle interrupted by shutdown");
                    return pass.next_due;
                }

                match self.read_window(&table, region, &window).await {
                    Ok(()) => windows_read += 1,
                    Err(e) => {
                        windows_failed += 1;
                        let at = Instant::now();
                        for &id in &window.members {
                            table.tag(id).apply_failure(Quality::Bad, at);
                        }
                        warn!(
                            device = %self.name,
                            %region,
                            start = window.start,
                            count = window.length,
                            code = e.error_code(),
                            error = %e,
                            "Window read failed"
                        );

                        if e.is_connection_lost() {
                            self.session.disconnect().await;
                            self.set_state(DeviceState::Disconnected);
                            warn!(device = %self.name, "Session lost, reconnecting");
                            return Instant::now();
                        }
                    },
                }
            }
        }

        debug!(
            device = %self.name,
            due = pass.due.len(),
            forced = force,
            windows_read,
            windows_failed,
            "Poll cycle complete"
        );
        next_deadline(&table, &self.schedule, Instant::now())
    }

    async fn read_window(
        &mut self,
        table: &TagTable,
        region: Region,
        window: &Window<TagId>,
    ) -> Result<()> {
        if region.is_bit() {
            let bits = self
                .session
                .read_bits(self.unit_id, region, window.start, window.length)
                .await?;
            let at = Instant::now();
            for &id in &window.members {
                let tag = table.tag(id);
                let offset = (tag.address() - window.start) as usize;
                let slice = bits.get(offset..).unwrap_or(&[]);
                match tag.decode_bits(slice) {
                    Ok(value) => tag.apply_good(value, at),
                    Err(e) => {
                        debug!(device = %self.name, tag = tag.name(), error = %e, "Decode failed");
                        tag.apply_failure(Quality::Bad, at);
                    },
                }
            }
        } else {
            let registers = self
                .session
                .read_registers(self.unit_id, region, window.start, window.length)
                .await?;
            let at = Instant::now();
            for &id in &window.members {
                let tag = table.tag(id);
                let offset = (tag.address() - window.start) as usize;
                let end = (offset + tag.length() as usize).min(registers.len());
                let slice = registers.get(offset..end).unwrap_or(&[]);
                match tag.decode_registers(&mut self.cache, slice) {
                    Ok(value) => tag.apply_good(value, at),
                    Err(e) => {
                        debug!(device = %self.name, tag = tag.name(), error = %e, "Decode failed");
                        tag.apply_failure(Quality::Bad, at);
                    },
                }
            }
        }
        Ok(())
    }

    /// Write a batch of named values
    ///
    /// Unknown, read-only and unencodable names are reported without
    /// touching the device. The rest is packed into contiguous windows; a
    /// failed window only fails its own members.
    pub async fn write(&mut self, values: BTreeMap<String, TagValue>) -> WriteReport {
        let table = Arc::clone(&self.table);
        let mut report = WriteReport::new();
        let mut payloads: AHashMap<TagId, Payload> = AHashMap::new();

        for (name, value) in values {
            let Some(id) = table.tag_id(&name) else {
                report.insert(name, Err(WriteError::UnknownTag));
                continue;
            };
            let tag = table.tag(id);
            if !tag.access().writable() {
                report.insert(name, Err(WriteError::NotWritable));
                continue;
            }
            let payload = match tag.region() {
                Region::Coils => Payload::Bit(value.as_bool()),
                Region::HoldingRegisters => match tag.encode_registers(&mut self.cache, &value) {
                    Ok(registers) => Payload::Registers(registers),
                    Err(e) => {
                        report.insert(name, Err(WriteError::Encode(e.to_string())));
                        continue;
                    },
                },
                _ => {
                    report.insert(name, Err(WriteError::NotWritable));
                    continue;
                },
            };
            payloads.insert(id, payload);
        }

        if payloads.is_empty() {
            return report;
        }

        if !self.session.is_open() {
            if let Err(e) = self.session.ensure_connected().await {
                warn!(device = %self.name, error = %e, "Write rejected, device not connected");
                for &id in payloads.keys() {
                    report.insert(table.tag(id).name().to_string(), Err(WriteError::NotConnected));
                }
                return report;
            }
            self.force_read = true;
            self.set_state(DeviceState::Polling);
        }

        let mut lost = false;
        for region in [Region::Coils, Region::HoldingRegisters] {
            let items: Vec<PlanItem<TagId>> = payloads
                .keys()
                .map(|&id| table.tag(id))
                .filter(|tag| tag.region() == region)
                .map(|tag| PlanItem::new(tag.address(), tag.length(), tag.id()))
                .collect();

            // Contiguous only, so registers between tags are never overwritten
            let windows = match plan_windows(&items, self.limits.write_span(region), Some(0)) {
                Ok(windows) => windows,
                Err(e) => {
                    for item in &items {
                        report.insert(
                            table.tag(item.key).name().to_string(),
                            Err(WriteError::Transport(e.to_string())),
                        );
                    }
                    continue;
                },
            };

            for window in windows {
                let result = self.write_window(&table, region, &window, &payloads).await;
                match &result {
                    Ok(()) => {
                        for &id in &window.members {
                            table.tag(id).invalidate();
                        }
                    },
                    Err(e) => {
                        warn!(
                            device = %self.name,
                            %region,
                            start = window.start,
                            count = window.length,
                            error = %e,
                            "Window write failed"
                        );
                        lost |= e.is_connection_lost();
                    },
                }
                for &id in &window.members {
                    let outcome = result
                        .clone()
                        .map_err(|e| WriteError::Transport(e.to_string()));
                    report.insert(table.tag(id).name().to_string(), outcome);
                }
            }
        }

        if lost {
            self.session.disconnect().await;
            self.set_state(DeviceState::Disconnected);
        }

        let written = report.values().filter(|r| r.is_ok()).count();
        info!(device = %self.name, requested = report.len(), written, "Write batch applied");
        report
    }

    async fn write_window(
        &mut self,
        table: &TagTable,
        region: Region,
        window: &Window<TagId>,
        payloads: &AHashMap<TagId, Payload>,
    ) -> Result<()> {
        let len = window.length as usize;
        match region {
            Region::Coils => {
                let mut bits = vec![false; len];
                for &id in &window.members {
                    if let Some(Payload::Bit(bit)) = payloads.get(&id) {
                        bits[(table.tag(id).address() - window.start) as usize] = *bit;
                    }
                }
                self.session
                    .write_bits(self.unit_id, window.start, &bits)
                    .await
            },
            _ => {
                let mut registers = vec![0u16; len];
                for &id in &window.members {
                    if let Some(Payload::Registers(values)) = payloads.get(&id) {
                        let offset = (table.tag(id).address() - window.start) as usize;
                        let end = (offset + values.len()).min(len);
                        registers[offset..end].copy_from_slice(&values[..end - offset]);
                    }
                }
                self.session
                    .write_registers(self.unit_id, window.start, &registers)
                    .await
            },
        }
    }

    /// Swap in a freshly built tag/group set
    pub fn reconfigure(&mut self, spec: DeviceSpec) {
        if spec.name != self.name {
            warn!(device = %self.name, new_name = %spec.name, "Reconfiguration renames device");
        }
        self.unit_id = spec.unit_id;
        self.schedule = spec.schedule;
        self.limits = spec.limits;
        self.cache.set_byte_order(spec.byte_order);

        let table = Arc::new(spec.table);
        self.shared.set_table(Arc::clone(&table));
        self.table = table;
        self.force_read = true;
        info!(device = %self.name, tags = self.table.len(), "Tag set replaced");
    }
}
