//! In-memory transport session with failure injection

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::DataBank;
use crate::error::{AcqError, Result};
use crate::model::Region;
use crate::transport::TransportSession;

/// A request as seen by the simulated device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimRequest {
    ReadRegisters { region: Region, start: u16, count: u16 },
    ReadBits { region: Region, start: u16, count: u16 },
    WriteRegisters { start: u16, values: Vec<u16> },
    WriteBits { start: u16, values: Vec<bool> },
}

#[derive(Debug, Default)]
struct SimState {
    bank: DataBank,
    connected: bool,
    fail_connect: bool,
    connect_attempts: usize,
    /// Requests touching these ranges get an exception response
    failing: Vec<(Region, u16, u16)>,
    /// Requests touching these ranges drop the connection
    dropping: Vec<(Region, u16, u16)>,
    requests: Vec<SimRequest>,
    reads: usize,
    cancel_after: Option<(usize, CancellationToken)>,
}

fn overlaps(ranges: &[(Region, u16, u16)], region: Region, start: u16, count: u16) -> bool {
    let end = u32::from(start) + u32::from(count);
    ranges.iter().any(|&(r, s, e)| {
        r == region && u32::from(start) < u32::from(e) && u32::from(s) < end
    })
}

impl SimState {
    fn check(&mut self, request: SimRequest, region: Region, start: u16, count: u16) -> Result<()> {
        if !self.connected {
            return Err(AcqError::not_connected());
        }
        self.requests.push(request);

        if overlaps(&self.dropping, region, start, count) {
            self.connected = false;
            return Err(AcqError::connection("Connection reset by peer"));
        }
        if overlaps(&self.failing, region, start, count) {
            return Err(AcqError::protocol(
                "Modbus exception 0x02 (Illegal data address)",
            ));
        }
        Ok(())
    }

    fn after_read(&mut self) {
        self.reads += 1;
        if let Some((after, token)) = &self.cancel_after {
            if self.reads >= *after {
                token.cancel();
            }
        }
    }
}

/// Control side of a simulated device; clones share the same state
#[derive(Debug, Clone, Default)]
pub struct SimulatedDevice {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// A session talking to this device
    pub fn session(&self) -> SimulatedSession {
        SimulatedSession {
            state: Arc::clone(&self.state),
        }
    }

    pub fn set_register(&self, region: Region, address: u16, value: u16) {
        self.state.lock().bank.set_register(region, address, value);
    }

    pub fn set_registers(&self, region: Region, start: u16, values: &[u16]) {
        self.state.lock().bank.set_registers(region, start, values);
    }

    pub fn register(&self, region: Region, address: u16) -> u16 {
        self.state.lock().bank.register(region, address)
    }

    pub fn set_bit(&self, region: Region, address: u16, value: bool) {
        self.state.lock().bank.set_bit(region, address, value);
    }

    pub fn bit(&self, region: Region, address: u16) -> bool {
        self.state.lock().bank.bit(region, address)
    }

    /// Make every connect attempt fail
    pub fn fail_connect(&self, fail: bool) {
        self.state.lock().fail_connect = fail;
    }

    /// Answer requests touching `[start, end)` with an exception
    pub fn fail_range(&self, region: Region, start: u16, end: u16) {
        self.state.lock().failing.push((region, start, end));
    }

    /// Drop the connection on requests touching `[start, end)`
    pub fn drop_on_range(&self, region: Region, start: u16, end: u16) {
        self.state.lock().dropping.push((region, start, end));
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock();
        state.failing.clear();
        state.dropping.clear();
        state.fail_connect = false;
    }

    /// Simulate the peer closing the link
    pub fn drop_connection(&self) {
        self.state.lock().connected = false;
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    pub fn connect_attempts(&self) -> usize {
        self.state.lock().connect_attempts
    }

    pub fn requests(&self) -> Vec<SimRequest> {
        self.state.lock().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.state.lock().requests.clear();
    }

    /// Cancel `token` once `reads` read requests have completed
    pub fn cancel_after_reads(&self, reads: usize, token: CancellationToken) {
        let mut state = self.state.lock();
        state.reads = 0;
        state.cancel_after = Some((reads, token));
    }
}

/// Session half handed to the orchestrator
#[derive(Debug)]
pub struct SimulatedSession {
    state: Arc<Mutex<SimState>>,
}

#[async_trait]
impl TransportSession for SimulatedSession {
    fn is_open(&self) -> bool {
        self.state.lock().connected
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        state.connect_attempts += 1;
        if state.fail_connect {
            return Err(AcqError::connection("Connection refused"));
        }
        state.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.state.lock().connected = false;
    }

    async fn read_registers(
        &mut self,
        _unit_id: u8,
        region: Region,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        let mut state = self.state.lock();
        state.check(
            SimRequest::ReadRegisters {
                region,
                start,
                count,
            },
            region,
            start,
            count,
        )?;
        let values = state.bank.read_registers(region, start, count);
        state.after_read();
        Ok(values)
    }

    async fn read_bits(
        &mut self,
        _unit_id: u8,
        region: Region,
        start: u16,
        count: u16,
    ) -> Result<Vec<bool>> {
        let mut state = self.state.lock();
        state.check(
            SimRequest::ReadBits {
                region,
                start,
                count,
            },
            region,
            start,
            count,
        )?;
        let values = state.bank.read_bits(region, start, count);
        state.after_read();
        Ok(values)
    }

    async fn write_registers(&mut self, _unit_id: u8, start: u16, values: &[u16]) -> Result<()> {
        let mut state = self.state.lock();
        let request = SimRequest::WriteRegisters {
            start,
            values: values.to_vec(),
        };
        state.check(request, Region::HoldingRegisters, start, values.len() as u16)?;
        state
            .bank
            .set_registers(Region::HoldingRegisters, start, values);
        Ok(())
    }

    async fn write_bits(&mut self, _unit_id: u8, start: u16, values: &[bool]) -> Result<()> {
        let mut state = self.state.lock();
        let request = SimRequest::WriteBits {
            start,
            values: values.to_vec(),
        };
        state.check(request, Region::Coils, start, values.len() as u16)?;
        state.bank.write_bits(Region::Coils, start, values);
        Ok(())
    }
}
