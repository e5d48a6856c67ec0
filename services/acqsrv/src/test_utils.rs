//! Test doubles for device sessions
//!
//! [`SimulatedDevice`] is an in-memory session with failure injection for
//! orchestrator tests; [`ModbusTcpSimulator`] is a small Modbus TCP server
//! for end-to-end runs over a real socket.

pub mod session;
pub mod simulator;

use ahash::AHashMap;

use crate::model::Region;

pub use session::{SimRequest, SimulatedDevice, SimulatedSession};
pub use simulator::ModbusTcpSimulator;

/// Register and bit storage; unset addresses read as zero
#[derive(Debug, Default, Clone)]
pub struct DataBank {
    coils: AHashMap<u16, bool>,
    discrete_inputs: AHashMap<u16, bool>,
    input_registers: AHashMap<u16, u16>,
    holding_registers: AHashMap<u16, u16>,
}

impl DataBank {
    pub fn new() -> Self {
        Self::default()
    }

    fn bits(&self, region: Region) -> &AHashMap<u16, bool> {
        match region {
            Region::Coils => &self.coils,
            _ => &self.discrete_inputs,
        }
    }

    fn bits_mut(&mut self, region: Region) -> &mut AHashMap<u16, bool> {
        match region {
            Region::Coils => &mut self.coils,
            _ => &mut self.discrete_inputs,
        }
    }

    fn registers(&self, region: Region) -> &AHashMap<u16, u16> {
        match region {
            Region::InputRegisters => &self.input_registers,
            _ => &self.holding_registers,
        }
    }

    fn registers_mut(&mut self, region: Region) -> &mut AHashMap<u16, u16> {
        match region {
            Region::InputRegisters => &mut self.input_registers,
            _ => &mut self.holding_registers,
        }
    }

    pub fn bit(&self, region: Region, address: u16) -> bool {
        self.bits(region).get(&address).copied().unwrap_or(false)
    }

    pub fn set_bit(&mut self, region: Region, address: u16, value: bool) {
        self.bits_mut(region).insert(address, value);
    }

    pub fn register(&self, region: Region, address: u16) -> u16 {
        self.registers(region).get(&address).copied().unwrap_or(0)
    }

    pub fn set_register(&mut self, region: Region, address: u16, value: u16) {
        self.registers_mut(region).insert(address, value);
    }

    pub fn set_registers(&mut self, region: Region, start: u16, values: &[u16]) {
        for (i, &value) in values.iter().enumerate() {
            self.set_register(region, start.wrapping_add(i as u16), value);
        }
    }

    pub fn read_bits(&self, region: Region, start: u16, count: u16) -> Vec<bool> {
        (0..count)
            .map(|i| self.bit(region, start.wrapping_add(i)))
            .collect()
    }

    pub fn read_registers(&self, region: Region, start: u16, count: u16) -> Vec<u16> {
        (0..count)
            .map(|i| self.register(region, start.wrapping_add(i)))
            .collect()
    }

    pub fn write_bits(&mut self, region: Region, start: u16, values: &[bool]) {
        for (i, &value) in values.iter().enumerate() {
            self.set_bit(region, start.wrapping_add(i as u16), value);
        }
    }
}
