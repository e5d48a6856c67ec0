//! Modbus PDU buffer, request builders and response parsers

use tracing::trace;

use super::constants::{function, MAX_PDU_SIZE, MAX_READ_BITS, MAX_READ_REGISTERS, MAX_WRITE_BITS, MAX_WRITE_REGISTERS};
use crate::error::{AcqError, Result};
use crate::model::Region;

/// Stack-allocated PDU
#[derive(Debug, Clone)]
pub struct ModbusPdu {
    data: [u8; MAX_PDU_SIZE],
    len: usize,
}

impl ModbusPdu {
    #[inline]
    pub fn new() -> Self {
        Self {
            data: [0; MAX_PDU_SIZE],
            len: 0,
        }
    }

    pub fn from_slice(data: &[u8]) -> Result<Self> {
        if data.len() > MAX_PDU_SIZE {
            return Err(AcqError::protocol(format!(
                "PDU too large: {} bytes (max {})",
                data.len(),
                MAX_PDU_SIZE
            )));
        }
        let mut pdu = Self::new();
        pdu.data[..data.len()].copy_from_slice(data);
        pdu.len = data.len();
        Ok(pdu)
    }

    #[inline]
    pub fn push(&mut self, byte: u8) -> Result<()> {
        if self.len >= MAX_PDU_SIZE {
            return Err(AcqError::protocol("PDU buffer full"));
        }
        self.data[self.len] = byte;
        self.len += 1;
        Ok(())
    }

    #[inline]
    pub fn push_u16(&mut self, value: u16) -> Result<()> {
        let [hi, lo] = value.to_be_bytes();
        self.push(hi)?;
        self.push(lo)
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn function_code(&self) -> Option<u8> {
        (self.len > 0).then(|| self.data[0])
    }

    #[inline]
    pub fn is_exception(&self) -> bool {
        self.function_code().is_some_and(|fc| fc & 0x80 != 0)
    }

    pub fn exception_code(&self) -> Option<u8> {
        (self.is_exception() && self.len > 1).then(|| self.data[1])
    }
}

impl Default for ModbusPdu {
    fn default() -> Self {
        Self::new()
    }
}

fn exception_name(code: u8) -> &'static str {
    match code {
        0x01 => "illegal function",
        0x02 => "illegal data address",
        0x03 => "illegal data value",
        0x04 => "server device failure",
        0x05 => "acknowledge",
        0x06 => "server device busy",
        0x0A => "gateway path unavailable",
        0x0B => "gateway target failed to respond",
        _ => "unknown exception",
    }
}

/// Read function code for a region
pub fn read_function(region: Region) -> u8 {
    match region {
        Region::Coils => function::READ_COILS,
        Region::DiscreteInputs => function::READ_DISCRETE_INPUTS,
        Region::HoldingRegisters => function::READ_HOLDING_REGISTERS,
        Region::InputRegisters => function::READ_INPUT_REGISTERS,
    }
}

/// FC01-FC04 request
pub fn build_read_request(region: Region, start: u16, count: u16) -> Result<ModbusPdu> {
    let max = if region.is_bit() {
        MAX_READ_BITS
    } else {
        MAX_READ_REGISTERS
    };
    if count == 0 || count > max {
        return Err(AcqError::protocol(format!(
            "Invalid read count {} for {} (1..={})",
            count, region, max
        )));
    }
    if start as u32 + count as u32 > 65536 {
        return Err(AcqError::protocol(format!(
            "Read {}+{} exceeds address space",
            start, count
        )));
    }

    let mut pdu = ModbusPdu::new();
    pdu.push(read_function(region))?;
    pdu.push_u16(start)?;
    pdu.push_u16(count)?;
    trace!(fc = pdu.as_slice()[0], start, count, "Read request built");
    Ok(pdu)
}

/// FC05, 0xFF00 for ON
pub fn build_write_single_coil(address: u16, value: bool) -> Result<ModbusPdu> {
    let mut pdu = ModbusPdu::new();
    pdu.push(function::WRITE_SINGLE_COIL)?;
    pdu.push_u16(address)?;
    pdu.push_u16(if value { 0xFF00 } else { 0x0000 })?;
    Ok(pdu)
}

/// FC06
pub fn build_write_single_register(address: u16, value: u16) -> Result<ModbusPdu> {
    let mut pdu = ModbusPdu::new();
    pdu.push(function::WRITE_SINGLE_REGISTER)?;
    pdu.push_u16(address)?;
    pdu.push_u16(value)?;
    Ok(pdu)
}

/// FC15, coils packed LSB first
pub fn build_write_multiple_coils(start: u16, values: &[bool]) -> Result<ModbusPdu> {
    if values.is_empty() || values.len() > MAX_WRITE_BITS as usize {
        return Err(AcqError::protocol(format!(
            "Invalid coil count for FC15: {}",
            values.len()
        )));
    }

    let mut pdu = ModbusPdu::new();
    pdu.push(function::WRITE_MULTIPLE_COILS)?;
    pdu.push_u16(start)?;
    pdu.push_u16(values.len() as u16)?;
    pdu.push(values.len().div_ceil(8) as u8)?;
    for chunk in values.chunks(8) {
        let byte = chunk
            .iter()
            .enumerate()
            .fold(0u8, |acc, (i, &on)| if on { acc | (1 << i) } else { acc });
        pdu.push(byte)?;
    }
    Ok(pdu)
}

/// FC16
pub fn build_write_multiple_registers(start: u16, values: &[u16]) -> Result<ModbusPdu> {
    if values.is_empty() || values.len() > MAX_WRITE_REGISTERS as usize {
        return Err(AcqError::protocol(format!(
            "Invalid register count for FC16: {}",
            values.len()
        )));
    }

    let mut pdu = ModbusPdu::new();
    pdu.push(function::WRITE_MULTIPLE_REGISTERS)?;
    pdu.push_u16(start)?;
    pdu.push_u16(values.len() as u16)?;
    pdu.push((values.len() * 2) as u8)?;
    for &value in values {
        pdu.push_u16(value)?;
    }
    Ok(pdu)
}

/// Exception and function-code checks shared by every response
fn check_response(pdu: &ModbusPdu, expected_fc: u8) -> Result<&[u8]> {
    let data = pdu.as_slice();
    if data.is_empty() {
        return Err(AcqError::protocol("Empty response PDU"));
    }
    if pdu.is_exception() {
        let code = pdu.exception_code().unwrap_or(0);
        return Err(AcqError::protocol(format!(
            "Modbus exception response to FC{:02X}: code {:02X} ({})",
            expected_fc,
            code,
            exception_name(code)
        )));
    }
    if data[0] != expected_fc {
        return Err(AcqError::protocol(format!(
            "Function code mismatch: expected {:02X}, got {:02X}",
            expected_fc, data[0]
        )));
    }
    Ok(data)
}

/// FC03/FC04 response
pub fn parse_read_registers(pdu: &ModbusPdu, expected_fc: u8, count: u16) -> Result<Vec<u16>> {
    let data = check_response(pdu, expected_fc)?;
    let expected_bytes = count as usize * 2;
    if data.len() < 2 || data[1] as usize != expected_bytes || data.len() < 2 + expected_bytes {
        return Err(AcqError::protocol(format!(
            "Malformed register response: expected {} data bytes, got frame of {}",
            expected_bytes,
            data.len()
        )));
    }
    Ok(data[2..2 + expected_bytes]
        .chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect())
}

/// FC01/FC02 response, truncated to `count` bits
pub fn parse_read_bits(pdu: &ModbusPdu, expected_fc: u8, count: u16) -> Result<Vec<bool>> {
    let data = check_response(pdu, expected_fc)?;
    let expected_bytes = (count as usize).div_ceil(8);
    if data.len() < 2 || data[1] as usize != expected_bytes || data.len() < 2 + expected_bytes {
        return Err(AcqError::protocol(format!(
            "Malformed bit response: expected {} data bytes, got frame of {}",
            expected_bytes,
            data.len()
        )));
    }
    Ok((0..count as usize)
        .map(|i| data[2 + i / 8] & (1 << (i % 8)) != 0)
        .collect())
}

/// FC05/06/15/16 echo response
pub fn parse_write_response(pdu: &ModbusPdu, expected_fc: u8) -> Result<()> {
    let data = check_response(pdu, expected_fc)?;
    if data.len() < 5 {
        return Err(AcqError::protocol(format!(
            "Write response too short: {} bytes",
            data.len()
        )));
    }
    Ok(())
}
