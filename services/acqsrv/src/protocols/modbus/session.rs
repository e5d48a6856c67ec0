//! Modbus transport session over any connection source

use async_trait::async_trait;
use tracing::{debug, trace};

use super::constants::function;
use super::pdu::{self, ModbusPdu};
use crate::error::{AcqError, Result};
use crate::model::Region;
use crate::transport::{ConnectionSource, TransportSession};

/// Register/bit operations framed as Modbus PDUs
#[derive(Debug)]
pub struct ModbusSession<C> {
    source: C,
}

impl<C: ConnectionSource> ModbusSession<C> {
    pub fn new(source: C) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &C {
        &self.source
    }

    async fn exchange(&mut self, unit_id: u8, request: &ModbusPdu) -> Result<ModbusPdu> {
        if !self.source.is_open() {
            return Err(AcqError::not_connected());
        }
        self.source.exchange(unit_id, request).await
    }
}

#[async_trait]
impl<C: ConnectionSource> TransportSession for ModbusSession<C> {
    fn is_open(&self) -> bool {
        self.source.is_open()
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        self.source.ensure_connected().await
    }

    async fn disconnect(&mut self) {
        debug!(endpoint = %self.source.name(), "Disconnecting");
        self.source.disconnect().await
    }

    async fn read_registers(
        &mut self,
        unit_id: u8,
        region: Region,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        if region.is_bit() {
            return Err(AcqError::internal(format!("{} is not a register region", region)));
        }
        let request = pdu::build_read_request(region, start, count)?;
        let response = self.exchange(unit_id, &request).await?;
        let values = pdu::parse_read_registers(&response, pdu::read_function(region), count)?;
        trace!(unit_id, %region, start, count, "Registers read");
        Ok(values)
    }

    async fn read_bits(
        &mut self,
        unit_id: u8,
        region: Region,
        start: u16,
        count: u16,
    ) -> Result<Vec<bool>> {
        if !region.is_bit() {
            return Err(AcqError::internal(format!("{} is not a bit region", region)));
        }
        let request = pdu::build_read_request(region, start, count)?;
        let response = self.exchange(unit_id, &request).await?;
        let values = pdu::parse_read_bits(&response, pdu::read_function(region), count)?;
        trace!(unit_id, %region, start, count, "Bits read");
        Ok(values)
    }

    async fn write_registers(&mut self, unit_id: u8, start: u16, values: &[u16]) -> Result<()> {
        let (request, fc) = match values {
            [single] => (
                pdu::build_write_single_register(start, *single)?,
                function::WRITE_SINGLE_REGISTER,
            ),
            _ => (
                pdu::build_write_multiple_registers(start, values)?,
                function::WRITE_MULTIPLE_REGISTERS,
            ),
        };
        let response = self.exchange(unit_id, &request).await?;
        pdu::parse_write_response(&response, fc)
    }

    async fn write_bits(&mut self, unit_id: u8, start: u16, values: &[bool]) -> Result<()> {
        let (request, fc) = match values {
            [single] => (
                pdu::build_write_single_coil(start, *single)?,
                function::WRITE_SINGLE_COIL,
            ),
            _ => (
                pdu::build_write_multiple_coils(start, values)?,
                function::WRITE_MULTIPLE_COILS,
            ),
        };
        let response = self.exchange(unit_id, &request).await?;
        pdu::parse_write_response(&response, fc)
    }
}
