//! Connection and session contracts consumed by the device orchestrator
//!
//! A [`ConnectionSource`] owns the socket and moves framed PDUs; a
//! [`TransportSession`] speaks register reads and writes on top of it.
//! Both are used by exactly one device task, so methods take `&mut self`.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::Region;
use crate::protocols::modbus::pdu::ModbusPdu;

#[async_trait]
pub trait ConnectionSource: Send {
    /// Endpoint description for logs
    fn name(&self) -> &str;

    fn is_open(&self) -> bool;

    /// Open the connection if needed; idempotent
    async fn ensure_connected(&mut self) -> Result<()>;

    async fn disconnect(&mut self);

    /// Send one request PDU to `unit_id` and return its response PDU
    async fn exchange(&mut self, unit_id: u8, request: &ModbusPdu) -> Result<ModbusPdu>;
}

#[async_trait]
pub trait TransportSession: Send {
    fn is_open(&self) -> bool;

    async fn ensure_connected(&mut self) -> Result<()>;

    async fn disconnect(&mut self);

    /// Read `count` 16-bit registers from a register region
    async fn read_registers(
        &mut self,
        unit_id: u8,
        region: Region,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>>;

    /// Read `count` bits from a bit region
    async fn read_bits(
        &mut self,
        unit_id: u8,
        region: Region,
        start: u16,
        count: u16,
    ) -> Result<Vec<bool>>;

    /// Write holding registers starting at `start`
    async fn write_registers(&mut self, unit_id: u8, start: u16, values: &[u16]) -> Result<()>;

    /// Write coils starting at `start`
    async fn write_bits(&mut self, unit_id: u8, start: u16, values: &[bool]) -> Result<()>;
}

#[async_trait]
impl<T: TransportSession + ?Sized> TransportSession for Box<T> {
    fn is_open(&self) -> bool {
        (**self).is_open()
    }

    async fn ensure_connected(&mut self) -> Result<()> {
        (**self).ensure_connected().await
    }

    async fn disconnect(&mut self) {
        (**self).disconnect().await
    }

    async fn read_registers(
        &mut self,
        unit_id: u8,
        region: Region,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        (**self).read_registers(unit_id, region, start, count).await
    }

    async fn read_bits(
        &mut self,
        unit_id: u8,
        region: Region,
        start: u16,
        count: u16,
    ) -> Result<Vec<bool>> {
        (**self).read_bits(unit_id, region, start, count).await
    }

    async fn write_registers(&mut self, unit_id: u8, start: u16, values: &[u16]) -> Result<()> {
        (**self).write_registers(unit_id, start, values).await
    }

    async fn write_bits(&mut self, unit_id: u8, start: u16, values: &[bool]) -> Result<()> {
        (**self).write_bits(unit_id, start, values).await
    }
}
