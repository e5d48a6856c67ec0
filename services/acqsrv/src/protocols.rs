//! Fieldbus protocol implementations

pub mod modbus;
