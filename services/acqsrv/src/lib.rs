//! Register-oriented data acquisition gateway
//!
//! Polls field devices over a register protocol (Modbus TCP), packs due tags
//! into as few requests as the protocol allows, decodes raw registers into
//! typed engineering values and keeps the latest value and quality of every
//! tag for consumers.
//!
//! - [`model`]: tags, groups and the per-device tag table
//! - [`codec`]: byte order, typed converters and scaling
//! - [`protocols::modbus`]: PDU codec, request packer, session and TCP source
//! - [`device`]: scheduler, orchestrator task and consumer handle
//! - [`runtime`]: the gateway owning all device tasks

pub mod bootstrap;
pub mod codec;
pub mod config;
pub mod device;
pub mod error;
pub mod model;
pub mod protocols;
pub mod runtime;
pub mod test_utils;
pub mod transport;

pub use config::AppConfig;
pub use device::{DeviceHandle, DeviceSpec, DeviceState, WriteReport};
pub use error::{AcqError, Result, WriteError};
pub use runtime::Gateway;
