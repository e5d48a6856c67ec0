//! Modbus implementation: limits, PDU codec, request packer, session and TCP source

pub mod constants;
pub mod pdu;
pub mod planner;
pub mod session;
pub mod tcp;

pub use planner::{plan_windows, PlanItem, RequestLimits, Window};
pub use session::ModbusSession;
pub use tcp::TcpConnectionSource;
