//! Shared runtime helpers for gateway services
//!
//! - logging setup (console + daily rolling file)
//! - shutdown signal handling

pub mod logging;
pub mod shutdown;

pub use logging::{init_logging, LogConfig};
pub use shutdown::{shutdown_token, wait_for_shutdown};
