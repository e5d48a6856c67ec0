//! Data acquisition gateway (`acqsrv`)
//!
//! Polls configured field devices and keeps the latest value and quality of
//! every tag.

use clap::Parser;
use tracing::info;

use acqsrv::bootstrap::{self, Args};
use acqsrv::runtime::Gateway;
use errors::{GatewayError, GatewayResult};

#[tokio::main]
async fn main() -> GatewayResult<()> {
    let args = Args::parse();

    let config = bootstrap::load_configuration(&args)?;
    bootstrap::initialize_logging(&args, &config.service.logging)?;
    info!(
        "Starting {} v{} ({})",
        config.service.name,
        env!("CARGO_PKG_VERSION"),
        args.config.display()
    );

    // Validation mode: validate and exit
    if args.validate {
        bootstrap::validate_configuration(&config)?;
        return Ok(());
    }

    let shutdown = common::shutdown_token();
    let gateway = Gateway::start(&config, &shutdown)
        .map_err(|e| GatewayError::StartupFailed(e.to_string()))?;
    gateway.run_until_cancelled().await;

    info!("Service shutdown complete");
    Ok(())
}
