//! Service bootstrap: command line, configuration and logging

use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, info};

use common::LogConfig;
use errors::{GatewayError, GatewayResult};

use crate::config::AppConfig;

/// Command-line arguments for acqsrv
#[derive(Parser, Debug, Clone)]
#[command(
    name = "acqsrv",
    version = env!("CARGO_PKG_VERSION"),
    about = "Register-oriented data acquisition gateway",
    long_about = None
)]
pub struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(
        short = 'c',
        long,
        env = "ACQSRV_CONFIG",
        default_value = "config/acqsrv.yaml"
    )]
    pub config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Validation mode - only validate configuration without starting service
    #[arg(long)]
    pub validate: bool,
}

/// Load the configuration file named on the command line
pub fn load_configuration(args: &Args) -> GatewayResult<AppConfig> {
    let config = AppConfig::load(&args.config)?;
    Ok(config)
}

/// Initialize logging from the config file, with the CLI level taking precedence
pub fn initialize_logging(args: &Args, logging: &LogConfig) -> GatewayResult<()> {
    let mut log_config = logging.clone();
    if let Some(level) = &args.log_level {
        log_config.level = level.clone();
    }

    common::init_logging(&log_config)
        .map_err(|e| GatewayError::Configuration(format!("Failed to init logging: {}", e)))?;
    debug!(level = %log_config.level, "Logging initialized");
    Ok(())
}

/// Build every device without starting any
pub fn validate_configuration(config: &AppConfig) -> GatewayResult<()> {
    config.validate()?;
    let tags: usize = config.devices.iter().map(|d| d.tags.len()).sum();
    info!(
        "Configuration valid: {} device(s), {} tag(s)",
        config.devices.len(),
        tags
    );
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = Args::parse_from(["acqsrv"]);
        assert!(!args.validate);
        assert!(args.log_level.is_none());
    }

    #[test]
    fn test_args_overrides() {
        let args = Args::parse_from([
            "acqsrv",
            "--config",
            "/etc/acqsrv.toml",
            "--log-level",
            "debug",
            "--validate",
        ]);
        assert_eq!(args.config, PathBuf::from("/etc/acqsrv.toml"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.validate);
    }
}
