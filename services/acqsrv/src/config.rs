//! Service configuration
//!
//! Loaded with figment from a YAML, TOML or JSON file (chosen by extension)
//! and merged with `ACQSRV_`-prefixed environment variables, `__` separating
//! nested keys (`ACQSRV_SERVICE__LOGGING__LEVEL=debug`).

use common::LogConfig;
use figment::{
    providers::{Env, Format, Json, Toml, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::codec::{ByteOrder, LinearScale, ValueType};
use crate::device::{DeviceSpec, SchedulePolicy};
use crate::error::{AcqError, Result};
use crate::model::{Access, GroupDef, Region, TagDef, TagMeta, TagTable};
use crate::protocols::modbus::{ModbusSession, RequestLimits, TcpConnectionSource};

// ============================================================================
// Defaults
// ============================================================================

fn default_service_name() -> String {
    "acqsrv".to_string()
}

fn default_slave_id() -> u8 {
    1
}

fn default_port() -> u16 {
    502
}

fn default_timeout_ms() -> u64 {
    3000
}

fn default_bad_comm_wait_ms() -> u64 {
    10_000
}

fn default_true() -> bool {
    true
}

fn default_inactive_period_ms() -> u64 {
    20_000
}

fn default_period_ms() -> u64 {
    1000
}

// ============================================================================
// Schema
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_name")]
    pub name: String,
    #[serde(default)]
    pub logging: LogConfig,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            logging: LogConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    #[serde(default = "default_slave_id")]
    pub slave_id: u8,
    #[serde(default)]
    pub byte_order: ByteOrder,
    pub connection: ConnectionConfig,
    #[serde(default = "default_bad_comm_wait_ms")]
    pub bad_comm_wait_ms: u64,
    #[serde(default = "default_true")]
    pub update_inactive_tags: bool,
    #[serde(default = "default_inactive_period_ms")]
    pub update_inactive_tags_period_ms: u64,
    #[serde(default = "default_period_ms")]
    pub default_period_ms: u64,
    #[serde(default)]
    pub limits: RequestLimits,
    #[serde(default)]
    pub groups: Vec<GroupDef>,
    #[serde(default)]
    pub tags: Vec<TagConfig>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConnectionConfig {
    Tcp {
        host: String,
        #[serde(default = "default_port")]
        port: u16,
        #[serde(default = "default_timeout_ms")]
        timeout_ms: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagConfig {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub units: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    pub region: Region,
    pub address: u16,
    #[serde(default)]
    pub length: Option<u16>,
    pub value_type: ValueType,
    #[serde(default)]
    pub bit: Option<u8>,
    #[serde(default)]
    pub access: Access,
    #[serde(default)]
    pub scale: Option<LinearScale>,
    #[serde(default)]
    pub groups: Vec<String>,
}

// ============================================================================
// Loading
// ============================================================================

impl AppConfig {
    /// Load from a file merged with `ACQSRV_` environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AcqError::config(format!(
                "Configuration file not found: {}",
                path.display()
            )));
        }

        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .ok_or_else(|| AcqError::config("Invalid file extension"))?;

        let figment = match extension {
            "json" => Figment::new().merge(Json::file(path)),
            "toml" => Figment::new().merge(Toml::file(path)),
            "yaml" | "yml" => Figment::new().merge(Yaml::file(path)),
            _ => {
                return Err(AcqError::config(format!(
                    "Unsupported config format: {}",
                    extension
                )))
            },
        };

        let config: AppConfig = figment
            .merge(Env::prefixed("ACQSRV_").split("__"))
            .extract()
            .map_err(|e| AcqError::config(format!("Failed to parse config: {}", e)))?;

        debug!(
            path = %path.display(),
            devices = config.devices.len(),
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Check every device without starting anything
    pub fn validate(&self) -> Result<()> {
        self.build_devices().map(|_| ())
    }

    /// Build every device spec along with its connection settings
    pub fn build_devices(&self) -> Result<Vec<(DeviceSpec, ConnectionConfig)>> {
        let mut names = HashSet::new();
        let mut devices = Vec::with_capacity(self.devices.len());
        for device in &self.devices {
            if !names.insert(device.name.as_str()) {
                return Err(AcqError::config(format!(
                    "Duplicate device name: {}",
                    device.name
                )));
            }
            devices.push((device.build()?, device.connection.clone()));
        }
        Ok(devices)
    }

    pub fn device(&self, name: &str) -> Option<&DeviceConfig> {
        self.devices.iter().find(|d| d.name == name)
    }
}

impl DeviceConfig {
    pub fn schedule(&self) -> SchedulePolicy {
        SchedulePolicy {
            bad_comm_wait: Duration::from_millis(self.bad_comm_wait_ms),
            update_inactive: self.update_inactive_tags,
            inactive_period: Duration::from_millis(self.update_inactive_tags_period_ms),
            ..SchedulePolicy::default()
        }
    }

    /// Validate and build the runtime tag/group set
    ///
    /// All tag problems of the device are reported together.
    pub fn build(&self) -> Result<DeviceSpec> {
        let device_err =
            |msg: String| AcqError::config(format!("Device '{}': {}", self.name, msg));

        if self.name.trim().is_empty() {
            return Err(AcqError::config("Device name must not be empty"));
        }
        self.connection.validate().map_err(|e| device_err(e.to_string()))?;
        if self.bad_comm_wait_ms == 0 || self.default_period_ms == 0 {
            return Err(device_err(
                "bad_comm_wait_ms and default_period_ms must be positive".into(),
            ));
        }
        if self.update_inactive_tags && self.update_inactive_tags_period_ms == 0 {
            return Err(device_err(
                "update_inactive_tags_period_ms must be positive".into(),
            ));
        }
        self.limits.validate().map_err(|e| device_err(e.to_string()))?;

        let mut builder = TagTable::builder(Duration::from_millis(self.default_period_ms));
        for group in &self.groups {
            builder = builder
                .group(group.clone())
                .map_err(|e| device_err(e.to_string()))?;
        }

        let mut problems = Vec::new();
        for tag in &self.tags {
            let def = match tag.to_def() {
                Ok(def) => def,
                Err(e) => {
                    problems.push(e.to_string());
                    continue;
                },
            };
            // The builder is consumed on error, so check before adding
            if let Err(e) = def.validate() {
                problems.push(e.to_string());
                continue;
            }
            builder = match builder.tag(def) {
                Ok(builder) => builder,
                Err(e) => return Err(device_err(join_problems(problems, e.to_string()))),
            };
        }
        if !problems.is_empty() {
            return Err(device_err(problems.join("; ")));
        }

        let spec = DeviceSpec {
            name: self.name.clone(),
            unit_id: self.slave_id,
            byte_order: self.byte_order,
            schedule: self.schedule(),
            limits: self.limits,
            table: builder.build(),
        };
        spec.check_spans()?;
        Ok(spec)
    }
}

fn join_problems(mut problems: Vec<String>, last: String) -> String {
    problems.push(last);
    problems.join("; ")
}

impl TagConfig {
    pub fn to_def(&self) -> Result<TagDef> {
        let mut def = TagDef::new(&self.name, self.region, self.address, self.value_type)
            .with_access(self.access)
            .with_groups(self.groups.iter().cloned())
            .with_meta(TagMeta {
                display_name: self.display_name.clone(),
                description: self.description.clone(),
                units: self.units.clone(),
                format: self.format.clone(),
            });
        def.length = self.length;
        if let Some(bit) = self.bit {
            def = def.with_bit(bit);
        }
        if let Some(scale) = self.scale {
            scale
                .validate()
                .map_err(|e| AcqError::config(format!("Tag '{}': {}", self.name, e)))?;
            def = def.with_scale(Arc::new(scale));
        }
        Ok(def)
    }
}

impl ConnectionConfig {
    pub fn endpoint(&self) -> String {
        match self {
            ConnectionConfig::Tcp { host, port, .. } => format!("tcp://{}:{}", host, port),
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            ConnectionConfig::Tcp {
                host, timeout_ms, ..
            } => {
                if host.trim().is_empty() {
                    return Err(AcqError::config("connection.host must not be empty"));
                }
                if *timeout_ms == 0 {
                    return Err(AcqError::config("connection.timeout_ms must be positive"));
                }
                Ok(())
            },
        }
    }

    /// Session for this endpoint; nothing is opened until the first cycle
    pub fn open_session(&self) -> ModbusSession<TcpConnectionSource> {
        match self {
            ConnectionConfig::Tcp {
                host,
                port,
                timeout_ms,
            } => ModbusSession::new(TcpConnectionSource::new(
                host,
                *port,
                Duration::from_millis(*timeout_ms),
            )),
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
service:
  name: acqsrv-test
  logging:
    level: debug
devices:
  - name: plc1
    slave_id: 3
    byte_order: CDAB
    connection:
      kind: tcp
      host: 127.0.0.1
      port: 1502
    bad_comm_wait_ms: 5000
    update_inactive_tags: false
    groups:
      - name: fast
        period_ms: 500
      - name: slow
        period_ms: 5000
        active: false
    tags:
      - name: temperature
        units: degC
        region: input_registers
        address: 0
        value_type: float32
        groups: [fast]
      - name: setpoint
        region: holding_registers
        address: 10
        value_type: int16
        access: read_write
        scale: { min: 0.0, max: 100.0, raw_max: 1000.0 }
        groups: [fast, slow]
      - name: alarm_bit
        region: holding_registers
        address: 20
        value_type: bool
        bit: 3
"#;

    fn parse(yaml: &str) -> AppConfig {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_parse_and_build() {
        let config = parse(SAMPLE);
        assert_eq!(config.service.name, "acqsrv-test");
        assert_eq!(config.service.logging.level, "debug");

        let devices = config.build_devices().unwrap();
        assert_eq!(devices.len(), 1);
        let (spec, connection) = &devices[0];
        assert_eq!(spec.unit_id, 3);
        assert_eq!(spec.byte_order, ByteOrder::CDAB);
        assert_eq!(spec.schedule.bad_comm_wait, Duration::from_secs(5));
        assert!(!spec.schedule.update_inactive);
        assert_eq!(connection.endpoint(), "tcp://127.0.0.1:1502");

        let setpoint = spec.table.tag_by_name("setpoint").unwrap();
        assert_eq!(setpoint.period(), Duration::from_millis(500));
        assert!(setpoint.access().writable());

        let info = spec.table.tag_info("temperature").unwrap();
        assert_eq!(info.units.as_deref(), Some("degC"));
        assert_eq!(info.length, 2);

        // Tag with no groups falls back to the default period
        let alarm = spec.table.tag_by_name("alarm_bit").unwrap();
        assert_eq!(alarm.period(), Duration::from_secs(1));
    }

    #[test]
    fn test_defaults() {
        let config = parse(
            r#"
devices:
  - name: d
    connection: { kind: tcp, host: plc.local }
"#,
        );
        let device = &config.devices[0];
        assert_eq!(device.slave_id, 1);
        assert_eq!(device.bad_comm_wait_ms, 10_000);
        assert!(device.update_inactive_tags);
        assert_eq!(device.update_inactive_tags_period_ms, 20_000);
        assert_eq!(device.limits, RequestLimits::default());
        assert_eq!(
            device.connection,
            ConnectionConfig::Tcp {
                host: "plc.local".into(),
                port: 502,
                timeout_ms: 3000
            }
        );
    }

    #[test]
    fn test_errors_name_device_and_tags() {
        let config = parse(
            r#"
devices:
  - name: plc9
    connection: { kind: tcp, host: localhost }
    tags:
      - name: coil_as_float
        region: coils
        address: 0
        value_type: float32
      - name: writes_input
        region: input_registers
        address: 0
        value_type: int16
        access: read_write
"#,
        );
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("plc9"), "{}", err);
        assert!(err.contains("coil_as_float"), "{}", err);
        assert!(err.contains("writes_input"), "{}", err);
    }

    #[test]
    fn test_unknown_group_rejected() {
        let config = parse(
            r#"
devices:
  - name: d
    connection: { kind: tcp, host: localhost }
    tags:
      - name: t
        region: holding_registers
        address: 0
        value_type: uint16
        groups: [missing]
"#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_tag_wider_than_limit_rejected() {
        let config = parse(
            r#"
devices:
  - name: d
    connection: { kind: tcp, host: localhost }
    limits: { max_read_registers: 2 }
    tags:
      - name: wide
        region: holding_registers
        address: 0
        value_type: float64
"#,
        );
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("wide"), "{}", err);
    }

    #[test]
    fn test_duplicate_device_rejected() {
        let config = parse(
            r#"
devices:
  - name: d
    connection: { kind: tcp, host: a }
  - name: d
    connection: { kind: tcp, host: b }
"#,
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_degenerate_scale_rejected() {
        let config = parse(
            r#"
devices:
  - name: d
    connection: { kind: tcp, host: a }
    tags:
      - name: flat
        region: holding_registers
        address: 0
        value_type: int16
        scale: { min: 0, max: 10, raw_min: 5, raw_max: 5 }
"#,
        );
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("flat"), "{}", err);
    }

    #[test]
    fn test_load_from_file_with_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acqsrv.yaml");
        std::fs::write(&path, SAMPLE).unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("ACQSRV_SERVICE__LOGGING__LEVEL", "warn");
            let config = AppConfig::load(&path).map_err(|e| e.to_string())?;
            assert_eq!(config.service.logging.level, "warn");
            assert_eq!(config.devices.len(), 1);
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_and_bad_extension() {
        assert!(AppConfig::load("/nonexistent/acqsrv.yaml").is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acqsrv.ini");
        std::fs::write(&path, "").unwrap();
        assert!(AppConfig::load(&path).is_err());
    }
}
