//! Service configuration
//!
//! Priority (highest to lowest):
//! 1. Environment variables (`HEATSRV_`, nested keys split on `__`)
//! 2. Config file (`--config` path or `config/heatsrv.yaml`)
//! 3. Default values

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml, Yaml},
    Figment,
};
use heatlink_modbus::{constants, ConnectionParams, SubDevice};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};

pub const DEFAULT_CONFIG_PATH: &str = "config/heatsrv.yaml";
pub const ENV_PREFIX: &str = "HEATSRV_";

/// Device connection settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub host: String,
    pub port: u16,
    pub unit_id: u8,
    pub timeout_ms: u64,
    /// Request retries after a timeout
    pub retries: u8,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: constants::DEFAULT_PORT,
            unit_id: constants::DEFAULT_UNIT_ID,
            timeout_ms: constants::DEFAULT_TIMEOUT.as_millis() as u64,
            retries: constants::DEFAULT_RETRIES,
        }
    }
}

impl DeviceConfig {
    pub fn connection_params(&self) -> ConnectionParams {
        ConnectionParams {
            host: self.host.clone(),
            port: self.port,
            unit_id: self.unit_id,
            timeout: Duration::from_millis(self.timeout_ms),
            retries: self.retries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PollingConfig {
    pub interval_ms: u64,
    /// Upper bound for one full cycle
    pub cycle_timeout_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            cycle_timeout_ms: 10_000,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn cycle_timeout(&self) -> Duration {
        Duration::from_millis(self.cycle_timeout_ms)
    }
}

/// Optional heating circuits installed on the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitConfig {
    pub hk2: bool,
    pub hk3: bool,
    pub hk4: bool,
    pub hk5: bool,
}

impl CircuitConfig {
    /// Whether points of this sub-device are polled
    pub fn is_enabled(&self, device: SubDevice) -> bool {
        match device.optional_circuit() {
            Some(2) => self.hk2,
            Some(3) => self.hk3,
            Some(4) => self.hk4,
            Some(5) => self.hk5,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub path: PathBuf,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("config/items.yaml"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// Daily log files are written here when set
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub device: DeviceConfig,
    pub polling: PollingConfig,
    pub circuits: CircuitConfig,
    pub catalog: CatalogConfig,
    pub logging: LoggingConfig,
}

impl ServiceConfig {
    /// Load from defaults, the config file and `HEATSRV_` environment variables
    ///
    /// An explicit path must exist; the default path is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::from_figment(Self::figment(path, ENV_PREFIX)?)
    }

    pub fn figment(path: Option<&Path>, env_prefix: &str) -> Result<Figment> {
        let figment = Figment::from(Serialized::defaults(ServiceConfig::default()));

        let figment = match path {
            Some(path) => {
                if !path.exists() {
                    return Err(ServiceError::config(format!(
                        "Config file not found: {}",
                        path.display()
                    )));
                }
                merge_file(figment, path)?
            },
            None => figment.merge(Yaml::file(DEFAULT_CONFIG_PATH)),
        };

        Ok(figment.merge(Env::prefixed(env_prefix).split("__")))
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: ServiceConfig = figment
            .extract()
            .map_err(|e| ServiceError::config(format!("Failed to load configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.device.host.trim().is_empty() {
            return Err(ServiceError::config("device.host must be set"));
        }
        if self.device.port == 0 {
            return Err(ServiceError::config("device.port must not be 0"));
        }
        if self.device.timeout_ms == 0 {
            return Err(ServiceError::config("device.timeout_ms must not be 0"));
        }
        if self.polling.interval_ms == 0 || self.polling.cycle_timeout_ms == 0 {
            return Err(ServiceError::config(
                "polling.interval_ms and polling.cycle_timeout_ms must not be 0",
            ));
        }
        if self.polling.cycle_timeout_ms > self.polling.interval_ms {
            return Err(ServiceError::config(format!(
                "polling.cycle_timeout_ms ({}) exceeds polling.interval_ms ({})",
                self.polling.cycle_timeout_ms, self.polling.interval_ms
            )));
        }
        Ok(())
    }
}

fn merge_file(figment: Figment, path: &Path) -> Result<Figment> {
    let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("yaml");
    match extension {
        "yaml" | "yml" => Ok(figment.merge(Yaml::file(path))),
        "toml" => Ok(figment.merge(Toml::file(path))),
        "json" => Ok(figment.merge(Json::file(path))),
        _ => Err(ServiceError::config(format!(
            "Unsupported config file format: {}",
            extension
        ))),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(content: &str, suffix: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    fn valid() -> ServiceConfig {
        ServiceConfig {
            device: DeviceConfig {
                host: "192.168.1.50".into(),
                ..DeviceConfig::default()
            },
            ..ServiceConfig::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = ServiceConfig::default();
        assert_eq!(config.device.port, 502);
        assert_eq!(config.device.unit_id, 1);
        assert_eq!(config.device.retries, 1);
        assert_eq!(config.polling.interval(), Duration::from_secs(30));
        assert_eq!(config.polling.cycle_timeout(), Duration::from_secs(10));
        assert_eq!(config.circuits, CircuitConfig::default());
    }

    #[test]
    fn test_load_yaml_file() {
        let file = write_config(
            r#"
device:
  host: heatpump.local
  timeout_ms: 1500
circuits:
  hk2: true
polling:
  interval_ms: 60000
"#,
            ".yaml",
        );
        let figment = ServiceConfig::figment(Some(file.path()), "HEATSRV_TEST_NONE_").unwrap();
        let config = ServiceConfig::from_figment(figment).unwrap();

        assert_eq!(config.device.host, "heatpump.local");
        assert_eq!(config.device.port, 502);
        assert_eq!(config.device.timeout_ms, 1500);
        assert!(config.circuits.hk2);
        assert!(!config.circuits.hk3);
        assert_eq!(config.polling.interval_ms, 60_000);
        assert_eq!(config.polling.cycle_timeout_ms, 10_000);
    }

    #[test]
    fn test_env_overrides_file() {
        let file = write_config("device:\n  host: from-file\n", ".yaml");
        std::env::set_var("HEATSRV_CFGTEST_DEVICE__HOST", "from-env");
        std::env::set_var("HEATSRV_CFGTEST_DEVICE__PORT", "5020");

        let figment = ServiceConfig::figment(Some(file.path()), "HEATSRV_CFGTEST_").unwrap();
        let config = ServiceConfig::from_figment(figment).unwrap();

        std::env::remove_var("HEATSRV_CFGTEST_DEVICE__HOST");
        std::env::remove_var("HEATSRV_CFGTEST_DEVICE__PORT");

        assert_eq!(config.device.host, "from-env");
        assert_eq!(config.device.port, 5020);
    }

    #[test]
    fn test_missing_explicit_file() {
        let err = ServiceConfig::figment(Some(Path::new("/nonexistent/heatsrv.yaml")), ENV_PREFIX)
            .unwrap_err();
        assert!(matches!(err, ServiceError::Config(_)));
    }

    #[test]
    fn test_unsupported_extension() {
        let file = write_config("host = 1", ".ini");
        assert!(ServiceConfig::figment(Some(file.path()), ENV_PREFIX).is_err());
    }

    #[test]
    fn test_validate() {
        assert!(valid().validate().is_ok());
        assert!(ServiceConfig::default().validate().is_err());

        let mut config = valid();
        config.device.port = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.polling.interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.polling.cycle_timeout_ms = 40_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_circuit_flags() {
        let circuits = CircuitConfig {
            hk2: true,
            ..CircuitConfig::default()
        };
        assert!(circuits.is_enabled(SubDevice::HeatingCircuit1));
        assert!(circuits.is_enabled(SubDevice::HeatingCircuit2));
        assert!(!circuits.is_enabled(SubDevice::HeatingCircuit3));
        assert!(!circuits.is_enabled(SubDevice::HeatingCircuit5));
        assert!(circuits.is_enabled(SubDevice::HotWater));
    }

    #[test]
    fn test_connection_params() {
        let params = valid().device.connection_params();
        assert_eq!(params.address(), "192.168.1.50:502");
        assert_eq!(params.timeout, Duration::from_secs(3));
    }
}
