use log::{debug, LevelFilter};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use thiserror::Error;

pub mod default_parameters;

pub const DEFAULT_CONFIG_FILE: &str = "/etc/energomera/config.yaml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Unable to read configuration file '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("Unable to parse configuration file: {0}")]
    Parse(#[from] serde_yml::Error),
    #[error("Invalid logging level '{0}' - should be one of critical, error, warning, info, debug")]
    InvalidLoggingLevel(String),
    #[error("'parameters' should not be empty if 'general.include_default_parameters' is not enabled")]
    NoParameters,
    #[error("Invalid value '{value}' for environment variable '{variable}'")]
    InvalidEnvOverride { variable: String, value: String },
}

fn oneshot_default() -> bool {
    false
}
fn intercycle_delay_default() -> u64 {
    30
}
fn logging_level_default() -> String {
    "error".to_string()
}
fn include_default_parameters_default() -> bool {
    false
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct GeneralConfig {
    #[serde(default = "oneshot_default")]
    pub oneshot: bool,
    /// Seconds to sleep between meter interaction cycles. Doubles as the
    /// MQTT keep-alive so the broker notices a stuck process.
    #[serde(default = "intercycle_delay_default")]
    pub intercycle_delay: u64,
    #[serde(default = "logging_level_default")]
    pub logging_level: String,
    #[serde(default = "include_default_parameters_default")]
    pub include_default_parameters: bool,
}

fn general_default() -> GeneralConfig {
    GeneralConfig {
        oneshot: oneshot_default(),
        intercycle_delay: intercycle_delay_default(),
        logging_level: logging_level_default(),
        include_default_parameters: include_default_parameters_default(),
    }
}

fn meter_timeout_default() -> u64 {
    30
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct MeterConfig {
    /// Serial device the meter is attached to, e.g. `/dev/ttyUSB0`
    pub port: String,
    /// Administrative password for the programming mode session
    pub password: String,
    #[serde(default = "meter_timeout_default")]
    pub timeout: u64,
}

fn mqtt_port_default() -> u16 {
    1883
}
fn hass_discovery_prefix_default() -> String {
    "homeassistant".to_string()
}
fn mqtt_tls_default() -> bool {
    true
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct MqttConfig {
    pub host: String,
    #[serde(default = "mqtt_port_default")]
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    #[serde(default = "hass_discovery_prefix_default")]
    pub hass_discovery_prefix: String,
    #[serde(default = "mqtt_tls_default")]
    pub tls: bool,
}

/// Sensor label(s) for one parameter. A list is used when the meter's
/// response to the address carries one value per phase.
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum ParameterName {
    Single(String),
    PerValue(Vec<String>),
}

impl ParameterName {
    pub fn primary(&self) -> &str {
        match self {
            ParameterName::Single(name) => name,
            ParameterName::PerValue(names) => names.first().map(String::as_str).unwrap_or(""),
        }
    }

    pub fn for_index(&self, idx: usize) -> Option<&str> {
        match self {
            ParameterName::Single(_) => None,
            ParameterName::PerValue(names) => names.get(idx).map(String::as_str),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ParameterSpec {
    /// Protocol address of the parameter, e.g. `ET0PE`
    pub address: String,
    pub name: ParameterName,
    pub device_class: String,
    pub state_class: Option<String>,
    pub unit: Option<String>,
    /// Argument to the parameter's address, may contain template placeholders
    pub additional_data: Option<String>,
    /// Overrides `address` when deriving the sensor's unique id
    pub entity_name: Option<String>,
    /// Selects a single value out of a multi-value response
    pub response_idx: Option<usize>,
    pub entity_category: Option<String>,
}

impl ParameterSpec {
    pub fn entity_id(&self) -> &str {
        self.entity_name.as_deref().unwrap_or(&self.address)
    }
}

fn parameters_default() -> Vec<ParameterSpec> {
    Vec::new()
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct Config {
    #[serde(default = "general_default")]
    pub general: GeneralConfig,
    pub meter: MeterConfig,
    pub mqtt: MqttConfig,
    #[serde(default = "parameters_default")]
    pub parameters: Vec<ParameterSpec>,
}

impl Config {
    /// Loads the configuration from a YAML file, applies environment
    /// overrides and validates the result.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;

        let mut config = Self::from_yaml(&contents)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parses configuration from a YAML string without touching the
    /// environment. Callers doing a full load should also run
    /// `apply_env_overrides` and `validate`.
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yml::from_str(contents)?;
        Ok(config)
    }

    /// `MQTT_HOST`, `MQTT_PORT`, `MQTT_USER` and `MQTT_PASSWORD` take
    /// precedence over the `mqtt` section of the file.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Ok(host) = env::var("MQTT_HOST") {
            debug!("Overriding mqtt.host from environment");
            self.mqtt.host = host;
        }
        if let Ok(port) = env::var("MQTT_PORT") {
            self.mqtt.port = port.parse().map_err(|_| ConfigError::InvalidEnvOverride {
                variable: "MQTT_PORT".to_string(),
                value: port.clone(),
            })?;
        }
        if let Ok(user) = env::var("MQTT_USER") {
            self.mqtt.user = Some(user);
        }
        if let Ok(password) = env::var("MQTT_PASSWORD") {
            self.mqtt.password = Some(password);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        const LEVELS: [&str; 5] = ["critical", "error", "warning", "info", "debug"];
        if !LEVELS.contains(&self.general.logging_level.as_str()) {
            return Err(ConfigError::InvalidLoggingLevel(
                self.general.logging_level.clone(),
            ));
        }

        if self.parameters.is_empty() && !self.general.include_default_parameters {
            return Err(ConfigError::NoParameters);
        }
        Ok(())
    }

    pub fn logging_level(&self) -> LevelFilter {
        match self.general.logging_level.as_str() {
            // The log crate has no level above Error
            "critical" | "error" => LevelFilter::Error,
            "warning" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "debug" => LevelFilter::Debug,
            _ => LevelFilter::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r"
meter:
  port: /dev/ttyUSB0
  password: secret
mqtt:
  host: mqtt.example.org
parameters:
  - address: ET0PE
    name: Cumulative energy
    device_class: energy
    state_class: total_increasing
    unit: kWh
    response_idx: 0
";

    #[test]
    fn test_minimal_config_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        config.validate().unwrap();
        assert!(!config.general.oneshot);
        assert_eq!(config.general.intercycle_delay, 30);
        assert_eq!(config.general.logging_level, "error");
        assert!(!config.general.include_default_parameters);
        assert_eq!(config.meter.timeout, 30);
        assert_eq!(config.mqtt.port, 1883);
        assert_eq!(config.mqtt.hass_discovery_prefix, "homeassistant");
        assert!(config.mqtt.tls);
    }

    #[test]
    fn test_parameter_name_list() {
        let yaml = r"
meter:
  port: /dev/ttyUSB0
  password: secret
mqtt:
  host: mqtt.example.org
parameters:
  - address: VOLTA
    name:
      - Voltage, phase A
      - Voltage, phase B
      - Voltage, phase C
    device_class: voltage
    unit: V
";
        let config = Config::from_yaml(yaml).unwrap();
        let name = &config.parameters[0].name;
        assert_eq!(name.primary(), "Voltage, phase A");
        assert_eq!(name.for_index(2), Some("Voltage, phase C"));
        assert_eq!(name.for_index(3), None);
    }

    #[test]
    fn test_invalid_logging_level_rejected() {
        let yaml = MINIMAL.replace("mqtt:", "general:\n  logging_level: verbose\nmqtt:");
        let config = Config::from_yaml(&yaml).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidLoggingLevel(_))
        ));
    }

    #[test]
    fn test_empty_parameters_need_defaults_enabled() {
        let yaml = r"
meter:
  port: /dev/ttyUSB0
  password: secret
mqtt:
  host: mqtt.example.org
";
        let config = Config::from_yaml(yaml).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::NoParameters)));

        let yaml = format!("{}general:\n  include_default_parameters: true\n", yaml);
        let config = Config::from_yaml(&yaml).unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides_take_precedence() {
        let mut config = Config::from_yaml(MINIMAL).unwrap();
        env::set_var("MQTT_HOST", "broker.lan");
        env::set_var("MQTT_PORT", "8883");
        env::set_var("MQTT_USER", "edge");
        env::set_var("MQTT_PASSWORD", "hunter2");
        config.apply_env_overrides().unwrap();
        env::remove_var("MQTT_HOST");
        env::remove_var("MQTT_PORT");
        env::remove_var("MQTT_USER");
        env::remove_var("MQTT_PASSWORD");

        assert_eq!(config.mqtt.host, "broker.lan");
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.user.as_deref(), Some("edge"));
        assert_eq!(config.mqtt.password.as_deref(), Some("hunter2"));

        // Same test since environment mutation doesn't parallelize well
        env::set_var("MQTT_PORT", "not-a-port");
        let result = config.apply_env_overrides();
        env::remove_var("MQTT_PORT");
        assert!(matches!(result, Err(ConfigError::InvalidEnvOverride { .. })));
    }

    #[test]
    fn test_logging_level_mapping() {
        let mut config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.logging_level(), LevelFilter::Error);
        config.general.logging_level = "debug".to_string();
        assert_eq!(config.logging_level(), LevelFilter::Debug);
        config.general.logging_level = "warning".to_string();
        assert_eq!(config.logging_level(), LevelFilter::Warn);
    }
}
