//! # Configuration
//!
//! One explicit [`AppConfig`] value is loaded at startup and handed to each
//! component's constructor. It comes from a TOML file; selected keys can then be
//! overridden through `IOT_LAB_*` environment variables.
//!
//! Every field has a default, so a file only has to name what differs. A
//! missing file or a malformed numeric override is fatal: the binaries exit
//! rather than run with a configuration nobody asked for.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "IOT_LAB_CONFIG";

const DEFAULT_CONFIG_FILE: &str = "config/config.toml";
const USER_CONFIG_DIR: &str = "iot-lab";
const USER_CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to read configuration file {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Environment variable {var} must be {expected}, got {value:?}")]
    InvalidOverride {
        var: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("Invalid duration for {key}: {value} seconds")]
    InvalidDuration { key: &'static str, value: f64 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    pub port: String,
    pub baudrate: u32,
    /// Seconds between reconnect attempts
    pub reconnect_interval: f64,
    /// Seconds a single read may block
    pub timeout: f64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baudrate: 115_200,
            reconnect_interval: 5.0,
            timeout: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttSection {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub publish_topic: String,
    pub command_topic: Option<String>,
    /// Seconds
    pub keep_alive: f64,
    /// Seconds between reconnect attempts
    pub reconnect_interval: f64,
    /// Seconds to wait for the CONNACK of one attempt
    pub connect_timeout: f64,
    /// 0, 1 or 2
    pub qos: u8,
    pub retain: bool,
}

impl Default for MqttSection {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "iot-lab-gateway".to_string(),
            publish_topic: "lab/device1/data".to_string(),
            command_topic: None,
            keep_alive: 60.0,
            reconnect_interval: 5.0,
            connect_timeout: 2.0,
            qos: 0,
            retain: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewaySection {
    pub device_id: String,
    pub default_sensor: String,
    /// Seconds between poll iterations
    pub read_interval: f64,
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            device_id: "device".to_string(),
            default_sensor: "sensor".to_string(),
            read_interval: 0.1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardSection {
    pub history_size: usize,
    pub csv_output: Option<PathBuf>,
    pub client_id: String,
}

impl Default for DashboardSection {
    fn default() -> Self {
        Self {
            history_size: 200,
            csv_output: None,
            client_id: "iot-lab-dashboard".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedSensor {
    pub name: String,
    #[serde(default)]
    pub min: f64,
    #[serde(default = "default_sensor_max")]
    pub max: f64,
}

fn default_sensor_max() -> f64 {
    100.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationSection {
    /// Seconds between batches
    pub interval: f64,
    pub device_id: String,
    pub sensors: Vec<SimulatedSensor>,
}

impl Default for SimulationSection {
    fn default() -> Self {
        Self {
            interval: 1.0,
            device_id: "simulator".to_string(),
            sensors: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub serial: SerialConfig,
    pub mqtt: MqttSection,
    pub gateway: GatewaySection,
    pub dashboard: DashboardSection,
    pub simulation: SimulationSection,
    pub logging: LoggingSection,
}

impl AppConfig {
    /// Resolve the configuration path, read it and apply environment
    /// overrides. Returns the path that was read alongside the result, since
    /// logging is not up yet when this runs.
    pub fn load(explicit: Option<&Path>) -> Result<(Self, PathBuf), ConfigError> {
        let path = resolve_path(explicit, |var| std::env::var(var).ok());
        let mut config = Self::from_file(&path)?;
        config.apply_overrides(|var| std::env::var(var).ok())?;
        Ok((config, path))
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Apply `IOT_LAB_*` overrides using `lookup` to read variables
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("IOT_LAB_SERIAL_PORT") {
            self.serial.port = v;
        }
        if let Some(v) = lookup("IOT_LAB_SERIAL_BAUD") {
            self.serial.baudrate = parse_override("IOT_LAB_SERIAL_BAUD", "an integer", v)?;
        }
        if let Some(v) = lookup("IOT_LAB_SERIAL_RECONNECT") {
            self.serial.reconnect_interval =
                parse_override("IOT_LAB_SERIAL_RECONNECT", "a number of seconds", v)?;
        }
        if let Some(v) = lookup("IOT_LAB_MQTT_HOST") {
            self.mqtt.host = v;
        }
        if let Some(v) = lookup("IOT_LAB_MQTT_PORT") {
            self.mqtt.port = parse_override("IOT_LAB_MQTT_PORT", "an integer", v)?;
        }
        if let Some(v) = lookup("IOT_LAB_MQTT_PUB") {
            self.mqtt.publish_topic = v;
        }
        if let Some(v) = lookup("IOT_LAB_MQTT_CMD") {
            self.mqtt.command_topic = Some(v);
        }
        if let Some(v) = lookup("IOT_LAB_DEVICE_ID") {
            self.gateway.device_id = v;
        }
        if let Some(v) = lookup("IOT_LAB_READ_INTERVAL") {
            self.gateway.read_interval =
                parse_override("IOT_LAB_READ_INTERVAL", "a number of seconds", v)?;
        }
        if let Some(v) = lookup("IOT_LAB_LOG_LEVEL") {
            self.logging.level = v;
        }
        Ok(())
    }
}

/// Explicit path, then `IOT_LAB_CONFIG`, then `./config/config.toml`, then the
/// user configuration directory
pub fn resolve_path<F>(explicit: Option<&Path>, lookup: F) -> PathBuf
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Some(path) = lookup(CONFIG_PATH_ENV) {
        return PathBuf::from(path);
    }
    let local = PathBuf::from(DEFAULT_CONFIG_FILE);
    if local.exists() {
        return local;
    }
    match dirs::config_dir() {
        Some(mut dir) => {
            dir.push(USER_CONFIG_DIR);
            dir.push(USER_CONFIG_FILE);
            dir
        }
        None => local,
    }
}

/// Convert a configured number of seconds into a `Duration`
pub fn seconds(key: &'static str, value: f64) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(value).map_err(|_| ConfigError::InvalidDuration { key, value })
}

fn parse_override<T: std::str::FromStr>(
    var: &'static str,
    expected: &'static str,
    value: String,
) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidOverride {
            var,
            expected,
            value,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [serial]
            port = "/dev/ttyUSB9"
            baudrate = 57600

            [mqtt]
            host = "broker"
            port = 1884
            "#,
        )
        .unwrap();

        assert_eq!(config.serial.port, "/dev/ttyUSB9");
        assert_eq!(config.serial.baudrate, 57600);
        assert_eq!(config.serial.reconnect_interval, 5.0);
        assert_eq!(config.mqtt.host, "broker");
        assert_eq!(config.mqtt.port, 1884);
        assert_eq!(config.mqtt.publish_topic, "lab/device1/data");
        assert_eq!(config.gateway.device_id, "device");
        assert_eq!(config.dashboard.history_size, 200);
    }

    #[test]
    fn test_simulation_sensors_parse() {
        let config = AppConfig::from_toml(
            r#"
            [simulation]
            interval = 0.5
            sensors = [
                { name = "temp", min = 18.0, max = 30.0 },
                { name = "humidity" },
            ]
            "#,
        )
        .unwrap();

        assert_eq!(config.simulation.sensors.len(), 2);
        assert_eq!(config.simulation.sensors[1].min, 0.0);
        assert_eq!(config.simulation.sensors[1].max, 100.0);
    }

    #[test]
    fn test_environment_overrides_win() {
        let mut config = AppConfig::default();
        config
            .apply_overrides(env(&[
                ("IOT_LAB_SERIAL_PORT", "/dev/ttyACM0"),
                ("IOT_LAB_SERIAL_BAUD", "9600"),
                ("IOT_LAB_MQTT_PORT", "8883"),
                ("IOT_LAB_MQTT_CMD", "lab/device1/cmd"),
                ("IOT_LAB_DEVICE_ID", "arduino1"),
                ("IOT_LAB_READ_INTERVAL", "0.25"),
                ("IOT_LAB_LOG_LEVEL", "debug"),
            ]))
            .unwrap();

        assert_eq!(config.serial.port, "/dev/ttyACM0");
        assert_eq!(config.serial.baudrate, 9600);
        assert_eq!(config.mqtt.port, 8883);
        assert_eq!(config.mqtt.command_topic.as_deref(), Some("lab/device1/cmd"));
        assert_eq!(config.gateway.device_id, "arduino1");
        assert_eq!(config.gateway.read_interval, 0.25);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_malformed_numeric_override_is_fatal() {
        let mut config = AppConfig::default();
        let err = config
            .apply_overrides(env(&[("IOT_LAB_MQTT_PORT", "eighteen")]))
            .unwrap_err();

        match err {
            ConfigError::InvalidOverride { var, value, .. } => {
                assert_eq!(var, "IOT_LAB_MQTT_PORT");
                assert_eq!(value, "eighteen");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_missing_file_is_reported() {
        let err = AppConfig::from_file(Path::new("/nonexistent/iot-lab.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_load_reports_the_path_it_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lab.toml");
        std::fs::write(&path, "[mqtt]\nport = 1884\n").unwrap();

        let (config, loaded_from) = AppConfig::load(Some(&path)).unwrap();

        assert_eq!(loaded_from, path);
        assert_eq!(config.mqtt.port, 1884);
    }

    #[test]
    fn test_explicit_path_beats_environment() {
        let path = resolve_path(
            Some(Path::new("custom.toml")),
            env(&[(CONFIG_PATH_ENV, "from-env.toml")]),
        );
        assert_eq!(path, PathBuf::from("custom.toml"));

        let path = resolve_path(None, env(&[(CONFIG_PATH_ENV, "from-env.toml")]));
        assert_eq!(path, PathBuf::from("from-env.toml"));
    }

    #[test]
    fn test_negative_duration_rejected() {
        assert_eq!(
            seconds("gateway.read_interval", 0.1).unwrap(),
            Duration::from_millis(100)
        );
        assert!(matches!(
            seconds("serial.reconnect_interval", -1.0),
            Err(ConfigError::InvalidDuration { .. })
        ));
    }
}
