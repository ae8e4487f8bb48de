use crate::config::{seconds, AppConfig, ConfigError};
use rumqttc::{MqttOptions, QoS};
use std::time::Duration;
use tracing::warn;

/// Shortest keep-alive the broker connection is configured with
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Connection parameters for one broker
#[derive(Debug, Clone, PartialEq)]
pub struct MqttSettings {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub keep_alive: Duration,
    pub reconnect_interval: Duration,
    /// Upper bound on waiting for the CONNACK of a single attempt
    pub connect_timeout: Duration,
    /// Upper bound on waiting for a publish to be written or acknowledged
    pub ack_timeout: Duration,
}

impl Default for MqttSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "iot-lab-gateway".to_string(),
            keep_alive: Duration::from_secs(60),
            reconnect_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(2),
            ack_timeout: Duration::from_secs(5),
        }
    }
}

impl MqttSettings {
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let mqtt = &config.mqtt;
        Ok(Self {
            host: mqtt.host.clone(),
            port: mqtt.port,
            client_id: mqtt.client_id.clone(),
            keep_alive: seconds("mqtt.keep_alive", mqtt.keep_alive)?,
            reconnect_interval: seconds("mqtt.reconnect_interval", mqtt.reconnect_interval)?,
            connect_timeout: seconds("mqtt.connect_timeout", mqtt.connect_timeout)?,
            ..Self::default()
        })
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(self.client_id.clone(), self.host.clone(), self.port);
        options.set_keep_alive(self.keep_alive.max(MIN_KEEP_ALIVE));
        options
    }
}

/// Map a configured QoS level; unknown levels fall back to at-most-once
pub fn qos_from_level(level: u8) -> QoS {
    match level {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        other => {
            warn!("Unsupported QoS level {}, using 0", other);
            QoS::AtMostOnce
        }
    }
}
