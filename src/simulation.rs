//! Simulated sensor board
//!
//! Stands in for the serial device when no hardware is attached. Each round
//! draws one value per configured sensor, formats it the way the board would
//! print it (`name:value`), runs it through the same [`MessageParser`] as the
//! gateway and publishes the result on the data topic.

use std::time::Duration;

use rand::Rng;
use rumqttc::QoS;
use tracing::{debug, info, warn};

use crate::config::{seconds, AppConfig, ConfigError, SimulatedSensor};
use crate::gateway::{MessageParser, Publisher};
use crate::mqtt::qos_from_level;
use crate::retry::ShutdownSignal;
use crate::timing::Sleeper;

pub struct Simulator {
    parser: MessageParser,
    sensors: Vec<SimulatedSensor>,
    topic: String,
    interval: Duration,
    qos: QoS,
    retain: bool,
}

impl Simulator {
    pub fn new(parser: MessageParser, sensors: Vec<SimulatedSensor>, topic: impl Into<String>) -> Self {
        Self {
            parser,
            sensors,
            topic: topic.into(),
            interval: Duration::from_secs(1),
            qos: QoS::AtMostOnce,
            retain: false,
        }
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        let parser = MessageParser::new(&config.simulation.device_id)
            .with_default_sensor(&config.gateway.default_sensor);
        let mut simulator = Self::new(
            parser,
            config.simulation.sensors.clone(),
            &config.mqtt.publish_topic,
        );
        simulator.interval = seconds("simulation.interval", config.simulation.interval)?;
        simulator.qos = qos_from_level(config.mqtt.qos);
        simulator.retain = config.mqtt.retain;
        Ok(simulator)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn sensors(&self) -> &[SimulatedSensor] {
        &self.sensors
    }

    /// One JSON payload per sensor, in configuration order
    pub fn next_payloads<R: Rng>(&self, rng: &mut R) -> Vec<String> {
        self.sensors
            .iter()
            .filter_map(|sensor| {
                let line = format!("{}:{:?}", sensor.name, sample(sensor, rng));
                self.parser.parse(&line).map(|record| record.to_json())
            })
            .collect()
    }

    /// Publish a round every interval until shutdown
    pub fn run<P, R>(&self, publisher: &mut P, rng: &mut R, sleeper: &dyn Sleeper, shutdown: &ShutdownSignal)
    where
        P: Publisher,
        R: Rng,
    {
        if self.sensors.is_empty() {
            warn!("No simulated sensors configured, nothing will be published");
        }
        info!(
            sensors = self.sensors.len(),
            topic = %self.topic,
            "Starting simulation every {:?}",
            self.interval
        );
        publisher.connect();

        while !shutdown.is_requested() {
            for payload in self.next_payloads(rng) {
                debug!("Simulated payload: {}", payload);
                publisher.publish(&self.topic, &payload, self.qos, self.retain);
            }
            sleeper.sleep(self.interval);
        }

        info!("Simulation stopped");
        publisher.stop();
    }
}

/// Uniform draw over `[min, max]` rounded to two decimals; bounds may be given
/// in either order
fn sample<R: Rng>(sensor: &SimulatedSensor, rng: &mut R) -> f64 {
    let (low, high) = if sensor.min <= sensor.max {
        (sensor.min, sensor.max)
    } else {
        (sensor.max, sensor.min)
    };
    let value = rng.gen_range(low..=high);
    (value * 100.0).round() / 100.0
}
