use std::sync::Arc;
use std::time::Duration;

use rumqttc::QoS;
use tracing::{debug, info, warn};

use super::message_parser::MessageParser;
use super::serial_reader::{SerialReader, SystemPorts};
use super::{GatewayError, LineSource, Publisher};
use crate::config::{seconds, AppConfig};
use crate::mqtt::{
    qos_from_level, MessageCallback, MqttClient, MqttMessage, MqttSettings, Subscription,
};
use crate::retry::{RetryPolicy, ShutdownSignal};
use crate::timing::{Sleeper, ThreadSleeper};

/// Poll loop: read a line, parse it, publish the record.
///
/// Runs on the caller's thread until the shared [`ShutdownSignal`] is raised.
/// `stop` releases both transports and may be called any number of times.
pub struct GatewayController<S: LineSource, P: Publisher> {
    reader: S,
    publisher: P,
    parser: MessageParser,
    topic: String,
    qos: QoS,
    retain: bool,
    read_interval: Duration,
    sleeper: Arc<dyn Sleeper>,
    shutdown: ShutdownSignal,
    stopped: bool,
}

impl<S: LineSource, P: Publisher> GatewayController<S, P> {
    pub fn new(reader: S, publisher: P, parser: MessageParser, topic: impl Into<String>) -> Self {
        Self {
            reader,
            publisher,
            parser,
            topic: topic.into(),
            qos: QoS::AtMostOnce,
            retain: false,
            read_interval: Duration::from_millis(100),
            sleeper: Arc::new(ThreadSleeper),
            shutdown: ShutdownSignal::new(),
            stopped: false,
        }
    }

    pub fn with_delivery(mut self, qos: QoS, retain: bool) -> Self {
        self.qos = qos;
        self.retain = retain;
        self
    }

    pub fn with_read_interval(mut self, interval: Duration, sleeper: Arc<dyn Sleeper>) -> Self {
        self.read_interval = interval;
        self.sleeper = sleeper;
        self
    }

    /// Share a stop flag with the reader's and publisher's retry loops
    pub fn with_shutdown(mut self, shutdown: ShutdownSignal) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Raising this handle ends `start` at the next iteration boundary
    pub fn shutdown_handle(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn is_running(&self) -> bool {
        !self.stopped && !self.shutdown.is_requested()
    }

    /// Connect the publisher, then poll until shutdown.
    ///
    /// Only a fatal serial error ends the loop early.
    pub fn start(&mut self) -> Result<(), GatewayError> {
        info!(topic = %self.topic, "Starting gateway");
        self.publisher.connect();

        while self.is_running() {
            if let Some(line) = self.reader.read_line()? {
                self.handle_line(&line);
            }
            self.sleeper.sleep(self.read_interval);
        }

        info!("Gateway loop finished");
        Ok(())
    }

    /// Parse and publish one line, returning the payload that was sent
    pub fn handle_line(&mut self, raw: &str) -> Option<String> {
        let Some(record) = self.parser.parse(raw) else {
            debug!("No record from line {:?}", raw);
            return None;
        };
        let payload = record.to_json();
        self.publisher
            .publish(&self.topic, &payload, self.qos, self.retain);
        Some(payload)
    }

    /// Idempotent
    pub fn stop(&mut self) {
        self.shutdown.request();
        if self.stopped {
            return;
        }
        self.stopped = true;
        info!("Stopping gateway");
        self.reader.close();
        self.publisher.stop();
    }
}

impl GatewayController<SerialReader, MqttClient> {
    /// Wire the real serial reader and MQTT client from configuration
    pub fn from_config(config: &AppConfig, shutdown: ShutdownSignal) -> Result<Self, GatewayError> {
        let sleeper: Arc<dyn Sleeper> = Arc::new(ThreadSleeper);

        let serial_retry = RetryPolicy::new(
            seconds("serial.reconnect_interval", config.serial.reconnect_interval)?,
            sleeper.clone(),
            shutdown.clone(),
        );
        let reader = SerialReader::new(&config.serial.port, config.serial.baudrate, serial_retry)
            .with_timeout(seconds("serial.timeout", config.serial.timeout)?)
            .with_opener(Box::new(SystemPorts));

        let settings = MqttSettings::from_config(config)?;
        let mqtt_retry = RetryPolicy::new(settings.reconnect_interval, sleeper.clone(), shutdown.clone());
        let mut client = MqttClient::new(settings, mqtt_retry);
        if let Some(topic) = config.mqtt.command_topic.as_deref() {
            client = client.with_subscription(Subscription::new(topic, command_logger()));
        }

        let parser = MessageParser::new(&config.gateway.device_id)
            .with_default_sensor(&config.gateway.default_sensor);
        let read_interval = seconds("gateway.read_interval", config.gateway.read_interval)?;

        Ok(Self::new(reader, client, parser, &config.mqtt.publish_topic)
            .with_delivery(qos_from_level(config.mqtt.qos), config.mqtt.retain)
            .with_read_interval(read_interval, sleeper)
            .with_shutdown(shutdown))
    }
}

impl<S: LineSource, P: Publisher> Drop for GatewayController<S, P> {
    fn drop(&mut self) {
        if !self.stopped {
            warn!("Gateway dropped without stop, releasing transports");
            self.stop();
        }
    }
}

/// Commands are only logged; acting on them is up to whoever runs the board
pub fn command_logger() -> MessageCallback {
    Arc::new(|message: MqttMessage| {
        info!("Received command on {}: {}", message.topic, message.payload);
    })
}
