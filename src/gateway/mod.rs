//! # Gateway Module
//!
//! Serial to MQTT bridge: lines come off the sensor board, get normalised into
//! canonical records and go out on the data topic as JSON.
//!
//! ## Module Architecture
//!
//! ```text
//! gateway/
//! ├── message_parser.rs  - Raw line / JSON normalisation into Record
//! ├── serial_reader.rs   - Port lifecycle, reconnect, line framing
//! └── controller.rs      - Poll loop tying reader, parser and publisher together
//! ```
//!
//! The controller does not depend on the concrete reader and client. It talks
//! to a [`LineSource`] and a [`Publisher`], which lets tests drive the poll
//! loop with scripted lines and capture every publish.

pub mod controller;
pub mod message_parser;
pub mod serial_reader;

use rumqttc::QoS;
use thiserror::Error;

use crate::mqtt::MqttClient;
pub use controller::GatewayController;
pub use message_parser::{MessageParser, Record};
pub use serial_reader::{SerialError, SerialReader};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error(transparent)]
    Serial(#[from] SerialError),

    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),
}

/// Where the controller gets raw lines from
pub trait LineSource: Send {
    /// `Ok(None)` when nothing usable arrived this round; `Err` only for
    /// failures that retrying cannot fix
    fn read_line(&mut self) -> Result<Option<String>, SerialError>;

    fn close(&mut self);
}

/// Where the controller sends serialised records
pub trait Publisher: Send {
    fn connect(&mut self);

    /// Must not fail from the caller's point of view; delivery problems are
    /// handled (and logged) by the implementation
    fn publish(&mut self, topic: &str, payload: &str, qos: QoS, retain: bool);

    fn stop(&mut self);
}

impl LineSource for SerialReader {
    fn read_line(&mut self) -> Result<Option<String>, SerialError> {
        SerialReader::read_line(self)
    }

    fn close(&mut self) {
        SerialReader::close(self)
    }
}

impl Publisher for MqttClient {
    fn connect(&mut self) {
        MqttClient::connect(self)
    }

    fn publish(&mut self, topic: &str, payload: &str, qos: QoS, retain: bool) {
        MqttClient::publish(self, topic, payload, qos, retain)
    }

    fn stop(&mut self) {
        MqttClient::stop(self)
    }
}
