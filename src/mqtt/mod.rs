//! # MQTT Integration Module
//!
//! Broker connectivity for the gateway and the dashboard: a blocking client that
//! connects with retry, publishes with delivery confirmation and re-subscribes
//! to a command topic after every reconnect.
//!
//! ## Why This Module Exists
//!
//! Both binaries talk to the same broker with the same reconnect rules. Keeping
//! the connection lifecycle in one place means the gateway loop and the
//! dashboard never see transport errors; they see a client that is either
//! connected or quietly trying to become so.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Connection settings derived from AppConfig
//! ├── message_manager.rs  - Inbound message representation and callbacks
//! └── mqtt_handler.rs     - Client, network thread and reconnect logic
//! ```
//!
//! ## Threading
//!
//! `rumqttc`'s event loop runs on a dedicated `mqtt-network` thread per
//! connection. Subscription callbacks are invoked on that thread, so they must
//! be `Send + Sync` and should return quickly.

pub mod config;
pub mod message_manager;
pub mod mqtt_handler;

pub use config::{qos_from_level, MqttSettings};
pub use message_manager::{MessageCallback, MqttMessage, Subscription};
pub use mqtt_handler::{MqttClient, MqttError};
