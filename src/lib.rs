//! # IoT Lab Gateway
//!
//! Bridges one serial-connected sensor board and one MQTT broker, with a live
//! dashboard over the buffered data stream.
//!
//! ## Components
//!
//! - **Gateway** ([`gateway`]): serial reader with reconnect, line parser and
//!   the poll loop that publishes canonical JSON records.
//! - **MQTT** ([`mqtt`]): blocking client with lazy reconnection, delivery
//!   confirmation and an optional command subscription.
//! - **Dashboard** ([`dashboard`], [`ui`]): bounded buffer of everything on the
//!   data topic, CSV export and an egui view.
//! - **Simulation** ([`simulation`]): random readings for running without
//!   hardware.
//!
//! Configuration ([`config`]) is loaded once by each binary and passed into
//! constructors; nothing reads global state.
//!
//! ```text
//! serial port ─▶ SerialReader ─▶ MessageParser ─▶ MqttClient ─▶ broker
//!                                                              │
//!                              DashboardApp ◀─ MqttDataHandler ◀┘
//! ```

pub mod config;
pub mod dashboard;
pub mod gateway;
pub mod logging;
pub mod mqtt;
pub mod retry;
pub mod simulation;
pub mod timing;
pub mod ui;

pub use config::{AppConfig, ConfigError};
pub use gateway::{GatewayController, GatewayError, MessageParser, Record};
pub use mqtt::{MqttClient, MqttError, MqttSettings};
pub use retry::{RetryPolicy, ShutdownSignal};
