use std::path::PathBuf;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use iot_lab_gateway::retry::listen_for_signals;
use iot_lab_gateway::{logging, AppConfig, GatewayController, ShutdownSignal};
use tracing::info;

fn main() -> Result<()> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let (config, loaded_from) =
        AppConfig::load(config_path.as_deref()).wrap_err("Failed to load configuration")?;
    logging::init(&config.logging.level)?;
    info!(path = %loaded_from.display(), "Configuration loaded");

    info!(
        serial = %config.serial.port,
        baudrate = config.serial.baudrate,
        broker = %format!("{}:{}", config.mqtt.host, config.mqtt.port),
        topic = %config.mqtt.publish_topic,
        "Starting serial to MQTT gateway"
    );

    let shutdown = ShutdownSignal::new();
    let _signals =
        listen_for_signals(shutdown.clone()).wrap_err("Failed to install signal handlers")?;

    let mut controller = GatewayController::from_config(&config, shutdown)
        .wrap_err("Invalid gateway configuration")?;
    let outcome = controller.start();
    controller.stop();

    outcome.wrap_err("Gateway stopped on a fatal error")
}
