use std::path::PathBuf;
use std::sync::Arc;

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use iot_lab_gateway::retry::listen_for_signals;
use iot_lab_gateway::simulation::Simulator;
use iot_lab_gateway::timing::ThreadSleeper;
use iot_lab_gateway::{logging, AppConfig, MqttClient, MqttSettings, RetryPolicy, ShutdownSignal};
use tracing::info;

fn main() -> Result<()> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let (config, loaded_from) =
        AppConfig::load(config_path.as_deref()).wrap_err("Failed to load configuration")?;
    logging::init(&config.logging.level)?;
    info!(path = %loaded_from.display(), "Configuration loaded");

    let shutdown = ShutdownSignal::new();
    let _signals =
        listen_for_signals(shutdown.clone()).wrap_err("Failed to install signal handlers")?;

    let simulator = Simulator::from_config(&config).wrap_err("Invalid simulation configuration")?;
    let settings = MqttSettings::from_config(&config)
        .wrap_err("Invalid MQTT configuration")?
        .with_client_id(format!("{}-simulator", config.mqtt.client_id));
    let sleeper = Arc::new(ThreadSleeper);
    let retry = RetryPolicy::new(settings.reconnect_interval, sleeper.clone(), shutdown.clone());
    let mut client = MqttClient::new(settings, retry);

    simulator.run(&mut client, &mut rand::thread_rng(), sleeper.as_ref(), &shutdown);
    Ok(())
}
