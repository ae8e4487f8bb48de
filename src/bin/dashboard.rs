use std::path::PathBuf;
use std::sync::Arc;

use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use eframe::egui;
use iot_lab_gateway::dashboard::MqttDataHandler;
use iot_lab_gateway::timing::ThreadSleeper;
use iot_lab_gateway::ui::DashboardApp;
use iot_lab_gateway::{logging, AppConfig, MqttClient, MqttSettings, RetryPolicy, ShutdownSignal};
use tracing::{info, warn};

fn main() -> Result<()> {
    let config_path = std::env::args_os().nth(1).map(PathBuf::from);
    let (config, loaded_from) =
        AppConfig::load(config_path.as_deref()).wrap_err("Failed to load configuration")?;
    logging::init(&config.logging.level)?;
    info!(path = %loaded_from.display(), "Configuration loaded");

    let settings = MqttSettings::from_config(&config)
        .wrap_err("Invalid MQTT configuration")?
        .with_client_id(&config.dashboard.client_id);
    let endpoint = settings.endpoint();
    let retry = RetryPolicy::new(
        settings.reconnect_interval,
        Arc::new(ThreadSleeper),
        ShutdownSignal::new(),
    );

    let mut handler =
        MqttDataHandler::new(&config.mqtt.publish_topic, config.dashboard.history_size)
            .with_csv_output(config.dashboard.csv_output.clone())
            .with_command_topic(config.mqtt.command_topic.clone())
            .with_client(MqttClient::new(settings, retry));

    match handler.start() {
        Ok(()) => info!("Dashboard subscribed to {}", handler.topic()),
        Err(e) => warn!("Broker not reachable yet, will keep retrying: {}", e),
    }

    let mut native_options = eframe::NativeOptions::default();
    native_options.viewport = egui::ViewportBuilder::default()
        .with_title("IoT Lab Dashboard")
        .with_inner_size([960.0, 640.0]);

    eframe::run_native(
        "IoT Lab Dashboard",
        native_options,
        Box::new(move |cc| Ok(Box::new(DashboardApp::new(cc, handler, endpoint)))),
    )
    .map_err(|e| eyre!("Dashboard window failed: {}", e))
}
