//! Process-level tracing setup shared by all binaries

use color_eyre::Result;
use tracing::{warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Install `color_eyre` and the fmt subscriber.
///
/// `RUST_LOG` wins over `level` when set. The MQTT library is capped at
/// `warn` unless `RUST_LOG` says otherwise.
pub fn init(level: &str) -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;

    let (level, recognised) = parse_level(level);
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) => EnvFilter::new(directives),
        Err(_) => EnvFilter::new(format!("{},rumqttc=warn", level.as_str().to_lowercase())),
    };

    FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    if !recognised {
        warn!("Unknown log level, falling back to {}", level);
    }
    Ok(())
}

/// Map a configured level name onto a tracing level; unknown names become INFO
pub fn parse_level(name: &str) -> (Level, bool) {
    match name.trim().to_ascii_lowercase().as_str() {
        "trace" => (Level::TRACE, true),
        "debug" => (Level::DEBUG, true),
        "info" => (Level::INFO, true),
        "warn" | "warning" => (Level::WARN, true),
        "error" | "critical" => (Level::ERROR, true),
        _ => (Level::INFO, false),
    }
}
