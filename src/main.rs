pub mod config;
pub mod dataservice;
pub mod mqtt;

use crate::config::{AppConfig, MqttSettings, Variant};
use crate::dataservice::CredentialResolver;
use crate::mqtt::config::SessionConfig;
use crate::mqtt::mqtt_handler::BrokerSession;
use crate::mqtt::run_window::RunWindow;
use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

const DEFAULT_LOG_LEVEL: Level = Level::INFO;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let cli_path = std::env::args_os().nth(1).map(PathBuf::from);
    let config = AppConfig::load(cli_path)?;
    info!("Starting in {:?} mode", config.variant);

    let session_config = match config.variant {
        Variant::ApiKey => resolve_session(&config).await?,
        Variant::DeviceContainer => SessionConfig::from_static(&config.broker, &config.mqtt),
    };

    run_session(session_config, &config.mqtt).await
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;

    let requested = std::env::var("LOG_LEVEL").ok();
    let level = requested
        .as_deref()
        .map(parse_log_level)
        .unwrap_or(Some(DEFAULT_LOG_LEVEL));
    setup_logging(level.unwrap_or(DEFAULT_LOG_LEVEL));
    if level.is_none() {
        warn!(
            "Unknown LOG_LEVEL {:?}, falling back to {}",
            requested.unwrap_or_default(),
            DEFAULT_LOG_LEVEL
        );
    }
    Ok(())
}

fn setup_logging(level: Level) {
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .init();
}

/// Accepts tracing level names plus the `WARNING`/`CRITICAL` spellings.
fn parse_log_level(value: &str) -> Option<Level> {
    match value.trim().to_ascii_uppercase().as_str() {
        "WARNING" => Some(Level::WARN),
        "CRITICAL" | "FATAL" => Some(Level::ERROR),
        other => Level::from_str(other).ok(),
    }
}

async fn resolve_session(config: &AppConfig) -> Result<SessionConfig> {
    let resolver = CredentialResolver::from_config(&config.api, &config.mqtt);
    let broker = tokio::task::spawn_blocking(move || resolver.resolve())
        .await
        .map_err(|e| eyre!("Resolver task failed: {}", e))??;

    Ok(SessionConfig::from_resolved(broker, &config.mqtt))
}

async fn run_session(session_config: SessionConfig, settings: &MqttSettings) -> Result<()> {
    let window = RunWindow::new(Duration::from_secs(settings.run_window_secs));

    let session = BrokerSession::create(session_config, window.token()).connect()?;
    session.publish(&settings.publish_topic, &settings.publish_message);
    debug!("Session state after publish: {}", session.state());

    let interrupt = window.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, closing run window");
            interrupt.cancel();
        }
    });

    window.wait().await;
    let report = session.shutdown().await?;
    if let Some(failure) = report.failure {
        warn!("Session ended with failure: {}", failure);
    }
    Ok(())
}
