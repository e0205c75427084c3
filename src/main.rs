//! Sensor Link demo host
//!
//! Connects to the configured broker, follows the device's telemetry topics and
//! optionally switches its LED.

use clap::{Parser, Subcommand};
use sensor_link::config::{SessionConfig, Settings, TopicPurpose};
use sensor_link::observability::init_default_logging;
use sensor_link::session::{ConnectionManager, SessionEvent};
use std::path::{Path, PathBuf};
use std::process;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, Duration};
use tracing::{error, info, warn};

/// Interval between health summaries while running
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Browser-style MQTT session for IoT sensor dashboards
#[derive(Parser)]
#[command(name = "sensor-link")]
#[command(about = "MQTT-over-WebSocket session manager for IoT sensor dashboards")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "SENSOR_LINK_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and follow the device's telemetry topics
    Run {
        /// Publish this command (e.g. ON or OFF) to the LED topic once connected
        #[arg(long)]
        led: Option<String>,
    },
    /// Validate configuration
    Config {
        /// Show the resolved configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting sensor-link v{}", env!("CARGO_PKG_VERSION"));

    let settings = match load_settings(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run { led } => run_session(settings, led).await,
        Commands::Config { show } => handle_config_command(settings, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }

    info!("Application shutdown complete");
}

/// Defaults, then the config file (explicit or first default location), then environment
fn load_settings(config_path: Option<&Path>) -> Result<Settings, Box<dyn std::error::Error>> {
    let mut settings = match config_path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Settings::load_from_file(path)?
        }
        None => {
            let default_paths = ["sensor-link.toml", "config/sensor-link.toml"];
            match default_paths.iter().map(Path::new).find(|path| path.exists()) {
                Some(path) => {
                    info!("Loading configuration from: {}", path.display());
                    Settings::load_from_file(path)?
                }
                None => {
                    info!("No configuration file found, using defaults");
                    Settings::default()
                }
            }
        }
    };

    settings.apply_env_overrides()?;
    Ok(settings)
}

fn handle_config_command(settings: Settings, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config = settings.clone().resolve()?;
    info!("Configuration is valid");

    if show {
        let mut printable = settings;
        if !printable.broker.password.is_empty() {
            printable.broker.password = "***".to_string();
        }
        println!("{}", toml::to_string_pretty(&printable)?);
        print_resolved(&config);
    }

    Ok(())
}

fn print_resolved(config: &SessionConfig) {
    println!("# resolved");
    println!("url = \"{}\"", config.endpoint.url());
    println!("client_id = \"{}\"", config.client_id);
    for (purpose, topic) in config.topics.iter() {
        println!("topic.{} = \"{}\"", purpose.suffix(), topic);
    }
}

async fn run_session(
    settings: Settings,
    led: Option<String>,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = settings.resolve()?;
    config.log_summary();

    let telemetry: Vec<String> = config
        .topics
        .telemetry()
        .iter()
        .map(|topic| topic.to_string())
        .collect();
    let led_topic = config.topics.get(TopicPurpose::Led).to_string();

    let manager = ConnectionManager::websocket(config);
    let mut events = manager.events();

    manager.connect().await?;
    info!(status = %serde_json::to_string(&manager.status())?, "Session established");

    for topic in &telemetry {
        manager.subscribe(topic)?;
    }

    if let Some(command) = led {
        manager.publish(&led_topic, command)?;
    }

    let mut health_tick = interval(HEALTH_LOG_INTERVAL);
    health_tick.tick().await;

    info!("Following telemetry, press Ctrl+C to stop");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down gracefully...");
                break;
            }
            _ = health_tick.tick() => {
                let health = manager.health();
                info!(
                    healthy = health.is_healthy,
                    quality = ?health.quality(),
                    reconnects = health.reconnect_count,
                    received = health.messages_received,
                    "Session health"
                );
            }
            event = events.recv() => match event {
                Ok(SessionEvent::Message(message)) => {
                    info!(topic = %message.destination, payload = %message.payload, "Telemetry");
                }
                Ok(SessionEvent::Connected) => {
                    // Subscriptions are restored by the manager after a reconnect
                    info!(subscriptions = ?manager.subscriptions(), "Connected");
                }
                Ok(SessionEvent::Disconnected(Some(loss))) => {
                    warn!(reason = %loss, "Connection lost");
                }
                Ok(SessionEvent::Disconnected(None)) => {}
                Ok(SessionEvent::Error(e)) => {
                    error!(error = %e, "Session error");
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event receiver lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    }

    manager.disconnect();
    // Give the event loop a moment to write DISCONNECT before the runtime stops
    tokio::time::sleep(Duration::from_millis(250)).await;
    Ok(())
}
