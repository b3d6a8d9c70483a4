//! brokerlink command-line entry point
//!
//! Publishes single messages, listens for inbound traffic, or validates a
//! configuration file.

use async_trait::async_trait;
use brokerlink::client::{Handler, MqttClient};
use brokerlink::config::ClientConfig;
use brokerlink::error::{ClientError, HandlerError};
use brokerlink::observability::logging::verbosity_level;
use brokerlink::observability::{init_default_logging, metrics};
use brokerlink::protocol::{PubAck, Publish, QoS};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::Notify;
use tokio::time::Duration;
use tracing::{error, info, warn};

/// How long `publish` waits for the broker's PUBACK
const PUBACK_WAIT: Duration = Duration::from_secs(10);

/// Persistent-connection MQTT 3.1.1 client
#[derive(Parser)]
#[command(name = "brokerlink")]
#[command(about = "Persistent-connection MQTT 3.1.1 client")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "BROKERLINK_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Publish one message and exit
    Publish {
        #[arg(short, long)]
        topic: String,
        #[arg(short, long)]
        payload: String,
        /// 0 (at most once) or 1 (at least once)
        #[arg(short, long, default_value_t = 0)]
        qos: u8,
        #[arg(short, long)]
        retain: bool,
    },
    /// Stay connected and log inbound messages until interrupted
    Listen,
    /// Validate configuration
    Config {
        /// Show the effective configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging(verbosity_level(cli.verbose));

    let config = match load_configuration(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Publish {
            topic,
            payload,
            qos,
            retain,
        } => publish_once(config, &topic, payload, qos, retain).await,
        Commands::Listen => listen(config).await,
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(
    config_path: &Option<PathBuf>,
) -> Result<ClientConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(ClientConfig::load_from_file(path)?);
    }

    for candidate in ["brokerlink.toml", "config/brokerlink.toml"] {
        let path = PathBuf::from(candidate);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(ClientConfig::load_from_file(&path)?);
        }
    }

    Err("no configuration file found; pass -c/--config or create brokerlink.toml".into())
}

/// Logs inbound traffic and wakes waiters on every PUBACK
#[derive(Default)]
struct ConsoleHandler {
    acked: Notify,
}

#[async_trait]
impl Handler for ConsoleHandler {
    async fn process_publish(&self, publish: &Publish) -> Result<(), HandlerError> {
        info!(
            topic = %publish.topic,
            qos = ?publish.qos,
            retain = publish.retain,
            payload = %String::from_utf8_lossy(&publish.payload),
            "Message received"
        );
        Ok(())
    }

    async fn process_puback(&self, puback: &PubAck, original: &Publish) -> Result<(), HandlerError> {
        info!(packet_id = puback.packet_id, topic = %original.topic, "Publish acknowledged");
        self.acked.notify_one();
        Ok(())
    }

    async fn process_error(&self, error: &ClientError) {
        warn!(error = %error, kind = ?error.kind(), "Client error");
    }
}

async fn publish_once(
    config: ClientConfig,
    topic: &str,
    payload: String,
    qos: u8,
    retain: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let qos = QoS::from_u8(qos).ok_or_else(|| format!("invalid QoS level {qos}"))?;
    let handler = Arc::new(ConsoleHandler::default());
    let client = MqttClient::builder(config, handler.clone()).build()?;

    client.connect().await?;
    let packet_id = client.publish(topic, payload, qos, retain).await?;

    if let Some(packet_id) = packet_id {
        if tokio::time::timeout(PUBACK_WAIT, handler.acked.notified())
            .await
            .is_err()
        {
            warn!(packet_id, "No PUBACK within {:?}", PUBACK_WAIT);
        }
    }

    client.disconnect().await?;
    Ok(())
}

async fn listen(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let client = MqttClient::builder(config, Arc::new(ConsoleHandler::default())).build()?;
    let outcome = client.connect().await?;
    info!(
        client_id = %client.session().client_id,
        session_present = outcome.session_present,
        "Listening; press Ctrl-C to stop"
    );

    wait_for_shutdown_signal().await?;

    info!("Shutting down");
    if let Err(e) = client.disconnect().await {
        warn!("Disconnect failed: {}", e);
    }

    let snapshot = metrics().get_metrics();
    info!(metrics = %serde_json::to_string(&snapshot)?, "Session summary");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    signal::ctrl_c().await
}

fn handle_config_command(config: &ClientConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!(broker = %config.broker_url, "Configuration is valid");
    Ok(())
}
