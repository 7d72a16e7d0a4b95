//! Mutual-TLS MQTT client - Main Entry Point

use clap::{Parser, Subcommand};
use mqtt_mtls::config::MtlsConfig;
use mqtt_mtls::error::ClientResult;
use mqtt_mtls::identity::TlsConfiguration;
use mqtt_mtls::observability::init_default_logging;
use mqtt_mtls::session::{MqttSession, SessionEvent};
use std::path::{Path, PathBuf};
use std::process;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Mutual-TLS MQTT client
#[derive(Parser)]
#[command(name = "mqtt-mtls")]
#[command(about = "Connect to an MQTT broker over mutually authenticated TLS")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "MQTT_MTLS_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect, subscribe and publish, then wait for messages until interrupted
    Run,
    /// Build the TLS identity from the configured PEM files without connecting
    CheckIdentity,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_default_logging();

    info!("Starting mqtt-mtls v{}", env!("CARGO_PKG_VERSION"));

    let config = match load_configuration(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Run => run_session(config).await,
        Commands::CheckIdentity => check_identity(&config).map_err(Into::into),
        Commands::Config { show } => handle_config_command(&config, show),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

fn load_configuration(config_path: Option<&Path>) -> Result<MtlsConfig, Box<dyn std::error::Error>> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(MtlsConfig::load_from_file(path)?);
    }

    let default_paths = ["mqtt-mtls.toml", "config/mqtt-mtls.toml"];
    for path_str in default_paths {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(MtlsConfig::load_from_file(&path)?);
        }
    }

    Err("No configuration file found. Provide one with -c/--config or create mqtt-mtls.toml".into())
}

async fn run_session(config: MtlsConfig) -> Result<(), Box<dyn std::error::Error>> {
    let options = config.connection_options()?;
    let session = MqttSession::new(config.profile());
    let mut events = session.events();

    info!(
        client_id = %options.client_id,
        broker = %options.endpoint(),
        "Connecting"
    );
    let message = session.connect_async(options).await?;
    info!("{}", message);

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    loop {
        tokio::select! {
            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down gracefully...");
                break;
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down gracefully...");
                break;
            }
            event = events.recv() => {
                match event {
                    Ok(SessionEvent::MessageReceived { topic, payload }) => {
                        info!(topic = %topic, payload = %String::from_utf8_lossy(&payload), "Message received");
                    }
                    Ok(SessionEvent::Error { code, message }) => {
                        warn!(code = %code, "{}", message);
                    }
                    Ok(SessionEvent::Disconnected { reason, .. }) => {
                        error!(reason = %reason, "Connection lost, exiting");
                        return Err(reason.into());
                    }
                    Ok(SessionEvent::Connected { .. }) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped = skipped, "Session events lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    session.shutdown().await;
    info!("Application shutdown complete");
    Ok(())
}

fn check_identity(config: &MtlsConfig) -> ClientResult<()> {
    let options = config.connection_options()?;
    let tls = TlsConfiguration::from_pem(&options.ca_cert, &options.cert, &options.key)?;

    println!("Identity OK");
    println!("  protocol: {}", tls.protocol());
    println!("  client certificate: {}", tls.presents_client_certificate());
    println!("  broker: {}", options.endpoint());
    Ok(())
}

fn handle_config_command(config: &MtlsConfig, show: bool) -> Result<(), Box<dyn std::error::Error>> {
    if show {
        println!("Current configuration:");
        println!("{}", toml::to_string_pretty(config)?);
    }

    info!("Configuration validation complete");
    Ok(())
}
