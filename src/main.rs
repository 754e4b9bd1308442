use clap::Parser;
use energomera2mqtt::config::{Config, DEFAULT_CONFIG_FILE};
use energomera2mqtt::{CycleScheduler, MqttPublisher, SerialMeterClient};
use log::{error, info, LevelFilter};
use std::process::ExitCode;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(about = "Energomera energy meter to MQTT bridge", version)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
    config_file: String,

    /// Log protocol and publishing details, overriding the configured level
    #[arg(long)]
    debug: bool,

    /// Resolve and read all parameters without publishing anything
    #[arg(long)]
    dry_run: bool,

    /// Run a single cycle and exit
    #[arg(long)]
    oneshot: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config = match Config::load(&cli.config_file) {
        Ok(config) => config,
        Err(e) => {
            // Logging is not configured yet at this point
            eprintln!("Failed to load configuration from '{}': {e}", cli.config_file);
            return ExitCode::FAILURE;
        }
    };
    if cli.oneshot {
        config.general.oneshot = true;
    }

    let level = if cli.debug {
        LevelFilter::Debug
    } else {
        config.logging_level()
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();

    info!(
        "Starting {} v{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let client = SerialMeterClient::new(
        &config.meter.port,
        Duration::from_secs(config.meter.timeout),
    );
    let publisher = MqttPublisher::new(
        config.mqtt.clone(),
        Duration::from_secs(config.general.intercycle_delay),
        cli.dry_run,
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt signal");
            let _ = shutdown_tx.send(true);
        }
    });

    match CycleScheduler::new(config, client, publisher, shutdown_rx)
        .run()
        .await
    {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Exiting after failed meter interaction: {e}");
            ExitCode::FAILURE
        }
    }
}
