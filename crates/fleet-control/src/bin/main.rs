//! Fleet Sentinel daemon

use clap::{Arg, ArgAction, Command};
use fleet_common::Config;
use fleet_control::ControlPlane;
use fleet_telemetry::{SampleSource, SourceProfile, SyntheticSource};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let matches = Command::new("fleet-sentinel")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Fleet telemetry, prediction, and self-healing control plane")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path (TOML)")
                .required(false),
        )
        .arg(
            Arg::new("data-dir")
                .short('d')
                .long("data-dir")
                .value_name("DIR")
                .help("Override the snapshot data directory")
                .required(false),
        )
        .arg(
            Arg::new("synthetic")
                .long("synthetic")
                .value_name("N")
                .help("Run N synthetic nodes instead of real sources")
                .required(false),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let mut config = load_config(matches.get_one::<String>("config"))?;
    if let Some(dir) = matches.get_one::<String>("data-dir") {
        config.data_dir = Some(dir.into());
    }

    let sources: Vec<Arc<dyn SampleSource>> = match matches.get_one::<String>("synthetic") {
        Some(n) => {
            let count: usize = n.parse()?;
            let clock = fleet_common::Clock::new();
            let profiles = (0..count)
                .map(|i| SourceProfile::healthy(&format!("n-{:02}", i + 1)))
                .collect();
            info!(count, "running with synthetic sample source");
            vec![Arc::new(SyntheticSource::new("synthetic", profiles, clock))]
        }
        None => Vec::new(),
    };

    info!("starting fleet-sentinel v{}", env!("CARGO_PKG_VERSION"));
    let plane = match ControlPlane::init(config, sources, None).await {
        Ok(plane) => plane,
        Err(err) => {
            error!(error = %err, "initialization failed");
            std::process::exit(1);
        }
    };
    plane.start();

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    plane.stop().await;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("fleet_control=info,fleet_telemetry=info,fleet_healing=info,fleet_alerts=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn load_config(path: Option<&String>) -> Result<Config, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            info!(path, "loading configuration");
            let body = std::fs::read_to_string(path)?;
            Ok(toml::from_str(&body)?)
        }
        None => {
            info!("using default configuration");
            Ok(Config::default())
        }
    }
}
