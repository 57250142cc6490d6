//! Signal Service - Main Entry Point

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use signal_service::{ServiceConfig, SignalCore};

#[derive(Parser)]
#[command(
    name = "signal-service",
    version,
    about = "Signals computation core for derivatives trading"
)]
struct Args {
    /// Configuration file path (environment variables override)
    #[arg(short, long)]
    config: Option<String>,

    /// Validate configuration and print the health snapshot, then exit
    #[arg(long)]
    check: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "signal_service=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let config = match ServiceConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error, aborting startup: {e}");
            std::process::exit(1);
        }
    };

    let core = match SignalCore::init(config) {
        Ok(core) => core,
        Err(e) => {
            error!("Failed to initialize service core: {e}");
            std::process::exit(1);
        }
    };

    let health = core.health();
    info!(
        model = %health.model,
        environment = %health.environment,
        ticker = %health.ticker_base_url,
        "Startup health check passed"
    );

    if args.check {
        println!("{}", serde_json::to_string_pretty(&health)?);
        return Ok(());
    }

    core.start_maintenance();
    info!("Signal service running; press Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");
    core.shutdown().await;

    Ok(())
}
