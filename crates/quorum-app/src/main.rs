//! quorum - price consensus and routing service entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Multi-venue price consensus and routing service
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via QUORUM_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,

    /// Print the effective configuration as TOML and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // TLS provider must be installed before any venue connection
    quorum_ws::init_crypto();

    let args = Args::parse();

    quorum_telemetry::init_logging()?;

    info!("Starting quorum v{}", env!("CARGO_PKG_VERSION"));

    // Config path: CLI arg > QUORUM_CONFIG env var > default. An explicit
    // path must exist; the default is optional.
    let explicit = args
        .config
        .or_else(|| std::env::var("QUORUM_CONFIG").ok());
    let required = explicit.is_some();
    let config_path = explicit.unwrap_or_else(|| "config/default.toml".to_string());

    info!(config_path = %config_path, required, "Loading configuration");
    let config = quorum_app::AppConfig::load(&config_path, required)?;

    if args.print_config {
        println!("{}", toml::to_string_pretty(&config)?);
        return Ok(());
    }

    info!(
        symbols = ?config.symbols,
        port = config.server.port,
        "Configuration loaded"
    );

    let app = quorum_app::Application::new(config)?;
    app.run().await?;

    Ok(())
}
