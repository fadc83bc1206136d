use anyhow::Result;
use clap::Parser;
use tracing::info;

use targetsmith::config::BaseConfig;
use targetsmith::targetsmith::TargetSmith;
use targetsmith::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize telemetry
    telemetry::init();
    info!("Starting targetsmith");

    // Parse configuration from CLI arguments
    let config = BaseConfig::parse();
    info!(
        "Configuration: mode={:?}, driver_type={:?}, startup_type={:?}",
        config.mode, config.driver_type, config.startup_type
    );

    // Initialize and run the app
    let app = TargetSmith::initialize(config)?;
    app.run().await?;

    info!("Targetsmith shutdown complete");
    Ok(())
}
