use anyhow::Result;
use std::path::PathBuf;

mod consumer_logic;
use consumer_logic::{config, logger, runner};

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    let _ = dotenvy::dotenv();

    let config = config::load_config();
    let log_dir = config.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"));
    let log_level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    let log_path = logger::setup_logging(&log_dir, &log_level)?;
    log::info!("Logging to {}", log_path.display());

    let plan = runner::RunPlan::from_config(&config)?;
    runner::run(plan).await?;

    log::info!("Shutdown complete.");
    Ok(())
}
