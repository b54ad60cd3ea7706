//! Integration engine server.
//!
//! Connects to the database, starts the supervisor with the demo handlers,
//! restarts autostart applications and runs until interrupted.

mod demo;

use actors::{EngineConfig, start_supervisor};
use db::DbConfig;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    tracing::info!("Initializing integration engine...");

    db::init(DbConfig::from_env()?).await?;
    demo::seed_demo_application().await?;

    let config = EngineConfig::from_env()?;
    let (supervisor, join) = start_supervisor(demo::demo_handlers(), config).await?;

    let started = supervisor.boot().await?;
    tracing::info!(workers = started.len(), "Integration engine running");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Interrupt received, waiting for running jobs...");

    supervisor.shutdown().await?;
    join.await?;

    tracing::info!("Integration engine stopped");
    Ok(())
}
