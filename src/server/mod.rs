// src/server/mod.rs

use crate::config::Config;
use anyhow::Result;
use tracing::info;

mod initialization;
mod spawner;

pub use initialization::EngineContext;

/// The main engine startup function, orchestrating all setup phases.
pub async fn run(config: Config) -> Result<()> {
    // 1. Build the shared engine state: store, ring, controller, registry.
    let mut context = initialization::setup(config)?;

    // 2. Spawn all background tasks.
    spawner::spawn_all(&mut context);

    // 3. Run until interrupted, then broadcast shutdown and drain.
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");
    let _ = context.shutdown_tx.send(());
    while context.background_tasks.join_next().await.is_some() {}
    info!("All background tasks stopped; exiting.");
    Ok(())
}
