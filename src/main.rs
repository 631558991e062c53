// src/main.rs

//! The main entry point for the Warpflow engine binary.

use anyhow::{Result, anyhow};
use std::env;
use tracing::info;
use tracing_subscriber::filter::EnvFilter;
use warpflow::config::Config;
use warpflow::server;

#[tokio::main]
async fn main() -> Result<()> {
    const VERSION: &str = env!("CARGO_PKG_VERSION");

    let args: Vec<String> = env::args().collect();
    if args.contains(&"--version".to_string()) {
        println!("Warpflow version {VERSION}");
        return Ok(());
    }
    let config_path = args
        .get(1)
        .ok_or_else(|| anyhow!("Usage: warpflow /path/to/warpflow.toml"))?;

    let config = Config::from_file(config_path)?;

    let log_filter = env::var("RUST_LOG").unwrap_or_else(|_| config.log_level.clone());
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(log_filter))
        .init();

    info!("Warpflow {VERSION} starting on '{}'.", config.host_identity);
    server::run(config).await
}
