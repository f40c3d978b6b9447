use anyhow::Result;
use arbiter_engine::Engine;
use std::path::PathBuf;
use tracing::info;

use super::load_config;

pub async fn execute(config: Option<PathBuf>, host: Option<String>, port: Option<u16>) -> Result<()> {
    let mut config = load_config(config)?;

    if let Some(host) = host {
        config.server.host = host;
    }
    if let Some(port) = port {
        config.server.port = port;
    }

    info!("Starting judge service");
    let engine = Engine::new(config)?;
    engine.run().await?;

    Ok(())
}
