pub mod evaluate;
pub mod languages;
pub mod serve;

use anyhow::Result;
use arbiter_engine::EngineConfig;
use std::path::PathBuf;

/// An explicit `--config` path must exist; otherwise `config/arbiter.toml`
/// is used when present.
pub fn load_config(path: Option<PathBuf>) -> Result<EngineConfig> {
    match path {
        Some(path) => {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
            EngineConfig::from_file(&path)
        }
        None => EngineConfig::from_project_root(),
    }
}
