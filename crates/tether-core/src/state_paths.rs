use std::env;
use std::path::{Path, PathBuf};

use anyhow::Result;

pub const STATE_DIR_ENV: &str = "TETHER_STATE_DIR";

/// Locations of everything tether keeps on disk.
#[derive(Debug, Clone)]
pub struct StatePaths {
    pub root: PathBuf,
    pub projection_file: PathBuf,
    pub logs_dir: PathBuf,
}

impl StatePaths {
    pub fn from_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            projection_file: root.join("projection.json"),
            logs_dir: root.join("logs"),
            root,
        }
    }
}

/// Resolution order: `TETHER_STATE_DIR`, then the platform data directory
/// plus `tether/`.
pub fn resolve_state_paths() -> Result<StatePaths> {
    if let Ok(dir) = env::var(STATE_DIR_ENV) {
        let dir = dir.trim();
        if !dir.is_empty() {
            return Ok(StatePaths::from_root(Path::new(dir)));
        }
    }
    let data_dir = dirs::data_dir()
        .ok_or_else(|| anyhow::anyhow!("Failed to resolve platform data directory"))?;
    Ok(StatePaths::from_root(data_dir.join("tether")))
}
