use std::path::PathBuf;

use anyhow::{anyhow, Result};

pub const ENV_DATA_DIR: &str = "REPHRASE_DATA_DIR";

pub fn data_dir() -> Result<PathBuf> {
    if let Ok(p) = std::env::var(ENV_DATA_DIR) {
        if !p.trim().is_empty() {
            return Ok(PathBuf::from(p));
        }
    }
    let base = dirs::data_local_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local").join("share")))
        .ok_or_else(|| anyhow!("E_DATA_DIR_UNAVAILABLE: no local data or home directory"))?;
    Ok(base.join("rephrase"))
}
