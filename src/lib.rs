pub mod allowlist;
pub mod db;
pub mod error;
pub mod sensing;
pub mod settings;
pub mod summary;
pub mod timer;
pub mod utils;

use std::path::PathBuf;

use anyhow::{Context, Result};

pub use allowlist::{AllowListStore, DomainRule};
pub use db::Database;
pub use sensing::{ForegroundObserver, OsascriptObserver};
pub use settings::SettingsStore;
pub use timer::{ControllerConfig, TimerController, TimerEvent};

pub const DATA_DIR_ENV: &str = "POMOGUARD_DATA_DIR";
const APP_DIR_NAME: &str = "pomoguard";

/// Directory holding the database and settings file, created if missing.
pub fn data_dir() -> Result<PathBuf> {
    let dir = match std::env::var(DATA_DIR_ENV) {
        Ok(value) if !value.trim().is_empty() => PathBuf::from(value),
        _ => dirs::data_dir()
            .context("Could not determine the user data directory")?
            .join(APP_DIR_NAME),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
    Ok(dir)
}
