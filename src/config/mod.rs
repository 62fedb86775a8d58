//! Configuration module
//!
//! Handles application settings persisted between runs

mod settings;

pub use settings::{AppConfig, ConnectionDefaults, SendDefaults};

use directories::ProjectDirs;
use std::path::PathBuf;

/// Get the application configuration directory
pub fn config_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "portscope", "Portscope")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the application data directory
pub fn data_dir() -> Option<PathBuf> {
    ProjectDirs::from("com", "portscope", "Portscope")
        .map(|dirs| dirs.data_dir().to_path_buf())
}

/// Initialize application directories
pub fn init_directories() -> std::io::Result<()> {
    if let Some(dir) = config_dir() {
        std::fs::create_dir_all(&dir)?;
    }
    if let Some(dir) = data_dir() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(())
}
