mod config;
pub mod migrations;
pub mod task_db;

pub use config::{Config, DisplayConfig, StoreSettings, Theme};
pub use task_db::TaskDb;

use std::path::PathBuf;

/// Returns the inkcal data directory, creating it if needed.
///
/// `INKCAL_HOME` takes precedence. Otherwise `~/.config/inkcal`, or
/// `~/.config/inkcal-dev` when `INKCAL_ENV=dev`.
///
/// # Errors
/// Returns an error if creating the directory fails.
pub fn data_dir() -> std::io::Result<PathBuf> {
    let dir = match std::env::var_os("INKCAL_HOME") {
        Some(home) if !home.is_empty() => PathBuf::from(home),
        _ => {
            let base_dir = dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".config");
            let env = std::env::var("INKCAL_ENV").unwrap_or_else(|_| "production".to_string());
            if env == "dev" {
                base_dir.join("inkcal-dev")
            } else {
                base_dir.join("inkcal")
            }
        }
    };

    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}
