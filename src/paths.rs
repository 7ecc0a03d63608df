//! Application path management.
//!
//! The last-selected device names live in `~/.lp2ctrl.json`. Saved device
//! settings and rolling logs default to the platform data directory
//! (`%APPDATA%\lpmidimon`, `~/.local/share/lpmidimon`, ...).

use std::path::PathBuf;

/// Application name used for the data directory
const APP_NAME: &str = "lpmidimon";

/// File name of the endpoint settings in the home directory
const SETTINGS_FILE: &str = ".lp2ctrl.json";

/// File name of the default device settings snapshot
const DEVICE_SETTINGS_FILE: &str = "device-settings.json";

/// Application paths for settings, saved device configuration and logs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPaths {
    /// Last-selected endpoint names
    pub settings: PathBuf,
    /// Default device settings file for save/load
    pub device_settings: PathBuf,
    pub logs_dir: PathBuf,
}

impl AppPaths {
    /// Resolve paths from the home and data directories.
    ///
    /// Falls back to the current directory when the platform reports no home
    /// or data directory. Called before logging is initialized.
    pub fn detect() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let home = dirs::home_dir().unwrap_or_else(|| {
            eprintln!("[paths] WARNING: no home directory, using {}", cwd.display());
            cwd.clone()
        });
        let data = dirs::data_dir()
            .unwrap_or_else(|| home.clone())
            .join(APP_NAME);

        #[cfg(debug_assertions)]
        eprintln!("[paths] home: {}, data: {}", home.display(), data.display());

        Self::with_dirs(home, data)
    }

    /// Paths rooted at explicit home and data directories
    pub fn with_dirs(home: impl Into<PathBuf>, data: impl Into<PathBuf>) -> Self {
        let data = data.into();
        Self {
            settings: home.into().join(SETTINGS_FILE),
            device_settings: data.join(DEVICE_SETTINGS_FILE),
            logs_dir: data.join("logs"),
        }
    }

    /// Create the data and log directories if needed
    pub fn ensure_dirs(&self) -> anyhow::Result<()> {
        use anyhow::Context;

        std::fs::create_dir_all(&self.logs_dir)
            .with_context(|| format!("Failed to create logs directory: {}", self.logs_dir.display()))?;
        if let Some(parent) = self.device_settings.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create data directory: {}", parent.display()))?;
        }
        Ok(())
    }
}
