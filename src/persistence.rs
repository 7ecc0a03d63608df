//! Device settings files
//!
//! Saves the button-mapping table and both effect sequences to JSON so a
//! configuration can be pushed back to a device later.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::debug;

use crate::model::{ButtonMappings, DeviceSettings, EffectConfig};

/// Device settings snapshot for JSON serialization
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettingsFile {
    /// Version of the file format
    pub version: String,
    /// Milliseconds since epoch at save time
    pub timestamp: i64,
    #[serde(default)]
    pub buttons: ButtonMappings,
    #[serde(default)]
    pub effects: Option<EffectConfig>,
}

impl DeviceSettingsFile {
    /// Current file format version
    pub const VERSION: &'static str = "1.0.0";

    pub fn from_settings(settings: &DeviceSettings) -> Self {
        Self {
            version: Self::VERSION.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            buttons: settings.buttons.clone(),
            effects: settings.effects,
        }
    }

    pub fn into_settings(self) -> DeviceSettings {
        DeviceSettings {
            effects: self.effects,
            buttons: self.buttons,
        }
    }

    /// Save to a JSON file
    pub async fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json =
            serde_json::to_string_pretty(self).context("Failed to serialize device settings")?;

        fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write device settings to {}", path.display()))?;

        debug!(
            "Device settings saved to {} ({} buttons)",
            path.display(),
            self.buttons.len()
        );
        Ok(())
    }

    /// Load from a JSON file
    pub async fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read device settings file {}", path.display()))?;

        let file: DeviceSettingsFile =
            serde_json::from_str(&json).context("Failed to parse device settings JSON")?;

        debug!(
            "Device settings loaded (version: {}, timestamp: {})",
            file.version, file.timestamp
        );

        Ok(file)
    }
}
