//! Endpoint settings persisted between runs
//!
//! Stored as `{"midiInDevice": "...", "midiOutDevice": "..."}` so files
//! written by older monitors keep loading.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::debug;

use crate::endpoint::EndpointSelection;

/// Last-selected input and output device names
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub midi_in_device: String,
    #[serde(default)]
    pub midi_out_device: String,
}

impl AppConfig {
    /// Load from a JSON file; a missing file yields empty settings
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !fs::try_exists(path).await.unwrap_or(false) {
            debug!("No settings at {}, starting empty", path.display());
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;

        let config: AppConfig = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))?;

        Ok(config)
    }

    /// Write as pretty JSON
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;

        fs::write(path, json)
            .await
            .with_context(|| format!("Failed to write settings file: {}", path.display()))?;

        debug!("Settings saved to {}", path.display());
        Ok(())
    }

    pub fn selection(&self) -> EndpointSelection {
        EndpointSelection::new(&self.midi_in_device, &self.midi_out_device)
    }
}

impl From<&EndpointSelection> for AppConfig {
    fn from(selection: &EndpointSelection) -> Self {
        Self {
            midi_in_device: selection.input.clone(),
            midi_out_device: selection.output.clone(),
        }
    }
}
