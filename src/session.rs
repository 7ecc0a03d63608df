//! Session - the caller-facing side of the monitor
//!
//! Holds the selected endpoint and the running engine. Everything a front end
//! needs goes through here: selection, commands, upgrades, device settings,
//! status snapshots and the device log. The transport itself is never exposed.

use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::{ClockEstimator, ClockState, SharedClock};
use crate::config::AppConfig;
use crate::discovery::{spawn_discovery, DiscoveredDevices};
use crate::endpoint::{DeviceEndpoint, EndpointSelection};
use crate::engine::{self, EngineHandle, EngineShared, EngineState, EngineTiming};
use crate::model::{ButtonId, DeviceCommand, DeviceSettings, EffectConfig, FunctionSlots};
use crate::persistence::DeviceSettingsFile;
use crate::status::{StatusSnapshot, StatusStore};

pub struct Session {
    selection: EndpointSelection,
    store: StatusStore,
    shared: EngineShared,
    clock: SharedClock,
    devices: DiscoveredDevices,
    engine: Option<EngineHandle>,
    discovery: Vec<JoinHandle<()>>,
    /// Where the selection is persisted, if anywhere
    settings_path: Option<PathBuf>,
    /// Overrides the per-transport defaults
    timing: Option<EngineTiming>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Session that doesn't persist its selection
    pub fn new() -> Self {
        Self {
            selection: EndpointSelection::default(),
            store: StatusStore::new(),
            shared: EngineShared::new(),
            clock: ClockEstimator::shared(),
            devices: DiscoveredDevices::new(),
            engine: None,
            discovery: Vec::new(),
            settings_path: None,
            timing: None,
        }
    }

    /// Session that saves the selection to `path` on every change
    pub fn with_settings_path(path: impl Into<PathBuf>) -> Self {
        Self {
            settings_path: Some(path.into()),
            ..Self::new()
        }
    }

    pub fn set_timing(&mut self, timing: Option<EngineTiming>) {
        self.timing = timing;
    }

    /// Load the persisted selection and connect to it
    pub async fn restore(&mut self) -> Result<()> {
        let Some(path) = self.settings_path.clone() else {
            return Ok(());
        };
        let config = AppConfig::load(&path).await?;
        self.selection = config.selection();
        if self.selection.is_empty() {
            debug!("No saved device selection");
            return Ok(());
        }
        info!(
            "Restored device selection: in '{}', out '{}'",
            self.selection.input, self.selection.output
        );
        self.restart().await;
        Ok(())
    }

    pub fn selection(&self) -> &EndpointSelection {
        &self.selection
    }

    pub fn endpoint(&self) -> Option<DeviceEndpoint> {
        self.selection.endpoint()
    }

    pub async fn select_input(&mut self, name: &str) -> Result<()> {
        self.selection.select_input(name);
        self.restart().await;
        self.persist().await
    }

    pub async fn select_output(&mut self, name: &str) -> Result<()> {
        self.selection.select_output(name);
        self.restart().await;
        self.persist().await
    }

    /// Use one device name for both directions
    pub async fn select_endpoint(&mut self, name: &str) -> Result<()> {
        self.selection = EndpointSelection::new(name, name);
        self.restart().await;
        self.persist().await
    }

    /// Stop the engine and any running discovery
    pub async fn stop(&mut self) {
        for probe in self.discovery.drain(..) {
            probe.abort();
        }
        if let Some(engine) = self.engine.take() {
            engine.stop().await;
            info!("Engine stopped");
        }
    }

    /// Stop the current engine, join it, then start one for the selection
    async fn restart(&mut self) {
        if let Some(engine) = self.engine.take() {
            engine.stop().await;
        }
        *self.clock.lock() = ClockEstimator::new();

        let Some(endpoint) = self.selection.endpoint() else {
            return;
        };
        info!("Connecting to {}", endpoint);
        self.engine = Some(engine::spawn(
            endpoint,
            self.store.clone(),
            self.shared.clone(),
            self.clock.clone(),
            self.timing,
        ));
    }

    async fn persist(&self) -> Result<()> {
        let Some(path) = &self.settings_path else {
            return Ok(());
        };
        AppConfig::from(&self.selection).save(path).await
    }

    pub fn engine_state(&self) -> EngineState {
        self.shared.state()
    }

    pub fn enqueue_command(&self, command: DeviceCommand) {
        debug!("Command queued: {:?}", command);
        self.shared.set_command(command);
    }

    /// Upgrade the device from a file on the next engine iteration
    pub fn submit_upgrade(&self, path: impl Into<PathBuf>) {
        let path = path.into();
        info!("Upgrade submitted: {}", path.display());
        self.shared.submit_upgrade(path);
    }

    pub fn effect_config(&self) -> Option<EffectConfig> {
        self.shared.effect_config()
    }

    /// Replace the effect configuration and send it to the device
    pub fn set_effect_config(&self, config: EffectConfig) {
        self.shared.save_effects(config);
    }

    pub fn request_effect_refresh(&self) {
        self.shared.request_effect_refresh();
    }

    pub fn button_mapping(&self, id: ButtonId) -> Option<FunctionSlots> {
        self.shared.button_mapping(id)
    }

    pub fn set_button_mapping(&self, id: ButtonId, functions: FunctionSlots) {
        self.shared.set_button_mapping(id, functions);
    }

    pub fn device_settings(&self) -> DeviceSettings {
        self.shared.settings()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.store.snapshot()
    }

    pub fn drain_log(&self) -> String {
        self.store.drain_log()
    }

    /// Probe the local networks for devices in the background
    pub fn start_discovery(&mut self) {
        self.discovery.retain(|probe| !probe.is_finished());
        self.discovery.extend(spawn_discovery(self.devices.clone()));
    }

    pub fn discovered_devices(&self) -> Vec<String> {
        self.devices.list()
    }

    /// Devices discovered since the previous call
    pub fn new_devices(&self) -> Vec<String> {
        self.devices.take_new()
    }

    pub fn clock_state(&self) -> ClockState {
        let mut clock = self.clock.lock();
        clock.poll(Instant::now());
        clock.state()
    }

    pub fn last_button_press(&self) -> Option<ButtonId> {
        self.shared.last_button_press()
    }

    /// Save the mirrored device settings to a JSON file
    pub async fn save_settings_file(&self, path: impl AsRef<Path>) -> Result<()> {
        DeviceSettingsFile::from_settings(&self.shared.settings())
            .save_to_file(path)
            .await
    }

    /// Load a settings file and push it to the device
    pub async fn load_settings_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = DeviceSettingsFile::load_from_file(path).await?;
        self.apply_settings(file.into_settings());
        Ok(())
    }

    /// Send a full effect save and one button set per mapped button
    pub fn apply_settings(&self, settings: DeviceSettings) {
        match settings.effects {
            Some(effects) => self.shared.save_effects(effects),
            None => warn!("Settings carry no effect configuration"),
        }
        let count = settings.buttons.len();
        for (id, functions) in settings.buttons {
            self.shared.set_button_mapping(id, functions);
        }
        info!("Applying settings: {} button mappings", count);
    }

    #[cfg(test)]
    fn shared(&self) -> &EngineShared {
        &self.shared
    }
}
