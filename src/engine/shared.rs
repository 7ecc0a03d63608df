//! Hand-off state between callers and the polling engine
//!
//! Many producers, one consumer: callers fill the slots, the engine drains
//! them one work item at a time.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::EngineState;
use crate::model::{ButtonId, DeviceCommand, DeviceSettings, EffectConfig, FunctionSlots};
use crate::protocol::{ButtonBatch, Request};

#[derive(Default)]
struct Slots {
    command: Option<DeviceCommand>,
    queue: VecDeque<Request>,
    upgrade: Option<PathBuf>,
    settings: DeviceSettings,
    last_press: Option<ButtonId>,
    state: EngineState,
}

#[derive(Clone, Default)]
pub struct EngineShared {
    slots: Arc<Mutex<Slots>>,
    effect_refresh: Arc<AtomicBool>,
    effect_save: Arc<AtomicBool>,
}

impl EngineShared {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pending single-byte command, replacing one not yet sent
    pub fn set_command(&self, command: DeviceCommand) {
        if let Some(old) = self.slots.lock().command.replace(command) {
            debug!("Pending command {:?} replaced by {:?}", old, command);
        }
    }

    pub fn take_command(&self) -> Option<DeviceCommand> {
        self.slots.lock().command.take()
    }

    pub fn has_command(&self) -> bool {
        self.slots.lock().command.is_some()
    }

    pub fn push_request(&self, request: Request) {
        self.slots.lock().queue.push_back(request);
    }

    pub fn pop_request(&self) -> Option<Request> {
        self.slots.lock().queue.pop_front()
    }

    pub fn queued_len(&self) -> usize {
        self.slots.lock().queue.len()
    }

    /// Set the pending upgrade file, replacing one not yet started
    pub fn submit_upgrade(&self, path: PathBuf) {
        self.slots.lock().upgrade = Some(path);
    }

    pub fn take_upgrade(&self) -> Option<PathBuf> {
        self.slots.lock().upgrade.take()
    }

    pub fn has_upgrade(&self) -> bool {
        self.slots.lock().upgrade.is_some()
    }

    pub fn request_effect_refresh(&self) {
        self.effect_refresh.store(true, Ordering::SeqCst);
    }

    pub fn effect_refresh_pending(&self) -> bool {
        self.effect_refresh.load(Ordering::SeqCst)
    }

    pub fn take_effect_refresh(&self) -> bool {
        self.effect_refresh.swap(false, Ordering::SeqCst)
    }

    /// Store a new effect configuration and schedule sending it
    pub fn save_effects(&self, config: EffectConfig) {
        self.slots.lock().settings.effects = Some(config);
        self.effect_save.store(true, Ordering::SeqCst);
    }

    pub fn effect_save_pending(&self) -> bool {
        self.effect_save.load(Ordering::SeqCst)
    }

    /// Effect configuration to send, if a save is pending
    pub fn take_effect_save(&self) -> Option<EffectConfig> {
        if !self.effect_save.swap(false, Ordering::SeqCst) {
            return None;
        }
        self.slots.lock().settings.effects
    }

    pub fn settings(&self) -> DeviceSettings {
        self.slots.lock().settings.clone()
    }

    pub fn effect_config(&self) -> Option<EffectConfig> {
        self.slots.lock().settings.effects
    }

    pub fn button_mapping(&self, id: ButtonId) -> Option<FunctionSlots> {
        self.slots.lock().settings.buttons.get(&id).copied()
    }

    /// Update one button locally and queue the change for the device
    pub fn set_button_mapping(&self, id: ButtonId, functions: FunctionSlots) {
        let mut slots = self.slots.lock();
        slots.settings.buttons.insert(id, functions);
        slots
            .queue
            .push_back(Request::ButtonConfigSet { id, functions });
    }

    pub fn apply_effect_config(&self, config: EffectConfig) {
        self.slots.lock().settings.effects = Some(config);
    }

    pub fn apply_button_batch(&self, batch: ButtonBatch) {
        let mut slots = self.slots.lock();
        for (id, functions) in batch.entries {
            slots.settings.buttons.insert(id, functions);
        }
    }

    pub fn record_button_press(&self, id: ButtonId) {
        self.slots.lock().last_press = Some(id);
    }

    pub fn last_button_press(&self) -> Option<ButtonId> {
        self.slots.lock().last_press
    }

    pub fn set_state(&self, state: EngineState) {
        self.slots.lock().state = state;
    }

    pub fn state(&self) -> EngineState {
        self.slots.lock().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ButtonType, SLOT_COUNT};

    #[test]
    fn test_command_slot_replaces() {
        let shared = EngineShared::new();
        shared.set_command(DeviceCommand::Status);
        shared.set_command(DeviceCommand::Reboot);
        assert_eq!(shared.take_command(), Some(DeviceCommand::Reboot));
        assert_eq!(shared.take_command(), None);
    }

    #[test]
    fn test_queue_is_fifo() {
        let shared = EngineShared::new();
        shared.push_request(Request::StatusQuery);
        shared.push_request(Request::LogQuery);
        assert_eq!(shared.pop_request(), Some(Request::StatusQuery));
        assert_eq!(shared.pop_request(), Some(Request::LogQuery));
        assert_eq!(shared.pop_request(), None);
    }

    #[test]
    fn test_effect_save_is_one_shot() {
        let shared = EngineShared::new();
        assert_eq!(shared.take_effect_save(), None);

        let mut config = EffectConfig::default();
        config.slot1[0] = 3;
        shared.save_effects(config);
        assert_eq!(shared.take_effect_save(), Some(config));
        assert_eq!(shared.take_effect_save(), None);
        assert_eq!(shared.effect_config(), Some(config));
    }

    #[test]
    fn test_button_mapping_queues_set() {
        let shared = EngineShared::new();
        let id = ButtonId::new(ButtonType::Note, 60);
        shared.set_button_mapping(id, [4; SLOT_COUNT]);

        assert_eq!(shared.button_mapping(id), Some([4; SLOT_COUNT]));
        assert_eq!(
            shared.pop_request(),
            Some(Request::ButtonConfigSet {
                id,
                functions: [4; SLOT_COUNT]
            })
        );
    }

    #[test]
    fn test_clones_share_slots() {
        let shared = EngineShared::new();
        let other = shared.clone();
        other.request_effect_refresh();
        assert!(shared.take_effect_refresh());
        assert!(!other.effect_refresh_pending());
    }
}
