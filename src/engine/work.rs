//! Work selection for one engine iteration
//!
//! An ordered list of (item, predicate) pairs; the first predicate that holds
//! picks the iteration's work. Polling always holds, so something is always
//! chosen.

use crate::model::BUTTON_ID_COUNT;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkItem {
    Upgrade,
    Command,
    QueuedRequest,
    EffectQuery,
    ButtonQuery,
    EffectSave,
    Poll,
}

/// What the engine knows at the top of an iteration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkView {
    pub upgrade_active: bool,
    pub upgrade_pending: bool,
    pub command_pending: bool,
    pub queued_requests: usize,
    pub effect_refresh: bool,
    /// Next button id to request
    pub button_index: u16,
    pub effect_save: bool,
}

type Predicate = fn(&WorkView) -> bool;

const PRIORITY: [(WorkItem, Predicate); 7] = [
    (WorkItem::Upgrade, |v| v.upgrade_active || v.upgrade_pending),
    (WorkItem::Command, |v| v.command_pending),
    (WorkItem::QueuedRequest, |v| v.queued_requests > 0),
    (WorkItem::EffectQuery, |v| v.effect_refresh),
    (WorkItem::ButtonQuery, |v| v.button_index < BUTTON_ID_COUNT),
    (WorkItem::EffectSave, |v| v.effect_save),
    (WorkItem::Poll, |_| true),
];

pub fn select(view: &WorkView) -> WorkItem {
    PRIORITY
        .iter()
        .find(|(_, holds)| holds(view))
        .map(|(item, _)| *item)
        .unwrap_or(WorkItem::Poll)
}
