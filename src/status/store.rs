//! StatusStore - latest device status plus the pending device log
//!
//! The polling engine is the only writer. Readers get value copies, so
//! nothing handed out can observe or corrupt later updates.

use parking_lot::Mutex;
use std::sync::Arc;

use super::types::StatusSnapshot;

#[derive(Default)]
struct Inner {
    status: StatusSnapshot,
    log: String,
}

/// Shared status and log buffer
#[derive(Clone, Default)]
pub struct StatusStore {
    inner: Arc<Mutex<Inner>>,
}

impl StatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current status wholesale
    pub fn publish(&self, status: StatusSnapshot) {
        self.inner.lock().status = status;
    }

    /// Independent copy of the current status
    pub fn snapshot(&self) -> StatusSnapshot {
        self.inner.lock().status.clone()
    }

    /// Append text to the pending log
    pub fn append_log(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        self.inner.lock().log.push_str(text);
    }

    /// Take everything appended since the previous drain
    pub fn drain_log(&self) -> String {
        std::mem::take(&mut self.inner.lock().log)
    }
}
