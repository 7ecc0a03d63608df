//! Sysex replay upgrade over MIDI

use super::progress::Progress;

/// Pre-parsed sysex messages sent one per engine iteration
#[derive(Debug, Clone)]
pub struct SysexStream {
    messages: Vec<Vec<u8>>,
    next: usize,
    progress: Progress,
}

impl SysexStream {
    pub fn new(messages: Vec<Vec<u8>>) -> Self {
        let progress = Progress::new(messages.len());
        Self {
            messages,
            next: 0,
            progress,
        }
    }

    /// Message to send next, `None` once everything went out
    pub fn current(&self) -> Option<&[u8]> {
        self.messages.get(self.next).map(Vec::as_slice)
    }

    /// Mark the current message sent; returns milestones reached
    pub fn mark_sent(&mut self) -> Vec<u32> {
        if self.next >= self.messages.len() {
            return Vec::new();
        }
        self.next += 1;
        self.progress.advance(1)
    }

    pub fn is_complete(&self) -> bool {
        self.next >= self.messages.len()
    }
}
