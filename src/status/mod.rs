//! Device status model and the thread-safe store handed to readers

mod store;
mod types;

pub use store::StatusStore;
pub use types::{PlaybackState, StatusSnapshot, TrackStatus, MAX_TRACKS};
