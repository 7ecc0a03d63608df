//! lpmidimon - status monitor and control link for looping devices
//!
//! Talks to a device either over MIDI sysex or over UDP, polls its status and
//! log, mirrors its effect and button configuration, and runs firmware
//! upgrades. Front ends drive everything through [`Session`].

pub mod clock;
pub mod config;
pub mod discovery;
pub mod endpoint;
pub mod engine;
pub mod functions;
pub mod midi;
pub mod model;
pub mod paths;
pub mod persistence;
pub mod protocol;
pub mod session;
pub mod status;
pub mod transport;
pub mod upgrade;

pub use clock::ClockState;
pub use endpoint::{DeviceEndpoint, EndpointSelection};
pub use engine::EngineState;
pub use model::{ButtonId, ButtonType, DeviceCommand, EffectConfig, FunctionSlots};
pub use session::Session;
pub use status::{StatusSnapshot, StatusStore};
