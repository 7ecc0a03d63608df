//! Wire protocols spoken by the device
//!
//! Two encodings sit behind the same request/event types:
//! - `sysex`: `F0 00 02 33 <subcmd> [payload] F7` over MIDI (and raw on UDP)
//! - `udp`: NUL-terminated tag text queries plus binary replies on port 5667
//!
//! Nothing here does I/O. Frames that don't decode are dropped, never errors.

pub mod packing;
pub mod sysex;
pub mod udp;

use crate::model::{ButtonId, DeviceCommand, EffectConfig, FunctionSlots};
use crate::status::StatusSnapshot;

/// Request the engine can send, encoded per transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    StatusQuery,
    LogQuery,
    IdentityQuery,
    UserCommand(DeviceCommand),
    EffectConfigQuery,
    EffectConfigSet(EffectConfig),
    ButtonConfigQuery { start: u16, count: u8 },
    ButtonConfigSet { id: ButtonId, functions: FunctionSlots },
}

/// Button mappings from one button-config reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonBatch {
    pub start: u16,
    pub entries: Vec<(ButtonId, FunctionSlots)>,
}

/// Reply to `<command>upgrade N</command>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpgradeReply {
    pub kind: u16,
    pub fields: (String, String),
}

/// Decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    Status(StatusSnapshot),
    Log(String),
    EffectConfig(EffectConfig),
    ButtonConfig(ButtonBatch),
    ButtonPress(ButtonId),
    Identity(String),
    BlockAck(u16),
}

/// Error building an outbound frame
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("status carries {0} tracks, at most {max} fit", max = crate::status::MAX_TRACKS)]
    TooManyTracks(usize),

    #[error("request has no {0} encoding")]
    NoEncoding(&'static str),
}
