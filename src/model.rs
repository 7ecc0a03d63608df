//! Device configuration types
//!
//! Effect slot assignments, button function mappings and the single-byte
//! user commands understood by the device.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::protocol::packing::UNASSIGNED_WIRE;

/// Device function identifier (`-1` = unassigned)
pub type FunctionId = i16;

/// Function identifier for an empty slot
pub const UNASSIGNED: FunctionId = -1;

/// Number of tracks carrying effect slots and function slots per button
pub const SLOT_COUNT: usize = 8;

/// Eight function identifiers bound to one button
pub type FunctionSlots = [FunctionId; SLOT_COUNT];

/// Numbers per button type
pub const BUTTON_NUMBERS: u16 = 128;

/// Total number of button ids (3 types x 128 numbers)
pub const BUTTON_ID_COUNT: u16 = 384;

/// Button ids fetched per button-config query
pub const BUTTON_BATCH: u16 = 8;

/// Convert a function id to its 14-bit wire value
pub fn function_to_wire(id: FunctionId) -> u16 {
    if id < 0 {
        UNASSIGNED_WIRE
    } else {
        (id as u16) & 0x3fff
    }
}

/// Convert a 14-bit wire value to a function id
pub fn function_from_wire(value: u16) -> FunctionId {
    if value == UNASSIGNED_WIRE {
        UNASSIGNED
    } else {
        value as FunctionId
    }
}

/// Effect function per track for both effect slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectConfig {
    pub slot1: FunctionSlots,
    pub slot2: FunctionSlots,
}

impl Default for EffectConfig {
    fn default() -> Self {
        Self {
            slot1: [UNASSIGNED; SLOT_COUNT],
            slot2: [UNASSIGNED; SLOT_COUNT],
        }
    }
}

/// Kind of MIDI message a button mapping reacts to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ButtonType {
    ProgramChange,
    ControlChange,
    Note,
}

impl ButtonType {
    pub const ALL: [ButtonType; 3] = [
        ButtonType::ProgramChange,
        ButtonType::ControlChange,
        ButtonType::Note,
    ];

    pub fn index(self) -> u16 {
        match self {
            ButtonType::ProgramChange => 0,
            ButtonType::ControlChange => 1,
            ButtonType::Note => 2,
        }
    }

    pub fn from_index(index: u16) -> Option<Self> {
        Self::ALL.get(index as usize).copied()
    }
}

impl fmt::Display for ButtonType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ButtonType::ProgramChange => write!(f, "Program Change"),
            ButtonType::ControlChange => write!(f, "Control Change"),
            ButtonType::Note => write!(f, "Note"),
        }
    }
}

/// Composite button id: `type_index * 128 + number`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ButtonId(u16);

impl ButtonId {
    pub fn new(button_type: ButtonType, number: u8) -> Self {
        Self(button_type.index() * BUTTON_NUMBERS + (number as u16 & 0x7f))
    }

    /// Build from a raw composite id; `None` when out of range
    pub fn from_raw(raw: u16) -> Option<Self> {
        (raw < BUTTON_ID_COUNT).then_some(Self(raw))
    }

    pub fn raw(self) -> u16 {
        self.0
    }

    pub fn button_type(self) -> ButtonType {
        // Construction keeps the raw id below BUTTON_ID_COUNT
        ButtonType::from_index(self.0 / BUTTON_NUMBERS).unwrap_or(ButtonType::Note)
    }

    pub fn number(self) -> u8 {
        (self.0 % BUTTON_NUMBERS) as u8
    }
}

impl fmt::Display for ButtonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.button_type(), self.number())
    }
}

/// Function mapping per button id, filled in as device replies arrive
pub type ButtonMappings = BTreeMap<ButtonId, FunctionSlots>;

/// Device configuration mirrored from the device
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub effects: Option<EffectConfig>,
    pub buttons: ButtonMappings,
}

/// Single-byte user commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    Status,
    MidiStatus,
    Reboot,
    Directory,
}

impl DeviceCommand {
    /// Byte sent to the device
    pub fn code(self) -> u8 {
        match self {
            DeviceCommand::Status => b's',
            DeviceCommand::MidiStatus => b'm',
            DeviceCommand::Reboot => b'b',
            DeviceCommand::Directory => b'd',
        }
    }
}

impl FromStr for DeviceCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "status" | "s" => Ok(DeviceCommand::Status),
            "midi-status" | "midistatus" | "m" => Ok(DeviceCommand::MidiStatus),
            "reboot" | "b" => Ok(DeviceCommand::Reboot),
            "directory" | "dir" | "d" => Ok(DeviceCommand::Directory),
            other => Err(format!("unknown device command '{}'", other)),
        }
    }
}
