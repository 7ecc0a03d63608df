//! MIDI utilities
//!
//! Inbound message classification, port lookup and `.syx` file parsing.

use anyhow::Result;
use midir::{MidiInput, MidiInputPort, MidiOutput, MidiOutputPort};
use tracing::debug;

pub const SYSEX_START: u8 = 0xF0;
pub const SYSEX_END: u8 = 0xF7;
pub const TIMING_CLOCK: u8 = 0xF8;

/// Inbound MIDI message, as far as the monitor cares
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiMessage {
    /// Complete system exclusive frame including `F0` and `F7`
    SysEx(Vec<u8>),

    /// Timing clock pulse (24 per quarter note)
    TimingClock,

    /// Anything else, identified by its status byte
    Other { status: u8 },
}

impl MidiMessage {
    /// Classify raw bytes delivered by the MIDI input
    pub fn parse(data: &[u8]) -> Option<Self> {
        let status = *data.first()?;
        match status {
            SYSEX_START => {
                let end = data.iter().position(|&b| b == SYSEX_END)?;
                Some(MidiMessage::SysEx(data[..=end].to_vec()))
            }
            TIMING_CLOCK => Some(MidiMessage::TimingClock),
            // Running status needs state we don't keep
            s if s < 0x80 => None,
            s => Some(MidiMessage::Other { status: s }),
        }
    }
}

/// Format MIDI bytes as hex string for debugging
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// List available MIDI input ports
pub fn list_input_ports() -> Result<Vec<String>> {
    let midi_in = MidiInput::new("lpmidimon-scanner")?;

    let mut port_names = Vec::new();
    for port in midi_in.ports() {
        if let Ok(name) = midi_in.port_name(&port) {
            port_names.push(name);
        }
    }

    Ok(port_names)
}

/// List available MIDI output ports
pub fn list_output_ports() -> Result<Vec<String>> {
    let midi_out = MidiOutput::new("lpmidimon-scanner")?;

    let mut port_names = Vec::new();
    for port in midi_out.ports() {
        if let Ok(name) = midi_out.port_name(&port) {
            port_names.push(name);
        }
    }

    Ok(port_names)
}

/// Pick a name from `names`: exact match first, then case-insensitive substring
pub fn match_port_name<'a, I>(names: I, pattern: &str) -> Option<usize>
where
    I: IntoIterator<Item = &'a str>,
{
    let names: Vec<&str> = names.into_iter().collect();
    if let Some(i) = names.iter().position(|n| *n == pattern) {
        return Some(i);
    }
    let pattern = pattern.to_lowercase();
    names
        .iter()
        .position(|n| n.to_lowercase().contains(&pattern))
}

/// Find an input port by name
pub fn find_input_port(midi_in: &MidiInput, pattern: &str) -> Option<(MidiInputPort, String)> {
    let ports = midi_in.ports();
    let names: Vec<String> = ports
        .iter()
        .map(|p| midi_in.port_name(p).unwrap_or_default())
        .collect();
    let index = match_port_name(names.iter().map(String::as_str), pattern)?;
    debug!("Found input port '{}' matching '{}'", names[index], pattern);
    Some((ports[index].clone(), names[index].clone()))
}

/// Find an output port by name
pub fn find_output_port(midi_out: &MidiOutput, pattern: &str) -> Option<(MidiOutputPort, String)> {
    let ports = midi_out.ports();
    let names: Vec<String> = ports
        .iter()
        .map(|p| midi_out.port_name(p).unwrap_or_default())
        .collect();
    let index = match_port_name(names.iter().map(String::as_str), pattern)?;
    debug!("Found output port '{}' matching '{}'", names[index], pattern);
    Some((ports[index].clone(), names[index].clone()))
}

/// Errors reading a `.syx` file
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SyxError {
    #[error("invalid hex token '{0}'")]
    InvalidHex(String),

    #[error("sysex message starting at byte {0} is not terminated")]
    Unterminated(usize),
}

/// Split a `.syx` file into its sysex messages.
///
/// Files starting with `F0` are raw binary; anything else is read as
/// whitespace-separated hex text. Bytes outside `F0 .. F7` are skipped, so a
/// file without any message yields an empty list.
pub fn parse_syx(content: &[u8]) -> Result<Vec<Vec<u8>>, SyxError> {
    let bytes = if content.first() == Some(&SYSEX_START) {
        content.to_vec()
    } else {
        String::from_utf8_lossy(content)
            .split_whitespace()
            .map(|tok| u8::from_str_radix(tok, 16).map_err(|_| SyxError::InvalidHex(tok.to_string())))
            .collect::<Result<Vec<u8>, _>>()?
    };

    let mut messages = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != SYSEX_START {
            i += 1;
            continue;
        }
        let end = bytes[i..]
            .iter()
            .position(|&b| b == SYSEX_END)
            .ok_or(SyxError::Unterminated(i))?;
        messages.push(bytes[i..=i + end].to_vec());
        i += end + 1;
    }

    Ok(messages)
}
