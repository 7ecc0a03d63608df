//! Sysex frame codec
//!
//! Every frame is `F0 00 02 33 <subcmd> [payload] F7`.

use super::packing::{join_14bit, split_14bit, unpack_7bit};
use super::{ButtonBatch, CodecError, DeviceEvent, Request};
use crate::model::{
    function_from_wire, function_to_wire, ButtonId, ButtonType, EffectConfig, FunctionSlots,
    SLOT_COUNT, UNASSIGNED,
};
use crate::status::{PlaybackState, StatusSnapshot, TrackStatus};

pub const SYSEX_START: u8 = 0xF0;
pub const SYSEX_END: u8 = 0xF7;

/// Manufacturer/model prefix following `F0`
pub const DEVICE_PREFIX: [u8; 3] = [0x00, 0x02, 0x33];

/// Subcommand bytes
pub mod subcmd {
    pub const STATUS: u8 = 2;
    pub const LOG: u8 = 3;
    pub const USER_COMMAND: u8 = 4;
    pub const EFFECT_CONFIG: u8 = 9;
    pub const EFFECT_CONFIG_SET: u8 = 10;
    pub const BUTTON_CONFIG_QUERY: u8 = 14;
    pub const BUTTON_CONFIG: u8 = 15;
    pub const BUTTON_CONFIG_SET: u8 = 16;
    pub const BUTTON_PRESS: u8 = 24;
}

/// Offset of the first payload byte
const PAYLOAD: usize = 5;

/// Track blocks carried by a sysex status reply
pub const STATUS_TRACK_BLOCKS: usize = 4;
const TRACK_BLOCK_LEN: usize = 14;

/// Full status reply length including `F0` and `F7`
pub const STATUS_REPLY_LEN: usize = PAYLOAD + 2 + STATUS_TRACK_BLOCKS * TRACK_BLOCK_LEN + 1;

fn frame(subcommand: u8, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 6);
    out.push(SYSEX_START);
    out.extend_from_slice(&DEVICE_PREFIX);
    out.push(subcommand);
    out.extend(payload.iter().map(|b| b & 0x7f));
    out.push(SYSEX_END);
    out
}

fn push_function(out: &mut Vec<u8>, id: i16) {
    let (hi, lo) = split_14bit(function_to_wire(id));
    out.push(hi);
    out.push(lo);
}

/// Encode a request as a sysex frame
pub fn encode_request(request: &Request) -> Result<Vec<u8>, CodecError> {
    let bytes = match request {
        Request::StatusQuery => frame(subcmd::STATUS, &[]),
        Request::LogQuery => frame(subcmd::LOG, &[]),
        Request::IdentityQuery => return Err(CodecError::NoEncoding("sysex")),
        Request::UserCommand(cmd) => frame(subcmd::USER_COMMAND, &[cmd.code()]),
        Request::EffectConfigQuery => frame(subcmd::EFFECT_CONFIG, &[]),
        Request::EffectConfigSet(config) => {
            let mut payload = vec![SLOT_COUNT as u8];
            for id in config.slot1.iter().chain(config.slot2.iter()) {
                push_function(&mut payload, *id);
            }
            frame(subcmd::EFFECT_CONFIG_SET, &payload)
        }
        Request::ButtonConfigQuery { start, count } => {
            let (hi, lo) = split_14bit(*start);
            frame(subcmd::BUTTON_CONFIG_QUERY, &[hi, lo, *count])
        }
        Request::ButtonConfigSet { id, functions } => {
            let (hi, lo) = split_14bit(id.raw());
            let mut payload = vec![hi, lo];
            for f in functions {
                push_function(&mut payload, *f);
            }
            frame(subcmd::BUTTON_CONFIG_SET, &payload)
        }
    };
    Ok(bytes)
}

/// Subcommand of a well-formed device frame
pub fn subcommand(data: &[u8]) -> Option<u8> {
    if data.len() < PAYLOAD + 1
        || data[0] != SYSEX_START
        || data[data.len() - 1] != SYSEX_END
        || data[1..4] != DEVICE_PREFIX
    {
        return None;
    }
    Some(data[4])
}

/// Decode a complete sysex frame from the device
pub fn decode(data: &[u8]) -> Option<DeviceEvent> {
    let body = &data[..data.len().saturating_sub(1)];
    match subcommand(data)? {
        subcmd::STATUS => decode_status(data).map(DeviceEvent::Status),
        subcmd::LOG => decode_log(&body[PAYLOAD..]).map(DeviceEvent::Log),
        subcmd::EFFECT_CONFIG => decode_effects(&body[PAYLOAD..]).map(DeviceEvent::EffectConfig),
        subcmd::BUTTON_CONFIG => decode_buttons(&body[PAYLOAD..]).map(DeviceEvent::ButtonConfig),
        subcmd::BUTTON_PRESS => decode_button_press(&body[PAYLOAD..]).map(DeviceEvent::ButtonPress),
        _ => None,
    }
}

fn decode_track(block: &[u8]) -> Option<TrackStatus> {
    let length = u32::try_from(unpack_7bit(&block[4..9])).ok()?;
    let position = u32::try_from(unpack_7bit(&block[9..14])).ok()?;
    Some(TrackStatus {
        state: PlaybackState::from_byte(block[0]),
        level: -((block[1] & 0x7f) as i8),
        pan: (block[2] & 0x7f) as i8,
        feedback: block[3],
        length,
        position,
    })
}

/// Decode a status reply; anything but the fixed length is dropped
fn decode_status(data: &[u8]) -> Option<StatusSnapshot> {
    if data.len() != STATUS_REPLY_LEN {
        return None;
    }
    let reported = data[PAYLOAD] as usize;
    let blocks = &data[PAYLOAD + 2..data.len() - 1];
    let tracks = blocks
        .chunks_exact(TRACK_BLOCK_LEN)
        .take(reported.min(STATUS_TRACK_BLOCKS))
        .map(decode_track)
        .collect::<Option<Vec<_>>>()?;

    Some(StatusSnapshot {
        selected_track: data[PAYLOAD + 1],
        tracks,
    })
}

fn decode_log(payload: &[u8]) -> Option<String> {
    if payload.is_empty() {
        return None;
    }
    // One byte per character
    Some(payload.iter().map(|&b| b as char).collect())
}

fn decode_effects(payload: &[u8]) -> Option<EffectConfig> {
    let n = *payload.first()? as usize;
    if n > SLOT_COUNT || payload.len() != 1 + n * 4 {
        return None;
    }
    let mut config = EffectConfig::default();
    for i in 0..n {
        config.slot1[i] = function_from_wire(join_14bit(payload[1 + i * 2], payload[2 + i * 2]));
        config.slot2[i] = function_from_wire(join_14bit(
            payload[1 + n * 2 + i * 2],
            payload[2 + n * 2 + i * 2],
        ));
    }
    Some(config)
}

fn decode_buttons(payload: &[u8]) -> Option<ButtonBatch> {
    if payload.len() < 3 {
        return None;
    }
    let start = join_14bit(payload[0], payload[1]);
    let count = payload[2] as usize;
    let slots = &payload[3..];
    if slots.len() != count * SLOT_COUNT * 2 {
        return None;
    }

    let mut entries = Vec::with_capacity(count);
    for (i, chunk) in slots.chunks_exact(SLOT_COUNT * 2).enumerate() {
        let id = ButtonId::from_raw(start + i as u16)?;
        let mut functions: FunctionSlots = [UNASSIGNED; SLOT_COUNT];
        for (slot, pair) in functions.iter_mut().zip(chunk.chunks_exact(2)) {
            *slot = function_from_wire(join_14bit(pair[0], pair[1]));
        }
        entries.push((id, functions));
    }
    Some(ButtonBatch { start, entries })
}

fn decode_button_press(payload: &[u8]) -> Option<ButtonId> {
    if payload.len() != 2 {
        return None;
    }
    let button_type = ButtonType::from_index(payload[0] as u16)?;
    Some(ButtonId::new(button_type, payload[1]))
}

/// Encode a status reply the way the device sends it.
///
/// Only the first four tracks fit. Levels travel as attenuation, so a
/// positive level is sent as 0 dB.
pub fn encode_status(status: &StatusSnapshot) -> Vec<u8> {
    use super::packing::pack_7bit;

    let mut payload = vec![
        status.track_count().min(STATUS_TRACK_BLOCKS) as u8,
        status.selected_track,
    ];
    for i in 0..STATUS_TRACK_BLOCKS {
        match status.tracks.get(i) {
            Some(t) => {
                payload.push(t.state.to_byte());
                payload.push(t.level.min(0).unsigned_abs());
                payload.push(t.pan as u8);
                payload.push(t.feedback);
                payload.extend(pack_7bit(t.length as u64, 5));
                payload.extend(pack_7bit(t.position as u64, 5));
            }
            None => payload.extend([0u8; TRACK_BLOCK_LEN]),
        }
    }
    frame(subcmd::STATUS, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DeviceCommand;

    fn track(state: u8, level: i8, pan: i8, feedback: u8, length: u32, position: u32) -> TrackStatus {
        TrackStatus {
            state: PlaybackState::from_byte(state),
            level,
            pan,
            feedback,
            length,
            position,
        }
    }

    #[test]
    fn test_encode_simple_queries() {
        assert_eq!(
            encode_request(&Request::StatusQuery).unwrap(),
            vec![0xF0, 0x00, 0x02, 0x33, 0x02, 0xF7]
        );
        assert_eq!(
            encode_request(&Request::LogQuery).unwrap(),
            vec![0xF0, 0x00, 0x02, 0x33, 0x03, 0xF7]
        );
        assert_eq!(
            encode_request(&Request::UserCommand(DeviceCommand::Reboot)).unwrap(),
            vec![0xF0, 0x00, 0x02, 0x33, 0x04, b'b', 0xF7]
        );
        assert!(encode_request(&Request::IdentityQuery).is_err());
    }

    #[test]
    fn test_encode_button_query() {
        let bytes = encode_request(&Request::ButtonConfigQuery { start: 136, count: 8 }).unwrap();
        assert_eq!(bytes, vec![0xF0, 0x00, 0x02, 0x33, 14, 1, 8, 8, 0xF7]);
    }

    #[test]
    fn test_encode_effect_set_layout() {
        let mut config = EffectConfig::default();
        config.slot1[0] = 300;
        config.slot2[7] = 5;

        let bytes = encode_request(&Request::EffectConfigSet(config)).unwrap();
        assert_eq!(bytes.len(), 5 + 1 + 32 + 1);
        assert_eq!(bytes[4], 10);
        assert_eq!(bytes[5], 8);
        assert_eq!(&bytes[6..8], &[2, 44]);
        assert_eq!(&bytes[8..10], &[0x7f, 0x7f]);
        assert_eq!(&bytes[36..38], &[0, 5]);
    }

    #[test]
    fn test_decode_status_reply() {
        let status = StatusSnapshot {
            selected_track: 2,
            tracks: vec![
                track(4, -20, 64, 100, 96_000, 48_000),
                track(3, 0, 0, 0, 1_000_000, 0),
            ],
        };
        let bytes = encode_status(&status);
        assert_eq!(bytes.len(), STATUS_REPLY_LEN);

        match decode(&bytes) {
            Some(DeviceEvent::Status(decoded)) => {
                assert_eq!(decoded, status);
                assert!((decoded.tracks[0].length_secs() - 2.0).abs() < 1e-9);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_status_track_count_capped_at_blocks() {
        let mut bytes = encode_status(&StatusSnapshot {
            selected_track: 0,
            tracks: vec![TrackStatus::default(); 4],
        });
        bytes[PAYLOAD] = 8;
        match decode(&bytes) {
            Some(DeviceEvent::Status(s)) => assert_eq!(s.track_count(), 4),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_positive_level_sent_as_no_attenuation() {
        let status = StatusSnapshot {
            selected_track: 0,
            tracks: vec![track(4, 6, 0, 0, 0, 0), track(4, -6, 0, 0, 0, 0)],
        };
        match decode(&encode_status(&status)) {
            Some(DeviceEvent::Status(decoded)) => {
                assert_eq!(decoded.tracks[0].level, 0);
                assert_eq!(decoded.tracks[1].level, -6);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_truncated_status_ignored() {
        let bytes = encode_status(&StatusSnapshot::default());
        let mut short = bytes[..bytes.len() - 3].to_vec();
        short.push(SYSEX_END);
        assert_eq!(decode(&short), None);
    }

    #[test]
    fn test_decode_log() {
        let mut bytes = vec![0xF0, 0x00, 0x02, 0x33, 0x03];
        bytes.extend_from_slice(b"Track 1 recorded\n");
        bytes.push(0xF7);
        assert_eq!(
            decode(&bytes),
            Some(DeviceEvent::Log("Track 1 recorded\n".to_string()))
        );

        // Empty log reply carries nothing
        assert_eq!(decode(&[0xF0, 0x00, 0x02, 0x33, 0x03, 0xF7]), None);
    }

    #[test]
    fn test_decode_effects() {
        let mut config = EffectConfig::default();
        config.slot1 = [1, 2, 3, 4, 5, 6, 7, 8];
        config.slot2[3] = 200;
        let mut bytes = encode_request(&Request::EffectConfigSet(config)).unwrap();
        bytes[4] = subcmd::EFFECT_CONFIG;

        assert_eq!(decode(&bytes), Some(DeviceEvent::EffectConfig(config)));
    }

    #[test]
    fn test_decode_button_batch() {
        let mut bytes = vec![0xF0, 0x00, 0x02, 0x33, 15, 0, 8, 2];
        for i in 0..16u8 {
            if i == 0 {
                bytes.extend([0x7f, 0x7f]);
            } else {
                bytes.extend([0, i]);
            }
        }
        bytes.push(0xF7);

        match decode(&bytes) {
            Some(DeviceEvent::ButtonConfig(batch)) => {
                assert_eq!(batch.start, 8);
                assert_eq!(batch.entries.len(), 2);
                assert_eq!(batch.entries[0].0.raw(), 8);
                assert_eq!(batch.entries[0].1[0], UNASSIGNED);
                assert_eq!(batch.entries[1].0.raw(), 9);
                assert_eq!(batch.entries[1].1[7], 15);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_malformed_button_batch_ignored() {
        // Count says 2 but only one entry follows
        let mut bytes = vec![0xF0, 0x00, 0x02, 0x33, 15, 0, 0, 2];
        bytes.extend([0u8; 16]);
        bytes.push(0xF7);
        assert_eq!(decode(&bytes), None);
    }

    #[test]
    fn test_decode_button_press() {
        let bytes = vec![0xF0, 0x00, 0x02, 0x33, 24, 1, 7, 0xF7];
        assert_eq!(
            decode(&bytes),
            Some(DeviceEvent::ButtonPress(ButtonId::new(ButtonType::ControlChange, 7)))
        );
        assert_eq!(decode(&[0xF0, 0x00, 0x02, 0x33, 24, 5, 7, 0xF7]), None);
    }

    #[test]
    fn test_foreign_sysex_ignored() {
        assert_eq!(decode(&[0xF0, 0x43, 0x10, 0x4C, 0x02, 0xF7]), None);
        assert_eq!(decode(&[0xF0, 0xF7]), None);
        assert_eq!(decode(&[]), None);
    }
}
