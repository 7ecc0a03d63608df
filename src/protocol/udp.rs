//! UDP datagram codec
//!
//! Queries are NUL-terminated tag text. Replies are either tag text, the fixed
//! 232-byte compact status, upgrade acks, or raw sysex frames.

use bytes::{BufMut, BytesMut};
use once_cell::sync::Lazy;
use regex::Regex;
use std::net::{Ipv4Addr, SocketAddrV4};

use super::{sysex, CodecError, DeviceEvent, Request, UpgradeReply};
use crate::status::{PlaybackState, StatusSnapshot, TrackStatus, MAX_TRACKS};

/// Port for queries, commands and identity probes
pub const COMMAND_PORT: u16 = 5667;

/// Port receiving upgrade blocks
pub const UPGRADE_PORT: u16 = 4069;

pub const COMPACT_STATUS_LEN: usize = 232;
const STATUS_HEADER_LEN: usize = 8;
const TRACK_BLOCK_LEN: usize = 28;

/// Payload bytes per upgrade block
pub const BLOCK_SIZE: usize = 512;

const OP_BLOCK: u8 = 0x03;
const OP_ACK: u8 = 0x04;

static LOG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<log>(.*)</log>").unwrap_or_else(|e| panic!("log pattern: {e}"))
});

static ID_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<id>(.*)</id>").unwrap_or_else(|e| panic!("id pattern: {e}")));

fn text_query(text: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(text.len() + 1);
    out.extend_from_slice(text.as_bytes());
    out.push(0);
    out
}

/// Encode a request as a datagram payload for the command port.
///
/// Configuration requests have no text form and travel as raw sysex.
pub fn encode_request(request: &Request) -> Result<Vec<u8>, CodecError> {
    match request {
        Request::StatusQuery => Ok(text_query("<query>status compact</query>")),
        Request::LogQuery => Ok(text_query("<query>log</query>")),
        Request::IdentityQuery => Ok(text_query("<query>id</query>")),
        Request::UserCommand(cmd) => Ok(text_query(&format!(
            "<userinput>{}</userinput>",
            cmd.code() as char
        ))),
        other => sysex::encode_request(other),
    }
}

/// Destination and payload for a request sent to a device
pub fn request_datagram(
    device: Ipv4Addr,
    request: &Request,
) -> Result<(SocketAddrV4, Vec<u8>), CodecError> {
    Ok((
        SocketAddrV4::new(device, COMMAND_PORT),
        encode_request(request)?,
    ))
}

/// Upgrade handshake announcing the image length
pub fn upgrade_command(length: usize) -> Vec<u8> {
    format!("<command>upgrade {}</command>", length).into_bytes()
}

/// Upgrade block frame: `00 03 hi lo` followed by the chunk
pub fn block_frame(block: u16, chunk: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(4 + chunk.len());
    buf.put_u8(0x00);
    buf.put_u8(OP_BLOCK);
    buf.put_u16(block);
    buf.put_slice(chunk);
    buf.to_vec()
}

/// Block number carried by an upgrade ack
pub fn parse_ack(data: &[u8]) -> Option<u16> {
    match data {
        [0x00, OP_ACK, hi, lo] => Some(u16::from_be_bytes([*hi, *lo])),
        _ => None,
    }
}

/// Parse an upgrade handshake reply: 2-byte kind then two NUL-terminated
/// fields. Anything after the second terminator is ignored.
pub fn parse_upgrade_reply(data: &[u8]) -> Option<UpgradeReply> {
    if data.len() < 4 {
        return None;
    }
    let kind = u16::from_be_bytes([data[0], data[1]]);
    let mut fields = data[2..].split(|b| *b == 0);
    let first = fields.next()?;
    let second = fields.next()?;
    // A further segment exists only when the second field was terminated
    fields.next()?;

    Some(UpgradeReply {
        kind,
        fields: (
            std::str::from_utf8(first).ok()?.to_string(),
            std::str::from_utf8(second).ok()?.to_string(),
        ),
    })
}

/// Upgrade handshake reply among whatever else arrives on the command port
pub fn decode_upgrade_reply(data: &[u8]) -> Option<UpgradeReply> {
    if is_regular_traffic(data) {
        return None;
    }
    parse_upgrade_reply(data)
}

/// True for frames that belong to normal polling traffic (sysex, acks,
/// status-sized frames, log and identity replies), even when empty
fn is_regular_traffic(data: &[u8]) -> bool {
    if data.first() == Some(&sysex::SYSEX_START) || parse_ack(data).is_some() {
        return true;
    }
    if data.len() >= COMPACT_STATUS_LEN && data[0] == 0x00 {
        return true;
    }
    let text = String::from_utf8_lossy(data);
    LOG_RE.is_match(&text) || ID_RE.is_match(&text)
}

/// Encode the compact status reply
pub fn encode_compact_status(status: &StatusSnapshot) -> Result<Vec<u8>, CodecError> {
    if status.track_count() > MAX_TRACKS {
        return Err(CodecError::TooManyTracks(status.track_count()));
    }

    let mut buf = BytesMut::with_capacity(COMPACT_STATUS_LEN);
    buf.put_u8(0x00);
    buf.put_u8(status.track_count() as u8);
    buf.put_u8(status.selected_track);
    buf.put_bytes(0, STATUS_HEADER_LEN - 3);

    for i in 0..MAX_TRACKS {
        match status.tracks.get(i) {
            Some(t) => {
                buf.put_u8(t.state.to_byte());
                buf.put_i8(t.level);
                buf.put_i8(t.pan);
                buf.put_u8(t.feedback);
                buf.put_u32(t.length);
                buf.put_u32(t.position);
                buf.put_bytes(0, TRACK_BLOCK_LEN - 12);
            }
            None => buf.put_bytes(0, TRACK_BLOCK_LEN),
        }
    }
    Ok(buf.to_vec())
}

/// Decode the compact status reply; anything but exactly 232 bytes is dropped
pub fn decode_compact_status(data: &[u8]) -> Option<StatusSnapshot> {
    if data.len() != COMPACT_STATUS_LEN || data[0] != 0x00 {
        return None;
    }
    let count = data[1] as usize;
    if count > MAX_TRACKS {
        return None;
    }

    let tracks = data[STATUS_HEADER_LEN..]
        .chunks_exact(TRACK_BLOCK_LEN)
        .take(count)
        .map(|b| TrackStatus {
            state: PlaybackState::from_byte(b[0]),
            level: b[1] as i8,
            pan: b[2] as i8,
            feedback: b[3],
            length: u32::from_be_bytes([b[4], b[5], b[6], b[7]]),
            position: u32::from_be_bytes([b[8], b[9], b[10], b[11]]),
        })
        .collect();

    Some(StatusSnapshot {
        selected_track: data[2],
        tracks,
    })
}

/// Decode any datagram received from the device
pub fn decode_datagram(data: &[u8]) -> Option<DeviceEvent> {
    match *data.first()? {
        sysex::SYSEX_START => return sysex::decode(data),
        0x00 if data.len() == COMPACT_STATUS_LEN => {
            return decode_compact_status(data).map(DeviceEvent::Status)
        }
        _ => {}
    }
    if let Some(block) = parse_ack(data) {
        return Some(DeviceEvent::BlockAck(block));
    }

    let text = String::from_utf8_lossy(data);
    if let Some(caps) = LOG_RE.captures(&text) {
        let log = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        return (!log.is_empty()).then(|| DeviceEvent::Log(log.to_string()));
    }
    if let Some(caps) = ID_RE.captures(&text) {
        return caps
            .get(1)
            .map(|m| DeviceEvent::Identity(m.as_str().to_string()));
    }
    None
}

/// Identity carried by a discovery reply
pub fn parse_identity(data: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(data);
    ID_RE
        .captures(&text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DeviceCommand, EffectConfig};
    use proptest::prelude::*;

    #[test]
    fn test_text_queries() {
        assert_eq!(
            encode_request(&Request::StatusQuery).unwrap(),
            b"<query>status compact</query>\0".to_vec()
        );
        assert_eq!(
            encode_request(&Request::LogQuery).unwrap(),
            b"<query>log</query>\0".to_vec()
        );
        assert_eq!(
            encode_request(&Request::UserCommand(DeviceCommand::Status)).unwrap(),
            b"<userinput>s</userinput>\0".to_vec()
        );
    }

    #[test]
    fn test_config_requests_use_sysex() {
        let bytes = encode_request(&Request::EffectConfigSet(EffectConfig::default())).unwrap();
        assert_eq!(bytes[0], 0xF0);
        assert_eq!(bytes[4], 10);
    }

    #[test]
    fn test_request_datagram_targets_command_port() {
        let (addr, _) = request_datagram(Ipv4Addr::new(10, 0, 0, 5), &Request::LogQuery).unwrap();
        assert_eq!(addr, SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 5), 5667));
    }

    #[test]
    fn test_upgrade_command_has_no_terminator() {
        assert_eq!(upgrade_command(1024), b"<command>upgrade 1024</command>".to_vec());
    }

    #[test]
    fn test_block_frame_and_ack() {
        let frame = block_frame(0x0102, &[9, 9]);
        assert_eq!(frame, vec![0x00, 0x03, 0x01, 0x02, 9, 9]);
        assert_eq!(parse_ack(&[0x00, 0x04, 0x01, 0x02]), Some(0x0102));
        assert_eq!(parse_ack(&[0x00, 0x03, 0x01, 0x02]), None);
        assert_eq!(
            decode_datagram(&[0x00, 0x04, 0x00, 0x07]),
            Some(DeviceEvent::BlockAck(7))
        );
    }

    #[test]
    fn test_upgrade_reply() {
        let mut data = vec![0x00, 0x01];
        data.extend_from_slice(b"ok\0firmware 2.1\0");
        assert_eq!(
            parse_upgrade_reply(&data),
            Some(UpgradeReply {
                kind: 1,
                fields: ("ok".to_string(), "firmware 2.1".to_string()),
            })
        );

        // Second field not terminated
        assert_eq!(parse_upgrade_reply(b"\x00\x01ok\0partial"), None);
        assert_eq!(parse_upgrade_reply(&[0x00]), None);
    }

    #[test]
    fn test_upgrade_reply_ignores_trailing_bytes() {
        let expected = Some(UpgradeReply {
            kind: 1,
            fields: ("upgrade".to_string(), "ok".to_string()),
        });
        assert_eq!(parse_upgrade_reply(b"\x00\x01upgrade\0ok\0\0"), expected);
        assert_eq!(parse_upgrade_reply(b"\x00\x01upgrade\0ok\0third\0"), expected);
        assert_eq!(parse_upgrade_reply(b"\x00\x01upgrade\0ok\0pad"), expected);
    }

    #[test]
    fn test_poll_replies_never_taken_for_upgrade_reply() {
        assert_eq!(decode_upgrade_reply(b"<log></log>\0"), None);
        assert_eq!(decode_upgrade_reply(b"<log>a\0b</log>\0"), None);
        assert_eq!(decode_upgrade_reply(b"<id>Looper</id>\0"), None);
        assert_eq!(decode_upgrade_reply(&[0x00, 0x04, 0x00, 0x01]), None);
        assert_eq!(decode_upgrade_reply(&[0xF0, 0x00, 0x02, 0x33, 0x03, 0xF7]), None);

        let mut status = encode_compact_status(&StatusSnapshot::default()).unwrap();
        assert_eq!(decode_upgrade_reply(&status), None);
        status.extend_from_slice(&[0, 0, 0, 0]);
        assert_eq!(decode_upgrade_reply(&status), None);

        assert_eq!(decode_upgrade_reply(b"\x00\x02garbage"), None);
        assert_eq!(
            decode_upgrade_reply(b"\x00\x01upgrade\0ok\0").map(|r| r.kind),
            Some(1)
        );
    }

    #[test]
    fn test_log_and_identity() {
        assert_eq!(
            decode_datagram(b"<log>line one\nline two\n</log>\0"),
            Some(DeviceEvent::Log("line one\nline two\n".to_string()))
        );
        assert_eq!(decode_datagram(b"<log></log>\0"), None);
        assert_eq!(
            decode_datagram(b"<id>Looper 4</id>\0"),
            Some(DeviceEvent::Identity("Looper 4".to_string()))
        );
        assert_eq!(parse_identity(b"<id>abc</id>"), Some("abc".to_string()));
        assert_eq!(parse_identity(b"hello"), None);
    }

    #[test]
    fn test_compact_status_wrong_length_dropped() {
        let data = encode_compact_status(&StatusSnapshot::default()).unwrap();
        assert_eq!(data.len(), COMPACT_STATUS_LEN);
        assert_eq!(decode_compact_status(&data[..231]), None);
        assert_eq!(decode_datagram(&data[..231]), None);
    }

    #[test]
    fn test_too_many_tracks() {
        let status = StatusSnapshot {
            selected_track: 0,
            tracks: vec![TrackStatus::default(); 9],
        };
        assert_eq!(
            encode_compact_status(&status),
            Err(CodecError::TooManyTracks(9))
        );
    }

    #[test]
    fn test_sysex_inside_datagram() {
        let bytes = vec![0xF0, 0x00, 0x02, 0x33, 0x03, b'h', b'i', 0xF7];
        assert_eq!(
            decode_datagram(&bytes),
            Some(DeviceEvent::Log("hi".to_string()))
        );
    }

    fn track_strategy() -> impl Strategy<Value = TrackStatus> {
        (
            any::<u8>(),
            any::<i8>(),
            any::<i8>(),
            any::<u8>(),
            any::<u32>(),
            any::<u32>(),
        )
            .prop_map(|(state, level, pan, feedback, length, position)| TrackStatus {
                state: PlaybackState::from_byte(state),
                level,
                pan,
                feedback,
                length,
                position,
            })
    }

    proptest! {
        #[test]
        fn prop_compact_status_roundtrip(
            selected in any::<u8>(),
            tracks in prop::collection::vec(track_strategy(), 0..=MAX_TRACKS),
        ) {
            let status = StatusSnapshot { selected_track: selected, tracks };
            let data = encode_compact_status(&status).unwrap();
            prop_assert_eq!(data.len(), COMPACT_STATUS_LEN);
            prop_assert_eq!(decode_compact_status(&data), Some(status.clone()));
            prop_assert_eq!(decode_datagram(&data), Some(DeviceEvent::Status(status)));
        }
    }
}
