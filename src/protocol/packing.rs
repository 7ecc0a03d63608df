//! 7-bit packing helpers
//!
//! MIDI data bytes only carry 7 bits, so the device splits wider values into
//! 7-bit limbs. Multi-byte counters are sent least-significant limb first;
//! 14-bit identifiers are sent as a (high, low) pair.

/// Device sample rate used to turn sample counters into seconds
pub const SAMPLE_RATE: f64 = 48_000.0;

/// Wire value standing in for an unassigned function slot
pub const UNASSIGNED_WIRE: u16 = 0x3fff;

/// Reconstruct an integer from 7-bit limbs, least significant limb first.
///
/// Limbs past the width of a `u64` are ignored.
pub fn unpack_7bit(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .take(9)
        .enumerate()
        .fold(0u64, |acc, (i, b)| acc + (((*b & 0x7f) as u64) << (7 * i)))
}

/// Split an integer into `width` 7-bit limbs, least significant limb first.
pub fn pack_7bit(mut value: u64, width: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(width);
    for _ in 0..width {
        out.push((value & 0x7f) as u8);
        value >>= 7;
    }
    out
}

/// Convert a sample counter to seconds
pub fn samples_to_secs(samples: u32) -> f64 {
    samples as f64 / SAMPLE_RATE
}

/// Split a 14-bit value into its (high, low) 7-bit pair
pub fn split_14bit(value: u16) -> (u8, u8) {
    (((value >> 7) & 0x7f) as u8, (value & 0x7f) as u8)
}

/// Join a (high, low) 7-bit pair into a 14-bit value
pub fn join_14bit(high: u8, low: u8) -> u16 {
    ((high as u16 & 0x7f) << 7) | (low as u16 & 0x7f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpack_little_endian_limbs() {
        assert_eq!(
            unpack_7bit(&[0x60, 0x5C, 0x02]),
            0x60 + 0x5C * 128 + 0x02 * 16384
        );
    }

    #[test]
    fn test_unpack_to_seconds() {
        // 96000 samples = 2 seconds
        let limbs = pack_7bit(96_000, 5);
        let samples = unpack_7bit(&limbs) as u32;
        assert!((samples_to_secs(samples) - 2.0).abs() < 1e-9);

        let value = unpack_7bit(&[0x60, 0x5C, 0x02]) as u32;
        assert!((samples_to_secs(value) - 44_640.0 / 48_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_pack_unpack_five_limbs() {
        let value = 0x7_ffff_ffff;
        assert_eq!(unpack_7bit(&pack_7bit(value, 5)), value);
    }

    #[test]
    fn test_empty_input_is_zero() {
        assert_eq!(unpack_7bit(&[]), 0);
    }

    #[test]
    fn test_14bit_pairs() {
        assert_eq!(split_14bit(UNASSIGNED_WIRE), (0x7f, 0x7f));
        assert_eq!(join_14bit(0x7f, 0x7f), UNASSIGNED_WIRE);
        assert_eq!(split_14bit(300), (2, 44));
        assert_eq!(join_14bit(2, 44), 300);
    }
}
