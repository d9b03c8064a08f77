// HDiffPatch tag-prefixed variable-length integer encoding.
//
// Base-128, big-endian: most-significant group first. The first byte
// reserves its top `tag_bits` bits for a caller tag, the next bit is the
// continuation flag, and the low `7 - tag_bits` bits hold the top value
// bits. Continuation bytes carry 7 value bits each with bit 7 set on all
// but the last.

/// Maximum encoded length for a 64-bit value (ceil(64/7) = 10).
pub const MAX_VARINT_LEN: usize = 10;

/// Overflow guard: if any of these bits are set before a shift, the next
/// `<< 7` would lose value bits.
const U64_OVERFLOW_MASK: u64 = 0xFE00_0000_0000_0000;

/// Tag widths in use: 0 (plain sizes), 1 (old-position sign), 2 (RLE type).
pub const MAX_TAG_BITS: u8 = 3;

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Append `num` with `tag` in the top `tag_bits` bits of the first byte.
///
/// Gathers low 7-bit groups into a scratch buffer, emits the first byte
/// with the remaining top bits, then the groups most-significant first.
pub fn pack_with_tag(mut num: u64, tag: u8, tag_bits: u8, out: &mut Vec<u8>) {
    debug_assert!(tag_bits <= MAX_TAG_BITS);
    debug_assert!(u32::from(tag) < (1u32 << tag_bits));
    let lite_limit = (1u64 << (7 - tag_bits)) - 1;

    let mut groups = [0u8; MAX_VARINT_LEN];
    let mut n = 0;
    while num > lite_limit {
        groups[n] = (num as u8) & 0x7F;
        n += 1;
        num >>= 7;
    }

    let tag_part = (u16::from(tag) << (8 - tag_bits)) as u8;
    let cont = if n > 0 { 1u8 << (7 - tag_bits) } else { 0 };
    out.push(tag_part | cont | (num as u8));
    while n > 0 {
        n -= 1;
        let cont = if n > 0 { 0x80 } else { 0 };
        out.push(groups[n] | cont);
    }
}

/// Return the encoded byte-length of `num` under `tag_bits`.
#[inline]
pub fn packed_len(mut num: u64, tag_bits: u8) -> usize {
    let lite_limit = (1u64 << (7 - tag_bits)) - 1;
    let mut len = 1;
    while num > lite_limit {
        len += 1;
        num >>= 7;
    }
    len
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// The tag stored in the top `tag_bits` bits of a first byte.
#[inline]
pub fn tag_of(first: u8, tag_bits: u8) -> u8 {
    debug_assert!(tag_bits <= MAX_TAG_BITS);
    if tag_bits == 0 { 0 } else { first >> (8 - tag_bits) }
}

/// Decode a value from the front of `data`, ignoring the tag bits.
/// Returns `(value, bytes_consumed)`.
pub fn unpack_with_tag(data: &[u8], tag_bits: u8) -> Result<(u64, usize), VarIntError> {
    debug_assert!(tag_bits <= MAX_TAG_BITS);
    let Some(&first) = data.first() else {
        return Err(VarIntError::Underflow);
    };
    let cont_bit = 1u8 << (7 - tag_bits);
    let mut value = u64::from(first & (cont_bit - 1));
    let mut consumed = 1;
    if first & cont_bit != 0 {
        loop {
            if value & U64_OVERFLOW_MASK != 0 {
                return Err(VarIntError::Overflow);
            }
            let Some(&byte) = data.get(consumed) else {
                return Err(VarIntError::Underflow);
            };
            consumed += 1;
            value = (value << 7) | u64::from(byte & 0x7F);
            if byte & 0x80 == 0 {
                break;
            }
        }
    }
    Ok((value, consumed))
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarIntError {
    /// Not enough input bytes to complete the integer.
    Underflow,
    /// Value would overflow 64 bits.
    Overflow,
}

impl std::fmt::Display for VarIntError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VarIntError::Underflow => write!(f, "varint underflow (truncated input)"),
            VarIntError::Overflow => write!(f, "varint overflow"),
        }
    }
}

impl std::error::Error for VarIntError {}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_all_tag_widths() {
        let cases: &[u64] = &[
            0,
            1,
            31,
            32,
            63,
            64,
            127,
            128,
            255,
            256,
            16383,
            16384,
            u32::MAX as u64,
            u64::MAX,
        ];
        for tag_bits in 0..=MAX_TAG_BITS {
            for tag in 0..(1u8 << tag_bits) {
                for &val in cases {
                    let mut buf = Vec::new();
                    pack_with_tag(val, tag, tag_bits, &mut buf);
                    assert_eq!(buf.len(), packed_len(val, tag_bits), "len for {val}");
                    assert_eq!(tag_of(buf[0], tag_bits), tag, "tag for {val}");
                    let (decoded, consumed) = unpack_with_tag(&buf, tag_bits).unwrap();
                    assert_eq!(decoded, val, "value for {val} tag_bits {tag_bits}");
                    assert_eq!(consumed, buf.len());
                }
            }
        }
    }

    #[test]
    fn single_byte_values() {
        // With no tag, values up to 63 fit the first byte.
        for val in 0..=63u64 {
            let mut buf = Vec::new();
            pack_with_tag(val, 0, 0, &mut buf);
            assert_eq!(buf, [val as u8]);
        }
        // With a 2-bit tag only 5 value bits remain.
        let mut buf = Vec::new();
        pack_with_tag(31, 3, 2, &mut buf);
        assert_eq!(buf, [0b1101_1111]);
    }

    #[test]
    fn max_value_fits_ten_bytes() {
        let mut buf = Vec::new();
        pack_with_tag(u64::MAX, 0, 0, &mut buf);
        assert_eq!(buf.len(), MAX_VARINT_LEN);
    }

    #[test]
    fn continuation_layout() {
        // 300 with tag_bits 0: 300 = 0b100101100, top bits 0b10 in the
        // first byte with the continuation flag, then group 0b0101100.
        let mut buf = Vec::new();
        pack_with_tag(300, 0, 0, &mut buf);
        assert_eq!(buf, [0x82, 0x2C]);
    }

    #[test]
    fn underflow_on_truncation() {
        let mut buf = Vec::new();
        pack_with_tag(1 << 40, 0, 0, &mut buf);
        buf.pop();
        assert_eq!(unpack_with_tag(&buf, 0), Err(VarIntError::Underflow));
        assert_eq!(unpack_with_tag(&[], 0), Err(VarIntError::Underflow));
    }

    #[test]
    fn overflow_on_excess_bits() {
        // All-ones continuation bytes exceed 64 value bits before any
        // terminator shows up.
        let data = [0xFF; 10];
        assert_eq!(unpack_with_tag(&data, 0), Err(VarIntError::Overflow));
    }

    #[test]
    fn leading_zero_groups_stall_at_overflow_guard() {
        // Redundant 0x80 groups keep the accumulator at zero; the decoder
        // only stops at the terminator, so callers must bound the slice.
        let data = [0x80, 0x80, 0x80, 0x00];
        let (val, consumed) = unpack_with_tag(&data, 0).unwrap();
        assert_eq!(val, 0);
        assert_eq!(consumed, 4);
    }
}
