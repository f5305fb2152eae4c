//! Variable-length integers of the object format
//!
//! Big-endian groups. The first byte is `[continue][sign][6 bits]`, every
//! following byte `[continue][7 bits]`; the magnitude is stored, not a
//! two's complement.

const CONTINUE: u8 = 0x80;
const SIGN: u8 = 0x40;

/// Append the encoding of `value` to `out`
pub fn encode(value: i64, out: &mut Vec<u8>) {
    let magnitude = value.unsigned_abs();
    let mut extra = 0u32;
    while magnitude.checked_shr(6 + 7 * extra).unwrap_or(0) != 0 {
        extra += 1;
    }

    let mut first = ((magnitude >> (7 * extra)) & 0x3f) as u8;
    if value < 0 {
        first |= SIGN;
    }
    if extra > 0 {
        first |= CONTINUE;
    }
    out.push(first);
    for i in (0..extra).rev() {
        let mut byte = ((magnitude >> (7 * i)) & 0x7f) as u8;
        if i > 0 {
            byte |= CONTINUE;
        }
        out.push(byte);
    }
}

/// Number of bytes `encode` produces for `value`
pub fn encoded_len(value: i64) -> usize {
    let magnitude = value.unsigned_abs();
    let mut len = 1;
    while magnitude.checked_shr(6 + 7 * (len as u32 - 1)).unwrap_or(0) != 0 {
        len += 1;
    }
    len
}

/// Decode one integer from the front of `bytes`, returning it with the
/// number of bytes consumed. None on truncated or overlong input.
pub fn decode(bytes: &[u8]) -> Option<(i64, usize)> {
    let first = *bytes.first()?;
    let mut magnitude = u64::from(first & 0x3f);
    let mut read = 1;
    let mut more = first & CONTINUE != 0;
    while more {
        // 6 + 9 * 7 bits cover any i64
        if read > 9 {
            return None;
        }
        let byte = *bytes.get(read)?;
        magnitude = (magnitude << 7) | u64::from(byte & 0x7f);
        more = byte & CONTINUE != 0;
        read += 1;
    }

    let value = magnitude as i64;
    Some((if first & SIGN != 0 { value.wrapping_neg() } else { value }, read))
}

/// Append a length-prefixed UTF-8 string
pub fn encode_str(s: &str, out: &mut Vec<u8>) {
    encode(s.len() as i64, out);
    out.extend_from_slice(s.as_bytes());
}

/// Decode a length-prefixed UTF-8 string
pub fn decode_str(bytes: &[u8]) -> Option<(String, usize)> {
    let (len, read) = decode(bytes)?;
    let len = usize::try_from(len).ok()?;
    let body = bytes.get(read..read + len)?;
    let s = String::from_utf8(body.to_vec()).ok()?;
    Some((s, read + len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn bytes(value: i64) -> Vec<u8> {
        let mut out = Vec::new();
        encode(value, &mut out);
        out
    }

    #[test]
    fn test_known_encodings() {
        assert_eq!(bytes(0), vec![0x00]);
        assert_eq!(bytes(63), vec![0x3f]);
        assert_eq!(bytes(64), vec![0x80, 0x40]);
        assert_eq!(bytes(-1), vec![0x41]);
        assert_eq!(bytes(-64), vec![0xc0, 0x40]);
        assert_eq!(bytes(8191), vec![0xbf, 0x7f]);
        assert_eq!(bytes(8192), vec![0x80, 0xc0, 0x00]);
    }

    #[test]
    fn test_decode_extremes() {
        for value in [i64::MAX, i64::MIN, i64::MIN + 1, 1 << 40, -(1 << 40)] {
            let encoded = bytes(value);
            assert_eq!(encoded.len(), encoded_len(value));
            assert_eq!(decode(&encoded), Some((value, encoded.len())));
        }
    }

    #[test]
    fn test_decode_stops_at_value_end() {
        assert_eq!(decode(&[0x80, 0x40, 0x05]), Some((64, 2)));
        assert_eq!(decode(&[0x80]), None);
        assert_eq!(decode(&[]), None);
    }

    #[test]
    fn test_strings() {
        let mut out = Vec::new();
        encode_str("id`Int", &mut out);
        assert_eq!(out[0], 6);
        assert_eq!(decode_str(&out), Some(("id`Int".to_string(), 7)));
    }
}
