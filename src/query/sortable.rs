//! Order-preserving string-to-i64 encoding.
//!
//! The first eight UTF-8 bytes of a string, big-endian, with the sign bit
//! flipped so that unsigned byte order and `i64` order agree. Two strings
//! that differ within their first eight bytes encode in the same relative
//! order; strings that agree on those bytes collide, which is fine for
//! index advice since the caller re-applies the full predicate as a
//! residual check.

/// Encodes with `0x00` padding; the least key any string starting with
/// these bytes can have.
pub fn encode_str(s: &str) -> i64 {
    encode_padded(s.as_bytes(), 0x00)
}

/// Key range bracketing every string that starts with `prefix`. A prefix
/// of eight or more bytes pins a single key.
pub fn prefix_bounds(prefix: &str) -> (i64, i64) {
    let bytes = prefix.as_bytes();
    (encode_padded(bytes, 0x00), encode_padded(bytes, 0xFF))
}

fn encode_padded(bytes: &[u8], pad: u8) -> i64 {
    let mut buf = [pad; 8];
    let n = bytes.len().min(8);
    buf[..n].copy_from_slice(&bytes[..n]);
    (u64::from_be_bytes(buf) ^ (1 << 63)) as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preserves_order_of_short_strings() {
        assert!(encode_str("abc") < encode_str("abd"));
        assert!(encode_str("abc") < encode_str("abca"));
        assert!(encode_str("") < encode_str("a"));
        assert!(encode_str("Z") < encode_str("a"));
    }

    #[test]
    fn empty_string_is_minimum() {
        assert_eq!(encode_str(""), i64::MIN);
    }

    #[test]
    fn bytes_past_eight_are_ignored() {
        assert_eq!(encode_str("abcdefghX"), encode_str("abcdefghY"));
    }

    #[test]
    fn prefix_bounds_bracket_extensions() {
        let (min, max) = prefix_bounds("car");

        assert!(min <= encode_str("car"));
        assert!(encode_str("car") <= max);
        assert!(min <= encode_str("carpet") && encode_str("carpet") <= max);
        assert!(encode_str("cas") > max);
        assert!(encode_str("cap") < min);
    }

    #[test]
    fn long_prefix_pins_a_point() {
        let (min, max) = prefix_bounds("abcdefgh");

        assert_eq!(min, max);
        assert_eq!(min, encode_str("abcdefgh"));
    }

    #[test]
    fn high_bytes_keep_ordering() {
        assert!(encode_str("\u{00e9}") > encode_str("z"));
    }
}
