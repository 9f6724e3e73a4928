//! # DecSync Codec
//!
//! Reversible encoding of arbitrary strings into filesystem-safe names.
//!
//! Peers on different platforms must agree on file names bit-for-bit, so
//! the alphabet is fixed: bytes in `[A-Za-z0-9-_.~]` pass through, every
//! other byte of the UTF-8 input becomes `%HH` with uppercase hex. A name
//! whose encoded form would begin with `.` has that first byte rewritten
//! to `%2E`, which keeps dotfiles available to the engine's internals
//! (sequence counters, `.decsync-info`) and makes them invisible to the
//! decoder.
//!
//! ## Round-trip law
//!
//! For every string `s`, `decode(&encode(s)) == Some(s)`. The decoder
//! rejects anything the encoder cannot have produced: a leading `.`,
//! lowercase or truncated hex escapes, and bytes outside the safe set.
//!
//! ## Example
//!
//! ```rust
//! use decsync_codec::{decode, encode};
//!
//! assert_eq!(encode("unicode ☺"), "unicode%20%E2%98%BA");
//! assert_eq!(encode(".hidden"), "%2Ehidden");
//! assert_eq!(decode("%2Ehidden").as_deref(), Some(".hidden"));
//! assert_eq!(decode(".decsync-sequence"), None);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Returns true for bytes that pass through the codec unescaped.
#[must_use]
pub fn is_safe_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b'.' | b'~')
}

/// Encodes `name` into a filesystem-safe file name.
#[must_use]
pub fn encode(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        if is_safe_byte(byte) {
            out.push(byte as char);
        } else {
            out.push('%');
            out.push_str(&format!("{byte:02X}"));
        }
    }
    if out.starts_with('.') {
        out.replace_range(0..1, "%2E");
    }
    out
}

/// Decodes a file name produced by [`encode`].
///
/// Returns `None` for names the encoder cannot have produced: hidden
/// names (leading `.`), malformed or lowercase `%HH` escapes, unsafe
/// bytes, and invalid UTF-8 after expansion.
#[must_use]
pub fn decode(name: &str) -> Option<String> {
    if name.starts_with('.') {
        return None;
    }
    let mut bytes = Vec::with_capacity(name.len());
    let mut rest = name.as_bytes();
    while let Some((&byte, tail)) = rest.split_first() {
        if byte == b'%' {
            let (hex, tail) = tail.split_at_checked(2)?;
            bytes.push(hex_byte(hex)?);
            rest = tail;
        } else if is_safe_byte(byte) {
            bytes.push(byte);
            rest = tail;
        } else {
            return None;
        }
    }
    String::from_utf8(bytes).ok()
}

/// Parses one uppercase `HH` pair.
fn hex_byte(hex: &[u8]) -> Option<u8> {
    let digit = |b: u8| match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'A'..=b'F' => Some(b - b'A' + 10),
        // Lowercase hex is rejected: the encoder never emits it, and
        // accepting both forms would let two names collide on
        // case-insensitive filesystems.
        _ => None,
    };
    Some(digit(hex[0])? << 4 | digit(hex[1])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn safe_names_pass_through() {
        assert_eq!(encode("colID12345"), "colID12345");
        assert_eq!(encode("a-b_c.d~e"), "a-b_c.d~e");
        assert_eq!(decode("colID12345").as_deref(), Some("colID12345"));
    }

    #[test]
    fn unsafe_bytes_become_uppercase_escapes() {
        assert_eq!(encode("a/b"), "a%2Fb");
        assert_eq!(encode("100%"), "100%25");
        assert_eq!(encode("unicode ☺"), "unicode%20%E2%98%BA");
    }

    #[test]
    fn leading_dot_is_protected() {
        assert_eq!(encode("."), "%2E");
        assert_eq!(encode(".hidden"), "%2Ehidden");
        assert_eq!(encode("..config"), "%2E.config");
        assert_eq!(decode("%2Ehidden").as_deref(), Some(".hidden"));
        assert_eq!(decode("%2E.config").as_deref(), Some("..config"));
    }

    #[test]
    fn hidden_names_do_not_decode() {
        assert_eq!(decode(".decsync-sequence"), None);
        assert_eq!(decode(".decsync-info"), None);
    }

    #[test]
    fn malformed_escapes_rejected() {
        assert_eq!(decode("%2"), None);
        assert_eq!(decode("%"), None);
        assert_eq!(decode("%GG"), None);
        assert_eq!(decode("%2e"), None); // lowercase hex
        assert_eq!(decode("a b"), None); // raw unsafe byte
    }

    #[test]
    fn invalid_utf8_rejected() {
        assert_eq!(decode("%FF"), None);
    }

    #[test]
    fn empty_round_trip() {
        assert_eq!(encode(""), "");
        assert_eq!(decode("").as_deref(), Some(""));
    }

    proptest! {
        #[test]
        fn round_trip(s in "\\PC*") {
            let encoded = encode(&s);
            prop_assert_eq!(decode(&encoded), Some(s.clone()));
            if s.starts_with('.') {
                prop_assert!(encoded.starts_with("%2E"));
            } else {
                prop_assert!(!encoded.starts_with('.'));
            }
        }

        #[test]
        fn encoded_names_are_safe(s in "\\PC*") {
            let encoded = encode(&s);
            prop_assert!(encoded
                .bytes()
                .all(|b| is_safe_byte(b) || b == b'%'));
            prop_assert!(!encoded.starts_with('.'));
        }
    }
}
