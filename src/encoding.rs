//! Decoding of raw bytes that enter a payload from outside the type system: header values,
//! request bodies and source files.

use std::borrow::Cow;

/// Decode `bytes` as UTF-8, dropping invalid or incomplete sequences.
///
/// Valid input is borrowed as is. If nothing decodable remains from a non-empty input, a
/// diagnostic string is returned instead.
pub fn enforce_valid_utf8(bytes: &[u8]) -> Cow<'_, str> {
    if let Ok(valid) = std::str::from_utf8(bytes) {
        return Cow::Borrowed(valid);
    }

    let mut decoded = String::with_capacity(bytes.len());
    let mut rest = bytes;
    while !rest.is_empty() {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                decoded.push_str(valid);
                break;
            }
            Err(err) => {
                let (valid, after) = rest.split_at(err.valid_up_to());
                if let Ok(valid) = std::str::from_utf8(valid) {
                    decoded.push_str(valid);
                }
                // error_len is None for a sequence cut off by the end of input.
                rest = match err.error_len() {
                    Some(len) => &after[len..],
                    None => &[],
                };
            }
        }
    }

    if decoded.is_empty() {
        Cow::Owned(format!("<undecodable value of {} bytes>", bytes.len()))
    } else {
        Cow::Owned(decoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(b"plain", "plain" ; "ascii")]
    #[test_case("grüße".as_bytes(), "grüße" ; "valid multibyte")]
    #[test_case(b"ab\xffcd", "abcd" ; "invalid byte in the middle")]
    #[test_case(b"ab\xc3", "ab" ; "truncated sequence at the end")]
    #[test_case(b"\xff\xfe", "<undecodable value of 2 bytes>" ; "nothing decodable")]
    #[test_case(b"", "" ; "empty")]
    fn decode(input: &[u8], expected: &str) {
        assert_eq!(expected, enforce_valid_utf8(input));
    }

    #[test]
    fn valid_input_is_borrowed() {
        assert!(matches!(enforce_valid_utf8(b"ok"), Cow::Borrowed(_)));
    }
}
