//! Symbolic key name → VT byte sequence encoding.
//!
//! The `press_key` operation accepts names like `enter`, `ctrl+c`, `f7`, or
//! `pageup` and transmits the exact bytes a VT-style terminal would send for
//! that key. `type_text` bypasses this module entirely and writes its input
//! verbatim.

use crate::error::ServerError;

/// Encode a symbolic key name into the bytes a terminal would transmit.
///
/// Names are trimmed and matched case-insensitively. Resolution order:
///
/// 1. `ctrl+<letter>` for a–z, producing the single byte `0x01 + (letter - 'a')`
/// 2. Named keys from the fixed table below
/// 3. A single character, passed through verbatim
///
/// # Errors
///
/// Returns [`ServerError::UnknownKey`] when the name matches none of the
/// above.
pub fn encode_key(name: &str) -> Result<Vec<u8>, ServerError> {
    let trimmed = name.trim();
    let key = trimmed.to_ascii_lowercase();

    if let Some(rest) = key.strip_prefix("ctrl+") {
        let mut chars = rest.chars();
        if let (Some(c), None) = (chars.next(), chars.next()) {
            if c.is_ascii_lowercase() {
                return Ok(vec![c as u8 - b'a' + 1]);
            }
        }
        return Err(ServerError::UnknownKey(trimmed.to_string()));
    }

    if let Some(bytes) = named_key_bytes(&key) {
        return Ok(bytes.to_vec());
    }

    // Single characters pass through verbatim, preserving the original case.
    let mut chars = trimmed.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        let mut buf = [0u8; 4];
        return Ok(c.encode_utf8(&mut buf).as_bytes().to_vec());
    }

    Err(ServerError::UnknownKey(trimmed.to_string()))
}

/// Fixed table of named keys. Byte sequences match what xterm transmits.
fn named_key_bytes(key: &str) -> Option<&'static [u8]> {
    let bytes: &'static [u8] = match key {
        "enter" | "return" => b"\r",
        "tab" => b"\t",
        "escape" | "esc" => b"\x1b",
        "backspace" => b"\x7f",
        "space" => b" ",
        "up" => b"\x1b[A",
        "down" => b"\x1b[B",
        "right" => b"\x1b[C",
        "left" => b"\x1b[D",
        "home" => b"\x1b[H",
        "end" => b"\x1b[F",
        "pageup" => b"\x1b[5~",
        "pagedown" => b"\x1b[6~",
        "insert" => b"\x1b[2~",
        "delete" => b"\x1b[3~",
        "f1" => b"\x1bOP",
        "f2" => b"\x1bOQ",
        "f3" => b"\x1bOR",
        "f4" => b"\x1bOS",
        "f5" => b"\x1b[15~",
        "f6" => b"\x1b[17~",
        "f7" => b"\x1b[18~",
        "f8" => b"\x1b[19~",
        "f9" => b"\x1b[20~",
        "f10" => b"\x1b[21~",
        "f11" => b"\x1b[23~",
        "f12" => b"\x1b[24~",
        _ => return None,
    };
    Some(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ctrl_combinations() {
        assert_eq!(encode_key("ctrl+a").unwrap(), vec![0x01]);
        assert_eq!(encode_key("ctrl+c").unwrap(), vec![0x03]);
        assert_eq!(encode_key("ctrl+z").unwrap(), vec![0x1a]);
        // Uppercase and padding are normalized.
        assert_eq!(encode_key(" Ctrl+C ").unwrap(), vec![0x03]);
    }

    #[test]
    fn ctrl_with_non_letter_is_unknown() {
        assert!(matches!(
            encode_key("ctrl+1"),
            Err(ServerError::UnknownKey(_))
        ));
        assert!(matches!(
            encode_key("ctrl+esc"),
            Err(ServerError::UnknownKey(_))
        ));
    }

    #[test]
    fn named_keys_match_vt_sequences() {
        assert_eq!(encode_key("enter").unwrap(), b"\r");
        assert_eq!(encode_key("return").unwrap(), b"\r");
        assert_eq!(encode_key("Enter").unwrap(), b"\r");
        assert_eq!(encode_key("tab").unwrap(), b"\t");
        assert_eq!(encode_key("escape").unwrap(), b"\x1b");
        assert_eq!(encode_key("esc").unwrap(), b"\x1b");
        assert_eq!(encode_key("backspace").unwrap(), b"\x7f");
        assert_eq!(encode_key("space").unwrap(), b" ");
        assert_eq!(encode_key("up").unwrap(), b"\x1b[A");
        assert_eq!(encode_key("down").unwrap(), b"\x1b[B");
        assert_eq!(encode_key("right").unwrap(), b"\x1b[C");
        assert_eq!(encode_key("left").unwrap(), b"\x1b[D");
        assert_eq!(encode_key("home").unwrap(), b"\x1b[H");
        assert_eq!(encode_key("end").unwrap(), b"\x1b[F");
        assert_eq!(encode_key("pageup").unwrap(), b"\x1b[5~");
        assert_eq!(encode_key("pagedown").unwrap(), b"\x1b[6~");
        assert_eq!(encode_key("insert").unwrap(), b"\x1b[2~");
        assert_eq!(encode_key("delete").unwrap(), b"\x1b[3~");
    }

    #[test]
    fn function_keys() {
        assert_eq!(encode_key("f1").unwrap(), b"\x1bOP");
        assert_eq!(encode_key("f2").unwrap(), b"\x1bOQ");
        assert_eq!(encode_key("f3").unwrap(), b"\x1bOR");
        assert_eq!(encode_key("f4").unwrap(), b"\x1bOS");
        assert_eq!(encode_key("f5").unwrap(), b"\x1b[15~");
        assert_eq!(encode_key("f6").unwrap(), b"\x1b[17~");
        assert_eq!(encode_key("f7").unwrap(), b"\x1b[18~");
        assert_eq!(encode_key("f8").unwrap(), b"\x1b[19~");
        assert_eq!(encode_key("f9").unwrap(), b"\x1b[20~");
        assert_eq!(encode_key("f10").unwrap(), b"\x1b[21~");
        assert_eq!(encode_key("f11").unwrap(), b"\x1b[23~");
        assert_eq!(encode_key("f12").unwrap(), b"\x1b[24~");
    }

    #[test]
    fn single_characters_pass_through() {
        assert_eq!(encode_key("a").unwrap(), b"a");
        assert_eq!(encode_key("A").unwrap(), b"A");
        assert_eq!(encode_key("/").unwrap(), b"/");
        assert_eq!(encode_key("é").unwrap(), "é".as_bytes());
    }

    #[test]
    fn multi_character_garbage_is_unknown() {
        assert!(matches!(
            encode_key("qux"),
            Err(ServerError::UnknownKey(_))
        ));
        assert!(matches!(encode_key(""), Err(ServerError::UnknownKey(_))));
    }
}
