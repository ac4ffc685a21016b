//! UTF-8 structural validation
//!
//! A character is 1 to 4 bytes long:
//!
//! ```text
//! +---------------------+-------------------------------------+
//! | Char. number range  |        UTF-8 octet sequence         |
//! +---------------------+-------------------------------------+
//! | 0000 0000-0000 007F | 0xxxxxxx                            |
//! | 0000 0080-0000 07FF | 110xxxxx 10xxxxxx                   |
//! | 0000 0800-0000 FFFF | 1110xxxx 10xxxxxx 10xxxxxx          |
//! | 0001 0000-0010 FFFF | 11110xxx 10xxxxxx 10xxxxxx 10xxxxxx |
//! +---------------------+-------------------------------------+
//! ```

/// `10xxxxxx`
#[inline]
const fn is_continuation(byte: u8) -> bool {
    byte & 0xC0 == 0x80
}

/// Number of continuation bytes announced by a lead byte, or `None` if the
/// byte cannot start a character.
#[inline]
const fn continuation_count(lead: u8) -> Option<usize> {
    if lead & 0x80 == 0 {
        Some(0)
    } else if lead & 0xE0 == 0xC0 {
        Some(1)
    } else if lead & 0xF0 == 0xE0 {
        Some(2)
    } else if lead & 0xF8 == 0xF0 {
        Some(3)
    } else {
        None
    }
}

/// Check that `bytes` follows the UTF-8 lead/continuation byte structure.
#[must_use]
pub fn is_valid_utf8(bytes: &[u8]) -> bool {
    let mut i = 0;
    while i < bytes.len() {
        let Some(extra) = continuation_count(bytes[i]) else {
            return false;
        };

        let Some(tail) = bytes.get(i + 1..=i + extra) else {
            return false;
        };
        if !tail.iter().all(|&b| is_continuation(b)) {
            return false;
        }

        i += 1 + extra;
    }
    true
}
