//! JVM modified UTF-8 (JVMS §4.4.7).
//!
//! Differs from standard UTF-8 in two ways: NUL is encoded as `C0 80`, and
//! supplementary characters are stored as a surrogate pair, each half as its
//! own three-byte sequence.

use crate::error::{PurgeError, PurgeResult};

pub(crate) fn decode(bytes: &[u8]) -> PurgeResult<String> {
    if bytes.iter().all(|byte| (0x01..0x80).contains(byte)) {
        return Ok(bytes.iter().map(|byte| char::from(*byte)).collect());
    }

    let mut units = Vec::with_capacity(bytes.len());
    let mut iter = bytes.iter().copied();
    while let Some(first) = iter.next() {
        let unit = match first {
            0x01..=0x7F => u16::from(first),
            0xC0..=0xDF => {
                let second = continuation(iter.next())?;
                (u16::from(first & 0x1F) << 6) | second
            }
            0xE0..=0xEF => {
                let second = continuation(iter.next())?;
                let third = continuation(iter.next())?;
                (u16::from(first & 0x0F) << 12) | (second << 6) | third
            }
            _ => {
                return Err(PurgeError::malformed(format!(
                    "invalid modified UTF-8 byte {first:#04x}"
                )));
            }
        };
        units.push(unit);
    }
    // Unpaired surrogates are legal in class files but have no `char`.
    Ok(char::decode_utf16(units)
        .map(|decoded| decoded.unwrap_or(char::REPLACEMENT_CHARACTER))
        .collect())
}

fn continuation(byte: Option<u8>) -> PurgeResult<u16> {
    match byte {
        Some(byte) if byte & 0xC0 == 0x80 => Ok(u16::from(byte & 0x3F)),
        _ => Err(PurgeError::malformed("truncated modified UTF-8 sequence")),
    }
}
