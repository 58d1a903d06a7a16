//! Decoder for ISO-2022-JP-MS, the Microsoft flavour of ISO-2022-JP.
//!
//! On top of plain ISO-2022-JP it accepts JIS-Roman and JIS-Latin single
//! byte sets, half-width katakana, and the NEC and IBM vendor rows when
//! JIS X 0208:1990 is designated. Decode only.

use crate::charset::codec::Codec;
use crate::charset::jis_tables::{decode_pair, Revision};
use crate::error::DecodeError;

const ESC: u8 = 0x1B;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Ascii,
    Katakana,
    Jis(Revision),
}

/// Recognised escape sequences, without the leading `ESC`.
const DESIGNATORS: [([u8; 2], Mode); 6] = [
    ([b'(', b'B'], Mode::Ascii),
    ([b'(', b'J'], Mode::Ascii),
    ([b'(', b'H'], Mode::Ascii),
    ([b'(', b'I'], Mode::Katakana),
    ([b'$', b'@'], Mode::Jis(Revision::Jis1978)),
    ([b'$', b'B'], Mode::Jis(Revision::Jis1990)),
];

/// Offset added to a byte in katakana mode to reach the half-width block.
const KATAKANA_OFFSET: u32 = 0xFF40;

fn malformed(offset: usize, reason: impl Into<String>) -> DecodeError {
    DecodeError::MalformedLegacySequence {
        offset,
        reason: reason.into(),
    }
}

/// Stateless ISO-2022-JP-MS codec.
#[derive(Debug, Default, Clone, Copy)]
pub struct Iso2022JpMs;

impl Iso2022JpMs {
    /// Canonical name reported as `encoding_used`.
    pub const NAME: &'static str = "iso-2022-jp-ms";

    /// Every spelling the codec is registered under.
    pub const ALIASES: [&'static str; 6] = [
        "iso_2022_jp_ms",
        "iso-2022-jp-ms",
        "iso2022_jp_ms",
        "iso2022-jp-ms",
        "iso2022jp_ms",
        "iso2022jp-ms",
    ];

    /// Decode a complete ISO-2022-JP-MS byte sequence.
    ///
    /// Fails on an unknown or truncated escape sequence, on a byte that is
    /// invalid in the current single-byte mode, and on input that ends in the
    /// middle of a two-byte character.
    pub fn decode_bytes(bytes: &[u8]) -> Result<String, DecodeError> {
        let mut out = String::with_capacity(bytes.len());
        let mut mode = Mode::Ascii;
        // Lead byte of a two-byte character and its offset.
        let mut pending: Option<(usize, u8)> = None;
        let mut i = 0;

        while i < bytes.len() {
            let b = bytes[i];

            if b == ESC {
                if let Some((offset, _)) = pending {
                    return Err(malformed(offset, "escape sequence inside a two-byte character"));
                }
                let designator = bytes
                    .get(i + 1..i + 3)
                    .ok_or_else(|| malformed(i, "truncated escape sequence"))?;
                mode = DESIGNATORS
                    .iter()
                    .find(|(seq, _)| seq.as_slice() == designator)
                    .map(|&(_, m)| m)
                    .ok_or_else(|| {
                        malformed(
                            i,
                            format!("unknown designator ESC {}", designator.escape_ascii()),
                        )
                    })?;
                i += 3;
                continue;
            }

            match mode {
                Mode::Ascii => {
                    if !b.is_ascii() {
                        return Err(malformed(i, format!("byte 0x{b:02X} in single-byte mode")));
                    }
                    out.push(char::from(b));
                }
                Mode::Katakana => match b {
                    0x21..=0x5F => {
                        out.push(char::from_u32(u32::from(b) + KATAKANA_OFFSET).unwrap_or('\0'))
                    }
                    b'\r' | b'\n' => out.push(char::from(b)),
                    _ => {
                        return Err(malformed(i, format!("byte 0x{b:02X} in katakana mode")));
                    }
                },
                Mode::Jis(revision) => match pending.take() {
                    Some((_, lead)) => out.push(decode_pair(lead, b, revision)),
                    None if b == b'\r' || b == b'\n' => out.push(char::from(b)),
                    None => pending = Some((i, b)),
                },
            }
            i += 1;
        }

        if let Some((offset, _)) = pending {
            return Err(malformed(offset, "input ends inside a two-byte character"));
        }
        Ok(out)
    }
}

impl Codec for Iso2022JpMs {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, DecodeError> {
        Self::decode_bytes(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::ISO_2022_JP;

    fn decode(bytes: &[u8]) -> Result<String, DecodeError> {
        Iso2022JpMs::decode_bytes(bytes)
    }

    #[test]
    fn test_plain_ascii_without_escape() {
        assert_eq!(decode(b"Hello, world\r\n").unwrap(), "Hello, world\r\n");
        assert!(decode(&[b'a', 0x80]).is_err());
    }

    #[test]
    fn test_jis_roman_and_latin_read_as_ascii() {
        assert_eq!(decode(b"\x1b(Jabc\x1b(Hxyz\x1b(B!").unwrap(), "abcxyz!");
    }

    #[test]
    fn test_katakana_mode() {
        // ESC ( I 0x31 0x32 -> half-width A, I
        let out = decode(b"\x1b(I\x31\x32\r\n\x1b(B").unwrap();
        assert_eq!(out, "\u{FF71}\u{FF72}\r\n");
        assert!(decode(b"\x1b(I\x60").is_err());
    }

    #[test]
    fn test_jis1990_hiragana() {
        assert_eq!(decode(b"\x1b$B\x24\x22\x24\x24\x1b(B").unwrap(), "あい");
    }

    #[test]
    fn test_jis1978_ideographic_space() {
        assert_eq!(decode(b"\x1b$@\x21\x21\x1b(B").unwrap(), "\u{3000}");
    }

    #[test]
    fn test_jis1978_uses_swapped_kanji() {
        let old = decode(b"\x1b$@\x30\x33\x1b(B").unwrap();
        let new_partner = decode(b"\x1b$B\x72\x4d\x1b(B").unwrap();
        let new_same = decode(b"\x1b$B\x30\x33\x1b(B").unwrap();
        assert_eq!(old, new_partner);
        assert_ne!(old, new_same);
    }

    #[test]
    fn test_nec_special_characters() {
        // Circled digit one, roman numeral one
        assert_eq!(decode(b"\x1b$B\x2d\x21\x2d\x35\x1b(B").unwrap(), "①Ⅰ");
    }

    #[test]
    fn test_line_breaks_inside_two_byte_mode() {
        let out = decode(b"\x1b$B\x24\x22\r\n\x24\x24\x1b(B").unwrap();
        assert_eq!(out, "あ\r\nい");
    }

    #[test]
    fn test_out_of_range_pair_is_null() {
        assert_eq!(decode(b"\x1b$B\x2a\x21\x1b(B").unwrap(), "\0");
    }

    #[test]
    fn test_unknown_designator() {
        match decode(b"ab\x1b(Zcd") {
            Err(DecodeError::MalformedLegacySequence { offset, .. }) => assert_eq!(offset, 2),
            other => panic!("expected malformed sequence, got {other:?}"),
        }
    }

    #[test]
    fn test_truncated_sequences() {
        assert!(decode(b"\x1b$").is_err());
        assert!(decode(b"\x1b$B\x24").is_err());
        assert!(decode(b"\x1b$B\x24\x1b(B").is_err());
    }

    #[test]
    fn test_reads_standard_iso_2022_jp_output() {
        let text = "日本語のメール本文です。\nSecond line, ASCII only.";
        let (encoded, _, had_errors) = ISO_2022_JP.encode(text);
        assert!(!had_errors);
        assert_eq!(decode(&encoded).unwrap(), text);
    }

    #[test]
    fn test_codec_trait() {
        let codec = Iso2022JpMs;
        assert_eq!(codec.name(), "iso-2022-jp-ms");
        assert_eq!(codec.decode(b"plain").unwrap(), "plain");
    }
}
