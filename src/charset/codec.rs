//! Codec registry: maps charset labels to strict decoders.
//!
//! Every codec here is strict. A codec either returns the full text or an
//! error, never a string with replacement characters, so that the charset
//! decoder can move on to the next candidate.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use encoding_rs::{Encoding, REPLACEMENT, SHIFT_JIS, UTF_8};

use crate::charset::iso2022jp_ms::Iso2022JpMs;
use crate::error::DecodeError;

/// A strict byte-to-text decoder.
pub trait Codec: Send + Sync + fmt::Debug {
    /// Name reported as the encoding actually used.
    fn name(&self) -> &str;

    /// Decode the whole input or fail.
    fn decode(&self, bytes: &[u8]) -> Result<String, DecodeError>;
}

/// Any WHATWG encoding, decoded without replacement.
#[derive(Debug, Clone)]
pub struct EncodingRsCodec {
    name: String,
    encoding: &'static Encoding,
}

impl EncodingRsCodec {
    pub fn new(encoding: &'static Encoding) -> Self {
        Self {
            name: encoding.name().to_ascii_lowercase(),
            encoding,
        }
    }

    /// Same decoder under a different reported name.
    pub fn named(name: &str, encoding: &'static Encoding) -> Self {
        Self {
            name: name.to_string(),
            encoding,
        }
    }
}

impl Codec for EncodingRsCodec {
    fn name(&self) -> &str {
        &self.name
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, DecodeError> {
        let bytes = match Encoding::for_bom(bytes) {
            Some((encoding, bom_len)) if encoding == self.encoding => &bytes[bom_len..],
            _ => bytes,
        };
        self.encoding
            .decode_without_bom_handling_and_without_replacement(bytes)
            .map(|text| text.into_owned())
            .ok_or_else(|| DecodeError::Malformed {
                encoding: self.name.clone(),
            })
    }
}

/// 7-bit US-ASCII.
#[derive(Debug, Default, Clone, Copy)]
pub struct AsciiCodec;

impl Codec for AsciiCodec {
    fn name(&self) -> &str {
        "us-ascii"
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, DecodeError> {
        if bytes.is_ascii() {
            Ok(bytes.iter().map(|&b| char::from(b)).collect())
        } else {
            Err(DecodeError::Malformed {
                encoding: "us-ascii".to_string(),
            })
        }
    }
}

/// Shift_JIS limited to JIS X 0208.
///
/// `encoding_rs` treats Shift_JIS as Windows-31J, so this codec refuses
/// the vendor lead bytes first. Text using NEC or IBM characters then fails
/// here and succeeds under `cp932`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StrictShiftJisCodec;

impl StrictShiftJisCodec {
    /// Lead bytes of NEC row 13, the NEC-selected IBM rows, the
    /// user-defined area and the IBM extension rows.
    fn is_vendor_lead(b: u8) -> bool {
        matches!(b, 0x87 | 0xED | 0xEE | 0xF0..=0xFC)
    }

    fn is_lead(b: u8) -> bool {
        matches!(b, 0x81..=0x9F | 0xE0..=0xFC)
    }
}

impl Codec for StrictShiftJisCodec {
    fn name(&self) -> &str {
        "shift_jis"
    }

    fn decode(&self, bytes: &[u8]) -> Result<String, DecodeError> {
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            if Self::is_vendor_lead(b) {
                return Err(DecodeError::Malformed {
                    encoding: self.name().to_string(),
                });
            }
            i += if Self::is_lead(b) { 2 } else { 1 };
        }
        SHIFT_JIS
            .decode_without_bom_handling_and_without_replacement(bytes)
            .map(|text| text.into_owned())
            .ok_or_else(|| DecodeError::Malformed {
                encoding: self.name().to_string(),
            })
    }
}

/// Normalize a charset label for alias lookups.
///
/// Trims whitespace and quotes, lowercases, and treats `_` and `-` alike.
pub fn normalize_label(label: &str) -> String {
    label
        .trim()
        .trim_matches(|c| c == '"' || c == '\'')
        .trim()
        .to_ascii_lowercase()
        .replace('_', "-")
}

/// Label-to-codec table.
///
/// Explicit aliases win; anything else falls back to the WHATWG label list
/// known to `encoding_rs`.
#[derive(Clone, Default)]
pub struct CodecTable {
    codecs: Vec<Arc<dyn Codec>>,
    aliases: HashMap<String, usize>,
}

impl fmt::Debug for CodecTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecTable")
            .field("codecs", &self.codecs.iter().map(|c| c.name()).collect::<Vec<_>>())
            .field("aliases", &self.aliases.len())
            .finish()
    }
}

impl CodecTable {
    /// A table with no explicit aliases (only the WHATWG fallback).
    pub fn empty() -> Self {
        Self::default()
    }

    /// The table used for mail archives: UTF-8, ASCII, the Japanese family
    /// and the ISO-2022-JP-MS codec.
    pub fn standard() -> Self {
        let mut table = Self::empty();
        table.register(
            Arc::new(EncodingRsCodec::named("utf-8", UTF_8)),
            &["utf-8", "utf8", "unicode-1-1-utf-8"],
        );
        table.register(
            Arc::new(AsciiCodec),
            &["us-ascii", "ascii", "ansi_x3.4-1968", "iso646-us", "csascii"],
        );
        table.register(
            Arc::new(StrictShiftJisCodec),
            &["shift_jis", "shift-jis", "shiftjis", "sjis", "x-sjis", "csshiftjis"],
        );
        table.register(
            Arc::new(EncodingRsCodec::named("cp932", SHIFT_JIS)),
            &["cp932", "windows-31j", "ms932", "ms_kanji", "x-ms-cp932", "mskanji"],
        );
        table.register(
            Arc::new(EncodingRsCodec::named("iso-2022-jp", encoding_rs::ISO_2022_JP)),
            &["iso-2022-jp", "iso2022-jp", "iso2022jp", "csiso2022jp"],
        );
        table.register(
            Arc::new(EncodingRsCodec::named("euc-jp", encoding_rs::EUC_JP)),
            &["euc-jp", "eucjp", "ujis", "x-euc-jp", "cseucpkdfmtjapanese"],
        );
        table.install_iso2022jp_ms();
        table
    }

    /// Register the ISO-2022-JP-MS codec under all its aliases.
    ///
    /// Idempotent: a second call leaves the table unchanged.
    pub fn install_iso2022jp_ms(&mut self) {
        if self.aliases.contains_key(&normalize_label(Iso2022JpMs::NAME)) {
            return;
        }
        self.register(Arc::new(Iso2022JpMs), &Iso2022JpMs::ALIASES);
    }

    /// Register `codec` under `aliases`. Later registrations win.
    pub fn register(&mut self, codec: Arc<dyn Codec>, aliases: &[&str]) {
        let slot = self.codecs.len();
        self.codecs.push(codec);
        for alias in aliases {
            self.aliases.insert(normalize_label(alias), slot);
        }
    }

    /// Resolve a label to a codec.
    pub fn lookup(&self, label: &str) -> Option<Arc<dyn Codec>> {
        if let Some(&slot) = self.aliases.get(&normalize_label(label)) {
            return self.codecs.get(slot).cloned();
        }
        let trimmed = label.trim().trim_matches(|c| c == '"' || c == '\'');
        Encoding::for_label(trimmed.as_bytes())
            .or_else(|| Encoding::for_label(normalize_label(trimmed).as_bytes()))
            .filter(|enc| *enc != REPLACEMENT)
            .map(|enc| Arc::new(EncodingRsCodec::new(enc)) as Arc<dyn Codec>)
    }

    /// Whether `label` resolves to any codec.
    pub fn is_known(&self, label: &str) -> bool {
        self.lookup(label).is_some()
    }
}
