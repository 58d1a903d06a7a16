//! Header field decoding: unfolding, encoded words (RFC 2047) and dates.
//!
//! Works on the raw header bytes rather than a pre-decoded string so that
//! 8-bit header text in a legacy charset can still go through detection.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use tracing::debug;

use crate::charset::CharsetDecoder;
use crate::model::mail::DecodeFailure;
use crate::parser::clean::{clean_header, CleanFn};

/// Base64 for encoded words: padding optional, trailing bits tolerated.
const WORD_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new()
        .with_decode_padding_mode(DecodePaddingMode::Indifferent)
        .with_decode_allow_trailing_bits(true),
);

/// A run of a header value, split on encoded-word boundaries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderPiece {
    /// Literal header bytes (usually ASCII, sometimes raw 8-bit text).
    Plain(Vec<u8>),
    /// Payload of one or more adjacent encoded words in the same charset.
    Encoded { charset: String, bytes: Vec<u8> },
}

/// A decoded header and any piece that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedHeader {
    pub value: String,
    /// Pieces replaced by empty text under the `warn`/`ignore` policies.
    pub failures: Vec<DecodeFailure>,
}

/// Remove folding line breaks, keeping the whitespace that follows them.
pub fn unfold(raw: &[u8]) -> Vec<u8> {
    raw.iter()
        .copied()
        .filter(|&b| b != b'\r' && b != b'\n')
        .collect()
}

/// Split a header value into plain runs and encoded words.
///
/// Whitespace between two encoded words is dropped (RFC 2047 §6.2) and the
/// payloads of adjacent words sharing a charset are concatenated before any
/// charset decoding, so a character split across two words survives.
/// Malformed encoded words are kept as plain text.
pub fn split_encoded_words(raw: &[u8]) -> Vec<HeaderPiece> {
    let mut pieces: Vec<HeaderPiece> = Vec::new();
    let mut remaining = raw;
    let mut last_was_encoded = false;

    let push_plain = |pieces: &mut Vec<HeaderPiece>, bytes: &[u8]| {
        if bytes.is_empty() {
            return;
        }
        match pieces.last_mut() {
            Some(HeaderPiece::Plain(prev)) => prev.extend_from_slice(bytes),
            _ => pieces.push(HeaderPiece::Plain(bytes.to_vec())),
        }
    };

    while let Some(start) = find(remaining, b"=?") {
        let before = &remaining[..start];
        let gap_is_blank = before.iter().all(|b| b.is_ascii_whitespace());

        match try_decode_one_word(&remaining[start + 2..]) {
            Some(word) => {
                if !(last_was_encoded && gap_is_blank) {
                    push_plain(&mut pieces, before);
                }
                let merge = last_was_encoded
                    && gap_is_blank
                    && matches!(
                        pieces.last(),
                        Some(HeaderPiece::Encoded { charset, .. })
                            if charset.eq_ignore_ascii_case(&word.charset)
                    );
                if merge {
                    if let Some(HeaderPiece::Encoded { bytes, .. }) = pieces.last_mut() {
                        bytes.extend_from_slice(&word.bytes);
                    }
                } else {
                    pieces.push(HeaderPiece::Encoded {
                        charset: word.charset,
                        bytes: word.bytes,
                    });
                }
                remaining = &remaining[start + 2 + word.consumed..];
                last_was_encoded = true;
            }
            None => {
                push_plain(&mut pieces, &remaining[..start + 2]);
                remaining = &remaining[start + 2..];
                last_was_encoded = false;
            }
        }
    }

    push_plain(&mut pieces, remaining);
    pieces
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

struct DecodedWord {
    charset: String,
    bytes: Vec<u8>,
    consumed: usize, // bytes consumed *after* the initial "=?"
}

fn try_decode_one_word(s: &[u8]) -> Option<DecodedWord> {
    // Format: charset?encoding?encoded_text?=
    let first_q = s.iter().position(|&b| b == b'?')?;
    let charset = std::str::from_utf8(&s[..first_q]).ok()?;
    // RFC 2231 language suffix: charset*lang
    let charset = charset.split('*').next().unwrap_or(charset);
    if charset.is_empty() || charset.bytes().any(|b| b.is_ascii_whitespace()) {
        return None;
    }

    let rest = &s[first_q + 1..];
    let second_q = rest.iter().position(|&b| b == b'?')?;
    let encoding = &rest[..second_q];

    let rest2 = &rest[second_q + 1..];
    let end = find(rest2, b"?=")?;
    let encoded_text = &rest2[..end];
    if encoded_text.iter().any(|&b| b == b' ') {
        return None;
    }

    let bytes = match encoding {
        b"B" | b"b" => {
            let compact: Vec<u8> = encoded_text
                .iter()
                .copied()
                .filter(|b| !b.is_ascii_whitespace())
                .collect();
            WORD_BASE64.decode(compact).ok()?
        }
        b"Q" | b"q" => decode_q_encoding(encoded_text),
        _ => return None,
    };

    Some(DecodedWord {
        charset: charset.to_string(),
        bytes,
        consumed: first_q + 1 + second_q + 1 + end + 2,
    })
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
pub fn decode_q_encoding(input: &[u8]) -> Vec<u8> {
    let mut result = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' => {
                let hex = input
                    .get(i + 1..i + 3)
                    .and_then(|h| std::str::from_utf8(h).ok())
                    .and_then(|h| u8::from_str_radix(h, 16).ok());
                match hex {
                    Some(byte) => {
                        result.push(byte);
                        i += 3;
                    }
                    None => {
                        result.push(b'=');
                        i += 1;
                    }
                }
            }
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    result
}

/// Turns raw header values into clean text.
#[derive(Clone, Copy)]
pub struct HeaderDecoder<'a> {
    charset: &'a CharsetDecoder,
    auto_clean: bool,
    hook: Option<&'a CleanFn>,
}

impl<'a> HeaderDecoder<'a> {
    pub fn new(charset: &'a CharsetDecoder) -> Self {
        Self {
            charset,
            auto_clean: true,
            hook: None,
        }
    }

    /// Enable or disable header cleaning, with an optional custom step.
    pub fn with_cleaning(mut self, auto_clean: bool, hook: Option<&'a CleanFn>) -> Self {
        self.auto_clean = auto_clean;
        self.hook = hook;
        self
    }

    /// Decode one header value.
    ///
    /// `None` in, `None` out: a missing header never becomes an empty
    /// string. Under the `raise` policy the first piece that cannot be
    /// decoded aborts the field.
    pub fn decode_header(
        &self,
        field: &str,
        raw: Option<&[u8]>,
    ) -> Result<Option<DecodedHeader>, DecodeFailure> {
        let Some(raw) = raw else {
            return Ok(None);
        };
        let unfolded = unfold(raw);
        let mut value = String::with_capacity(unfolded.len());
        let mut failures = Vec::new();

        for piece in split_encoded_words(unfolded.trim_ascii_start()) {
            let (bytes, declared) = match &piece {
                HeaderPiece::Plain(bytes) => match std::str::from_utf8(bytes) {
                    Ok(text) => {
                        value.push_str(text);
                        continue;
                    }
                    Err(_) => (bytes.as_slice(), None),
                },
                HeaderPiece::Encoded { charset, bytes } => (bytes.as_slice(), Some(charset.as_str())),
            };

            match self.charset.decode(bytes, declared) {
                Ok(result) => {
                    if let Some(error) = result.failure_reason {
                        failures.push(DecodeFailure::new(field, declared, None, bytes, error));
                    }
                    value.push_str(&result.text);
                }
                Err(error) => return Err(DecodeFailure::new(field, declared, None, bytes, error)),
            }
        }

        if self.auto_clean {
            value = clean_header(&value, self.hook);
        }
        Ok(Some(DecodedHeader { value, failures }))
    }
}

/// Parse an email date string in various common formats.
///
/// Supports RFC 2822, ISO 8601, and many broken real-world variants.
pub fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    let trimmed = date_str.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc2822(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }

    // Remove leading day-of-week: "Thu, " or "Thu "
    let no_dow = strip_day_of_week(trimmed);
    // Drop a trailing comment: "+0900 (JST)"
    let no_comment = strip_trailing_comment(&no_dow);
    // IMAP-style: "16-JUL-2025 03:01:03" → "16 Jul 2025 03:01:03"
    let normalized = normalize_imap_date(&no_comment);

    let formats = [
        "%d %b %Y %H:%M:%S %z",
        "%d %b %Y %H:%M:%S %Z",
        "%d %b %Y %H:%M:%S",
        "%d %b %Y %H:%M %z",
        "%b %d %H:%M:%S %Y",
        "%Y-%m-%dT%H:%M:%S%z",
        "%Y-%m-%dT%H:%M:%SZ",
        "%Y-%m-%d %H:%M:%S %z",
        "%Y-%m-%d %H:%M:%S",
        "%Y/%m/%d %H:%M:%S",
        "%d/%m/%Y %H:%M:%S",
        "%m/%d/%Y %H:%M:%S",
    ];

    for candidate in [&no_comment, &normalized] {
        for fmt in &formats {
            if let Ok(dt) = DateTime::parse_from_str(candidate, fmt) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(ndt) = NaiveDateTime::parse_from_str(candidate, fmt) {
                return Some(Utc.from_utc_datetime(&ndt));
            }
        }
    }

    for candidate in [&no_comment, &normalized] {
        let replaced = replace_named_tz(candidate);
        for fmt in &formats {
            if let Ok(dt) = DateTime::parse_from_str(&replaced, fmt) {
                return Some(dt.with_timezone(&Utc));
            }
        }
    }

    // mailparse's lenient RFC 2822 parser as last resort
    if let Some(dt) = mailparse::dateparse(trimmed)
        .ok()
        .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
    {
        return Some(dt);
    }

    debug!(date = trimmed, "Could not parse date");
    None
}

/// Normalize IMAP-style dates: `"16-JUL-2025 03:01:03"` → `"16 Jul 2025 03:01:03"`.
fn normalize_imap_date(s: &str) -> String {
    if !s.contains('-') {
        return s.to_string();
    }

    let title_months = [
        "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
    ];

    for month in title_months {
        for spelled in [month.to_uppercase(), month.to_lowercase(), month.to_string()] {
            let pattern = format!("-{spelled}-");
            if s.contains(&pattern) {
                return s.replacen(&pattern, &format!(" {month} "), 1);
            }
        }
    }

    s.to_string()
}

/// Strip leading day-of-week prefix (e.g. "Thu, " or "Thu ").
fn strip_day_of_week(s: &str) -> String {
    let days = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];
    for day in &days {
        if let Some(rest) = s.strip_prefix(day) {
            if rest.starts_with(',') || rest.starts_with(' ') {
                return rest.trim_start_matches(',').trim().to_string();
            }
        }
    }
    s.to_string()
}

/// Remove a parenthesized comment at the end (`"... +0900 (JST)"`).
fn strip_trailing_comment(s: &str) -> String {
    match (s.rfind('('), s.ends_with(')')) {
        (Some(open), true) => s[..open].trim_end().to_string(),
        _ => s.to_string(),
    }
}

/// Replace well-known timezone abbreviations with numeric offsets.
fn replace_named_tz(s: &str) -> String {
    let tzs = [
        ("CEST", "+0200"),
        ("EST", "-0500"),
        ("EDT", "-0400"),
        ("CST", "-0600"),
        ("CDT", "-0500"),
        ("MST", "-0700"),
        ("MDT", "-0600"),
        ("PST", "-0800"),
        ("PDT", "-0700"),
        ("GMT", "+0000"),
        ("UTC", "+0000"),
        ("CET", "+0100"),
        ("JST", "+0900"),
        ("KST", "+0900"),
    ];
    let mut result = s.to_string();
    for (name, offset) in &tzs {
        if result.ends_with(name) {
            let pos = result.len() - name.len();
            result.replace_range(pos.., offset);
            return result;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charset::FailurePolicy;
    use base64::engine::general_purpose::STANDARD;
    use encoding_rs::{ISO_2022_JP, SHIFT_JIS};

    fn decode(raw: &str) -> String {
        let charset = CharsetDecoder::default();
        HeaderDecoder::new(&charset)
            .decode_header("subject", Some(raw.as_bytes()))
            .unwrap()
            .unwrap()
            .value
    }

    #[test]
    fn test_decode_base64_encoded_word() {
        assert_eq!(decode("=?UTF-8?B?SG9sYSBtdW5kbw==?="), "Hola mundo");
    }

    #[test]
    fn test_decode_q_encoded_word() {
        assert_eq!(decode("=?ISO-8859-1?Q?caf=E9?="), "café");
        assert_eq!(decode("=?ISO-8859-1?Q?R=E9sum=E9_du_projet?="), "Résumé du projet");
    }

    #[test]
    fn test_decode_multiple_encoded_words() {
        assert_eq!(decode("=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="), "Hola mundo");
    }

    #[test]
    fn test_decode_mixed_plain_and_encoded() {
        assert_eq!(decode("Re: =?UTF-8?B?SG9sYQ==?= there"), "Re: Hola there");
    }

    #[test]
    fn test_decode_windows1252_encoded_word() {
        assert_eq!(decode("=?Windows-1252?Q?M=FCller?="), "Müller");
    }

    #[test]
    fn test_decode_utf8_base64_japanese() {
        assert_eq!(decode("=?UTF-8?B?5bGx55Sw5aSq6YOO?="), "山田太郎");
    }

    #[test]
    fn test_character_split_across_words() {
        let bytes = "価格".as_bytes();
        let raw = format!(
            "=?utf-8?B?{}?=\r\n =?UTF-8?B?{}?=",
            STANDARD.encode(&bytes[..2]),
            STANDARD.encode(&bytes[2..])
        );
        assert_eq!(decode(&raw), "価格");
    }

    #[test]
    fn test_iso_2022_jp_subject() {
        let (jis, _, _) = ISO_2022_JP.encode("会議のお知らせ");
        let raw = format!("=?ISO-2022-JP?B?{}?=", STANDARD.encode(&jis));
        assert_eq!(decode(&raw), "会議のお知らせ");
    }

    #[test]
    fn test_raw_8bit_header_goes_through_detection() {
        let (sjis, _, _) = SHIFT_JIS.encode("見積書の送付について（ご確認のお願い）");
        let charset = CharsetDecoder::default();
        let decoded = HeaderDecoder::new(&charset)
            .decode_header("subject", Some(&sjis))
            .unwrap()
            .unwrap();
        assert_eq!(decoded.value, "見積書の送付について（ご確認のお願い）");
        assert!(decoded.failures.is_empty());
    }

    #[test]
    fn test_missing_header_is_none() {
        let charset = CharsetDecoder::default();
        let header = HeaderDecoder::new(&charset);
        assert_eq!(header.decode_header("cc", None).unwrap(), None);
        let empty = header.decode_header("cc", Some(b"")).unwrap().unwrap();
        assert_eq!(empty.value, "");
    }

    #[test]
    fn test_malformed_word_kept_as_text() {
        assert_eq!(decode("=?utf-8?X?abc?= and =?broken"), "=?utf-8?X?abc?= and =?broken");
    }

    #[test]
    fn test_cleaning_can_be_disabled() {
        let charset = CharsetDecoder::default();
        let raw = b"Hello\r\n   world https://example.com";
        let cleaned = HeaderDecoder::new(&charset)
            .decode_header("subject", Some(raw))
            .unwrap()
            .unwrap();
        assert_eq!(cleaned.value, "Hello world");
        let kept = HeaderDecoder::new(&charset)
            .with_cleaning(false, None)
            .decode_header("subject", Some(raw))
            .unwrap()
            .unwrap();
        assert_eq!(kept.value, "Hello   world https://example.com");
    }

    #[test]
    fn test_uncleaned_value_keeps_decoded_spaces() {
        let charset = CharsetDecoder::default();
        let decoder = HeaderDecoder::new(&charset).with_cleaning(false, None);
        let padded = decoder
            .decode_header("subject", Some(b"=?UTF-8?B?IGEgYiA=?="))
            .unwrap()
            .unwrap();
        assert_eq!(padded.value, " a b ");
        assert_eq!(decode("=?UTF-8?B?IGEgYiA=?="), "a b");
    }

    #[test]
    fn test_undecodable_word_under_each_policy() {
        let raw = b"=?x-bogus?Q?=FF=FE=FD?= tail";
        let detector = std::sync::Arc::new(NoGuess);

        let ignore = CharsetDecoder::default()
            .with_detector(detector.clone())
            .with_trial_charsets(["utf-8"])
            .with_policy(FailurePolicy::Ignore);
        let decoded = HeaderDecoder::new(&ignore)
            .decode_header("subject", Some(raw))
            .unwrap()
            .unwrap();
        assert_eq!(decoded.value, "tail");
        assert_eq!(decoded.failures.len(), 1);
        assert_eq!(decoded.failures[0].declared_charset.as_deref(), Some("x-bogus"));

        let raise = ignore.clone().with_policy(FailurePolicy::Raise);
        let failure = HeaderDecoder::new(&raise)
            .decode_header("subject", Some(raw))
            .unwrap_err();
        assert_eq!(failure.field, "subject");
    }

    #[derive(Debug)]
    struct NoGuess;

    impl crate::charset::Detector for NoGuess {
        fn detect(&self, _bytes: &[u8]) -> Option<String> {
            None
        }
    }

    #[test]
    fn test_split_pieces() {
        let pieces = split_encoded_words(b"Re: =?a?Q?x?= =?A?Q?y?= z");
        assert_eq!(
            pieces,
            vec![
                HeaderPiece::Plain(b"Re: ".to_vec()),
                HeaderPiece::Encoded {
                    charset: "a".into(),
                    bytes: b"xy".to_vec()
                },
                HeaderPiece::Plain(b" z".to_vec()),
            ]
        );
    }

    #[test]
    fn test_parse_date_rfc2822() {
        let dt = parse_date("Thu, 04 Jan 2024 10:00:00 +0000").unwrap();
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "2024-01-04");
    }

    #[test]
    fn test_parse_date_with_comment() {
        let dt = parse_date("Thu, 4 Jan 2024 19:00:00 +0900 (JST)").unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M").to_string(), "2024-01-04 10:00");
    }

    #[test]
    fn test_parse_date_named_tz() {
        assert!(parse_date("Thu, 04 Jan 2024 10:00:00 EST").is_some());
    }

    #[test]
    fn test_parse_date_iso8601() {
        assert!(parse_date("2024-01-04T10:00:00Z").is_some());
    }

    #[test]
    fn test_parse_date_imap_style() {
        let dt = parse_date("16-JUL-2025 03:01:03").unwrap();
        assert_eq!(dt.format("%Y-%m-%d").to_string(), "2025-07-16");
        assert!(parse_date("14-AUG-2025 02:01:35 +0000").is_some());
    }

    #[test]
    fn test_parse_date_garbage() {
        assert!(parse_date("").is_none());
    }

    #[test]
    fn test_normalize_imap_date() {
        assert_eq!(normalize_imap_date("16-JUL-2025 03:01:03"), "16 Jul 2025 03:01:03");
        assert_eq!(normalize_imap_date("04 Jan 2024 10:00:00"), "04 Jan 2024 10:00:00");
    }
}
