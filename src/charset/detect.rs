//! Charset detection for unlabeled or mislabeled payloads.

use std::fmt;

use chardetng::EncodingDetector;
use encoding_rs::UTF_8;

/// Guesses the charset of a byte sequence.
///
/// Returns a label understood by [`CodecTable`](super::codec::CodecTable), or
/// `None` when there is no usable guess.
pub trait Detector: Send + Sync + fmt::Debug {
    fn detect(&self, bytes: &[u8]) -> Option<String>;
}

/// Default detector: byte-order marks, 7-bit escapes, UTF-8 validation and
/// finally the statistical guess of `chardetng`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatisticalDetector;

impl StatisticalDetector {
    fn bom(bytes: &[u8]) -> Option<&'static str> {
        if bytes.starts_with(b"\xEF\xBB\xBF") {
            Some("utf-8")
        } else if bytes.starts_with(b"\xFF\xFE") {
            Some("utf-16le")
        } else if bytes.starts_with(b"\xFE\xFF") {
            Some("utf-16be")
        } else {
            None
        }
    }

    /// 7-bit data carrying a JIS X 0208 or katakana designator.
    fn looks_like_iso2022jp(bytes: &[u8]) -> bool {
        bytes.is_ascii()
            && [b"\x1b$B", b"\x1b$@", b"\x1b(I"]
                .iter()
                .any(|seq| bytes.windows(3).any(|w| w == &seq[..]))
    }
}

impl Detector for StatisticalDetector {
    fn detect(&self, bytes: &[u8]) -> Option<String> {
        if bytes.is_empty() {
            return None;
        }
        if let Some(label) = Self::bom(bytes) {
            return Some(label.to_string());
        }
        if Self::looks_like_iso2022jp(bytes) {
            return Some("iso-2022-jp".to_string());
        }
        if bytes.is_ascii() {
            return Some("us-ascii".to_string());
        }
        if std::str::from_utf8(bytes).is_ok() {
            return Some("utf-8".to_string());
        }

        let mut detector = EncodingDetector::new();
        detector.feed(bytes, true);
        let (encoding, confident) = detector.guess_assess(None, true);
        // A non-confident UTF-8 answer is chardetng's way of saying "no idea"
        if confident || encoding != UTF_8 {
            Some(encoding.name().to_string())
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use encoding_rs::SHIFT_JIS;

    #[test]
    fn test_empty_input() {
        assert_eq!(StatisticalDetector.detect(b""), None);
    }

    #[test]
    fn test_ascii_and_utf8() {
        assert_eq!(StatisticalDetector.detect(b"plain text").as_deref(), Some("us-ascii"));
        assert_eq!(
            StatisticalDetector.detect("こんにちは".as_bytes()).as_deref(),
            Some("utf-8")
        );
    }

    #[test]
    fn test_bom() {
        assert_eq!(
            StatisticalDetector.detect(b"\xEF\xBB\xBFhi").as_deref(),
            Some("utf-8")
        );
        assert_eq!(
            StatisticalDetector.detect(b"\xFF\xFEh\x00").as_deref(),
            Some("utf-16le")
        );
    }

    #[test]
    fn test_iso_2022_jp_escape() {
        assert_eq!(
            StatisticalDetector.detect(b"\x1b$B\x24\x22\x1b(B").as_deref(),
            Some("iso-2022-jp")
        );
    }

    #[test]
    fn test_shift_jis_sentence() {
        let text = "お世話になっております。来週の打ち合わせの件でご連絡いたしました。\
                    資料は添付ファイルをご確認ください。よろしくお願いいたします。";
        let (bytes, _, _) = SHIFT_JIS.encode(text);
        let guess = StatisticalDetector.detect(&bytes);
        assert_eq!(guess.as_deref(), Some("Shift_JIS"));
    }
}
