//! MIME walking and body extraction.
//!
//! `mailparse` does the multipart split and transfer decoding; this module
//! flattens the tree into [`RawPart`]s and turns them into a [`Body`],
//! an attachment list and the inline images.

use mailparse::{parse_mail, ParsedMail};
use tracing::{debug, debug_span, warn};

use crate::charset::CharsetDecoder;
use crate::error::Result;
use crate::model::mail::{Body, DecodeFailure};
use crate::model::part::{Payload, RawPart};
use crate::parser::clean::{clean_body, CleanFn};
use crate::parser::header::HeaderDecoder;

/// Maximum nesting of multipart and `message/rfc822` containers.
const MAX_DEPTH: usize = 32;

/// Parse a complete raw message (headers + body).
///
/// A leading UTF-8 BOM and mbox `From ` separator line are skipped.
pub fn parse_message(raw_message: &[u8]) -> Result<ParsedMail<'_>> {
    Ok(parse_mail(skip_from_line(raw_message))?)
}

/// Flatten a parsed message into its parts, in document order.
///
/// Containers appear as parts with an empty payload, followed by their
/// children. Attached `message/rfc822` parts are descended into.
pub fn walk_parts(mail: &ParsedMail<'_>) -> Vec<RawPart> {
    let mut parts = Vec::new();
    collect_parts(mail, &mut parts, 0);
    parts
}

fn collect_parts(mail: &ParsedMail<'_>, parts: &mut Vec<RawPart>, depth: usize) {
    if depth > MAX_DEPTH {
        warn!(depth, "MIME nesting too deep, ignoring remaining parts");
        return;
    }

    let content_type = mail.ctype.mimetype.trim().to_ascii_lowercase();
    let declared_charset = mail.ctype.params.get("charset").cloned();

    if content_type.starts_with("multipart/") {
        parts.push(RawPart {
            content_type,
            declared_charset: None,
            payload: Payload::Bytes(Vec::new()),
            filename: None,
        });
        for sub in &mail.subparts {
            collect_parts(sub, parts, depth + 1);
        }
        return;
    }

    let payload = mail.get_body_raw().unwrap_or_else(|e| {
        warn!(content_type = %content_type, error = %e, "Cannot transfer-decode part body");
        Vec::new()
    });
    let filename = part_filename(mail);

    if content_type == "message/rfc822" && filename.is_none() {
        parts.push(RawPart {
            content_type,
            declared_charset: None,
            payload: Payload::Bytes(Vec::new()),
            filename: None,
        });
        match parse_mail(&payload) {
            Ok(inner) => collect_parts(&inner, parts, depth + 1),
            Err(e) => debug!(error = %e, "Cannot parse attached message"),
        }
        return;
    }

    parts.push(RawPart {
        content_type,
        declared_charset,
        payload: Payload::Bytes(payload),
        filename,
    });
}

/// Filename from `Content-Disposition`, else the `name` content-type parameter.
fn part_filename(mail: &ParsedMail<'_>) -> Option<String> {
    mail.get_content_disposition()
        .params
        .get("filename")
        .cloned()
        .or_else(|| mail.ctype.params.get("name").cloned())
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
}

/// What the body extractor found in one message.
#[derive(Debug, Clone, Default)]
pub struct ExtractedBody {
    pub body: Body,
    pub attachments: Vec<String>,
    pub images: Vec<Vec<u8>>,
    pub is_multipart: bool,
    pub removed_url_count: usize,
    pub removed_address_count: usize,
    pub failures: Vec<DecodeFailure>,
}

/// Classifies parts and decodes the text ones.
pub struct BodyExtractor<'a> {
    charset: &'a CharsetDecoder,
    filenames: HeaderDecoder<'a>,
    content_type_filter: Option<&'a [String]>,
    auto_clean: bool,
    hook: Option<&'a CleanFn>,
}

impl<'a> BodyExtractor<'a> {
    pub fn new(charset: &'a CharsetDecoder) -> Self {
        Self {
            charset,
            filenames: HeaderDecoder::new(charset).with_cleaning(false, None),
            content_type_filter: None,
            auto_clean: true,
            hook: None,
        }
    }

    /// Only decode text parts whose content type is listed.
    pub fn with_content_type_filter(mut self, filter: Option<&'a [String]>) -> Self {
        self.content_type_filter = filter;
        self
    }

    pub fn with_cleaning(mut self, auto_clean: bool, hook: Option<&'a CleanFn>) -> Self {
        self.auto_clean = auto_clean;
        self.hook = hook;
        self
    }

    /// Classify `parts` and assemble the body.
    pub fn extract(&self, parts: Vec<RawPart>) -> ExtractedBody {
        let mut out = ExtractedBody::default();

        for part in parts {
            let _span = debug_span!("part", content_type = %part.content_type).entered();

            if part.is_multipart() {
                out.is_multipart = true;
            } else if part.is_image() {
                out.images.push(part.payload.into_bytes());
            } else if let Some(filename) = part.filename.as_deref() {
                out.attachments.push(self.decode_filename(filename, &mut out.failures));
            } else if !self.accepts(&part.content_type) {
                debug!("Skipping filtered content type");
            } else if part.content_type == "text/plain" {
                let text = self.decode_text(&part, &mut out.failures);
                append(&mut out.body.plain, text);
            } else if part.content_type == "text/html" {
                let text = self.decode_text(&part, &mut out.failures);
                append(&mut out.body.html, text);
            }
        }

        if self.auto_clean {
            for slot in [&mut out.body.plain, &mut out.body.html] {
                if let Some(text) = slot.as_mut() {
                    let cleaned = clean_body(text, self.hook);
                    out.removed_url_count += cleaned.removed_url_count;
                    out.removed_address_count += cleaned.removed_address_count;
                    *text = cleaned.value;
                }
            }
        }
        out
    }

    fn accepts(&self, content_type: &str) -> bool {
        self.content_type_filter.is_none_or(|filter| {
            filter
                .iter()
                .any(|allowed| allowed.trim().eq_ignore_ascii_case(content_type))
        })
    }

    /// Decode one text part. A failed part contributes empty text.
    fn decode_text(&self, part: &RawPart, failures: &mut Vec<DecodeFailure>) -> String {
        let declared = part.declared_charset.as_deref();
        let bytes = match &part.payload {
            Payload::Bytes(bytes) => bytes.as_slice(),
            Payload::Text(text) => text.as_bytes(),
        };
        let failure = |error| {
            DecodeFailure::new("body", declared, Some(&part.content_type), bytes, error)
        };

        match self.charset.decode_payload(&part.payload, declared) {
            Ok(result) => {
                if let Some(error) = result.failure_reason {
                    failures.push(failure(error));
                }
                result.text
            }
            Err(error) => {
                failures.push(failure(error));
                String::new()
            }
        }
    }

    /// Filenames may still carry encoded words `mailparse` left alone.
    fn decode_filename(&self, filename: &str, failures: &mut Vec<DecodeFailure>) -> String {
        if !filename.contains("=?") {
            return filename.to_string();
        }
        match self.filenames.decode_header("filename", Some(filename.as_bytes())) {
            Ok(Some(decoded)) => {
                failures.extend(decoded.failures);
                decoded.value
            }
            Ok(None) => filename.to_string(),
            Err(failure) => {
                failures.push(failure);
                filename.to_string()
            }
        }
    }
}

fn append(slot: &mut Option<String>, text: String) {
    match slot {
        Some(existing) => {
            existing.push('\n');
            existing.push_str(&text);
        }
        None => *slot = Some(text),
    }
}

/// Skip a UTF-8 BOM and a leading `From ` separator line.
fn skip_from_line(data: &[u8]) -> &[u8] {
    let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);

    if data.starts_with(b"From ") {
        if let Some(pos) = data.iter().position(|&b| b == b'\n') {
            return &data[pos + 1..];
        }
    }
    data
}
