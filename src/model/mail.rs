//! Per-message output record.

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::address::EmailAddress;
use crate::error::DecodeError;

/// Value of the `Date:` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum RecordDate {
    /// Parsed and normalized to UTC.
    Parsed(DateTime<Utc>),
    /// Unparseable; the decoded header text as found.
    Raw(String),
}

impl fmt::Display for RecordDate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parsed(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S%:z")),
            Self::Raw(s) => f.write_str(s),
        }
    }
}

/// Decoded text bodies of a message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Body {
    /// All `text/plain` parts, joined with a newline.
    pub plain: Option<String>,
    /// All `text/html` parts, joined with a newline.
    pub html: Option<String>,
}

impl Body {
    /// The plain body if it has content, else the HTML one.
    pub fn preferred(&self) -> &str {
        match (self.plain.as_deref(), self.html.as_deref()) {
            (Some(plain), _) if !plain.is_empty() => plain,
            (_, Some(html)) => html,
            (Some(plain), None) => plain,
            (None, None) => "",
        }
    }
}

/// A header field or body part that could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, thiserror::Error)]
#[error("{field}: {error}")]
pub struct DecodeFailure {
    /// Header name, or `body` for a body part.
    pub field: String,
    pub declared_charset: Option<String>,
    /// Content type of the failing body part.
    pub content_type: Option<String>,
    /// Leading bytes of the payload, escaped.
    pub byte_prefix: String,
    #[serde(serialize_with = "serialize_display")]
    pub error: DecodeError,
}

impl DecodeFailure {
    const PREFIX_LEN: usize = 48;

    pub fn new(
        field: impl Into<String>,
        declared_charset: Option<&str>,
        content_type: Option<&str>,
        bytes: &[u8],
        error: DecodeError,
    ) -> Self {
        let prefix = &bytes[..bytes.len().min(Self::PREFIX_LEN)];
        Self {
            field: field.into(),
            declared_charset: declared_charset.map(str::to_string),
            content_type: content_type.map(str::to_string),
            byte_prefix: prefix.escape_ascii().to_string(),
            error,
        }
    }
}

fn serialize_display<S: serde::Serializer>(
    value: &DecodeError,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

/// One row of output: everything extracted from a single message.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MessageRecord {
    /// Position of the message within the run (0, 1, 2, …).
    pub index: u64,
    /// Archive file the message was read from.
    pub source: Option<PathBuf>,

    /// Every header in message order, decoded. Undecodable values are empty.
    pub headers: Vec<(String, String)>,

    pub subject: Option<String>,
    pub date: Option<RecordDate>,
    pub to_header: Option<String>,
    pub cc_header: Option<String>,
    pub from_header: Option<String>,
    pub to: Vec<EmailAddress>,
    pub cc: Vec<EmailAddress>,
    pub from: Vec<EmailAddress>,

    pub body: Body,
    pub attach_file_list: Vec<String>,
    pub image_count: usize,

    pub is_multipart: bool,
    pub has_file: bool,
    pub has_image: bool,
    pub has_delivered_to: bool,

    /// URLs replaced by the body cleaner.
    pub removed_url_count: usize,
    /// Email addresses replaced by the body cleaner.
    pub removed_address_count: usize,

    pub failures: Vec<DecodeFailure>,
}

impl MessageRecord {
    pub fn decode_failures(&self) -> usize {
        self.failures.len()
    }

    /// First decoded value of the named header, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(field, _)| field.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }
}
