//! Centralized error types for mboxrows.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while turning bytes into text.
///
/// These are local to one header field or body part: the record builder
/// catches them, records a failure and carries on with the next field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The declared charset label does not name any codec we know.
    #[error("Unrecognized encoding label: {label}")]
    UnrecognizedEncodingLabel { label: String },

    /// Declared charset, detection, variant table and trial list all failed.
    #[error("Could not decode payload (declared: {}, detected: {})",
        .declared.as_deref().unwrap_or("none"),
        .detected.as_deref().unwrap_or("none"))]
    DecodeExhausted {
        declared: Option<String>,
        detected: Option<String>,
    },

    /// The ISO-2022-JP-MS decoder hit a corrupt escape sequence or a
    /// truncated two-byte character.
    #[error("Malformed ISO-2022-JP-MS sequence at offset {offset}: {reason}")]
    MalformedLegacySequence { offset: usize, reason: String },

    /// A codec rejected the input (used internally to move to the next
    /// fallback; never surfaced past the charset decoder).
    #[error("Malformed {encoding} input")]
    Malformed { encoding: String },
}

/// All errors produced by the mboxrows library.
#[derive(Error, Debug)]
pub enum MboxError {
    /// I/O error with the associated file path.
    #[error("I/O error reading '{path}': {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The specified file does not exist.
    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    /// The path is neither an `.mbox`/`.eml` file nor a directory.
    #[error("Only .mbox or .eml files (or directories of them) are supported: {0}")]
    UnsupportedFile(PathBuf),

    /// The MIME structure could not be parsed.
    #[error("MIME decoding error: {0}")]
    MimeError(String),

    /// A charset decoding error surfaced by the `raise` policy.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// An export operation failed.
    #[error("Export error: {0}")]
    ExportError(String),
}

/// Convenience alias for `Result<T, MboxError>`.
pub type Result<T> = std::result::Result<T, MboxError>;

/// Helper to convert a bare `std::io::Error` together with a path.
impl MboxError {
    /// Create an `Io` variant from a path and an `io::Error`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Allow `?` on `std::io::Error` inside functions returning `MboxError`
/// when no path context is available (rare, prefer `MboxError::io`).
impl From<std::io::Error> for MboxError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            path: PathBuf::from("<unknown>"),
            source,
        }
    }
}

impl From<mailparse::MailParseError> for MboxError {
    fn from(e: mailparse::MailParseError) -> Self {
        Self::MimeError(e.to_string())
    }
}
