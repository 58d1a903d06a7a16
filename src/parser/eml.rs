//! Reader for individual `.eml` files (RFC 5322 messages without MBOX framing).

use std::path::Path;

use crate::error::{MboxError, Result};

/// Read a single `.eml` file.
///
/// Some exporters prepend an mbox `From ` line or a UTF-8 BOM; both are
/// left in place and skipped by the MIME layer.
pub fn read_eml(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    std::fs::read(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MboxError::FileNotFound(path.to_path_buf())
        } else {
            MboxError::io(path, e)
        }
    })
}

/// Whether `data` has a header block at all (a blank line, or at least one
/// `Name: value` line).
pub fn looks_like_message(data: &[u8]) -> bool {
    let first_line = data
        .split(|&b| b == b'\n')
        .find(|line| !line.starts_with(b"From "))
        .unwrap_or_default();
    first_line
        .iter()
        .position(|&b| b == b':')
        .is_some_and(|colon| colon > 0 && first_line[..colon].iter().all(|b| b.is_ascii_graphic()))
}
