//! Export message records as JSON lines (one object per line).

use std::io::Write;

use crate::error::{MboxError, Result};
use crate::model::mail::MessageRecord;

/// Streams records to `out`, one JSON object per line.
pub struct JsonlWriter<W: Write> {
    out: W,
    written: u64,
}

impl<W: Write> JsonlWriter<W> {
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    pub fn write_record(&mut self, record: &MessageRecord) -> Result<()> {
        serde_json::to_writer(&mut self.out, record)
            .map_err(|e| MboxError::ExportError(e.to_string()))?;
        self.out
            .write_all(b"\n")
            .map_err(|e| MboxError::ExportError(e.to_string()))?;
        self.written += 1;
        Ok(())
    }

    /// Number of records written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn finish(mut self) -> Result<W> {
        self.out
            .flush()
            .map_err(|e| MboxError::ExportError(e.to_string()))?;
        Ok(self.out)
    }
}
