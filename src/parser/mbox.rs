//! Streaming MBOX splitter.
//!
//! Reads line by line through a 1 MB buffer and hands each complete message
//! to a callback, so an archive is never held in memory as a whole.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{MboxError, Result};

const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Longer messages are truncated (256 MB).
const MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;

/// Progress is reported every 4 MB.
const PROGRESS_INTERVAL: u64 = 4 * 1024 * 1024;

/// An mbox file on disk.
///
/// Splitting tolerates mixed `\n` / `\r\n` endings, a UTF-8 BOM, `From `
/// lines without a preceding blank line and binary bodies. Body lines
/// quoted as `>From ` lose one `>`.
pub struct MboxParser {
    path: PathBuf,
    file_size: u64,
}

impl MboxParser {
    /// Fails if the file cannot be stat'ed; the content is not checked.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = std::fs::metadata(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => MboxError::FileNotFound(path.clone()),
            _ => MboxError::io(&path, e),
        })?;
        Ok(Self {
            path,
            file_size: metadata.len(),
        })
    }

    pub fn file_size(&self) -> u64 {
        self.file_size
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Split the file, calling `on_message(offset, raw)` per message.
    ///
    /// `raw` starts with the `From ` line. Returning `false` from the
    /// callback stops the split. Returns the number of messages delivered.
    pub fn parse(
        &self,
        on_message: &mut dyn FnMut(u64, &[u8]) -> bool,
        progress: Option<&dyn Fn(u64, u64)>,
    ) -> Result<u64> {
        if self.file_size == 0 {
            return Ok(0);
        }
        let file = File::open(&self.path).map_err(|e| MboxError::io(&self.path, e))?;
        let reader = BufReader::with_capacity(READ_BUFFER_SIZE, file);

        let mut splitter = Splitter::new(MAX_MESSAGE_SIZE);
        let mut last_report: u64 = 0;
        let count = splitter
            .run(reader, on_message, &mut |position| {
                if let Some(report) = progress {
                    if position - last_report >= PROGRESS_INTERVAL {
                        report(position, self.file_size);
                        last_report = position;
                    }
                }
            })
            .map_err(|e| MboxError::io(&self.path, e))?;

        if let Some(report) = progress {
            report(self.file_size, self.file_size);
        }
        debug!(path = %self.path.display(), messages = count, "MBOX split complete");
        Ok(count)
    }
}

/// Split mbox data from any buffered reader.
pub fn split_reader<R: BufRead>(
    reader: R,
    on_message: &mut dyn FnMut(u64, &[u8]) -> bool,
) -> std::io::Result<u64> {
    Splitter::new(MAX_MESSAGE_SIZE).run(reader, on_message, &mut |_| {})
}

/// Line-level state of one split.
struct Splitter {
    max_message_size: usize,
    current: Vec<u8>,
    start: u64,
    truncated: bool,
    delivered: u64,
}

impl Splitter {
    fn new(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            current: Vec::with_capacity(64 * 1024),
            start: 0,
            truncated: false,
            delivered: 0,
        }
    }

    fn run<R: BufRead>(
        &mut self,
        mut reader: R,
        on_message: &mut dyn FnMut(u64, &[u8]) -> bool,
        on_position: &mut dyn FnMut(u64),
    ) -> std::io::Result<u64> {
        let mut line = Vec::with_capacity(4096);
        let mut position: u64 = 0;
        let mut after_blank = true;

        loop {
            line.clear();
            let read = reader.read_until(b'\n', &mut line)?;
            if read == 0 {
                break;
            }

            if is_mbox_separator(&line) {
                if position > 0 && !after_blank {
                    warn!(offset = position, "Found 'From ' separator without preceding blank line");
                }
                if !self.flush(on_message) {
                    return Ok(self.delivered);
                }
                self.start = position;
                self.current.extend_from_slice(&line);
            } else {
                self.push_line(&line);
            }

            after_blank = is_blank_line(&line);
            position += read as u64;
            on_position(position);
        }

        self.flush(on_message);
        Ok(self.delivered)
    }

    fn push_line(&mut self, line: &[u8]) {
        let line = unquote_from_line(line);
        if self.current.len() + line.len() <= self.max_message_size {
            self.current.extend_from_slice(line);
        } else if !self.truncated {
            warn!(
                offset = self.start,
                max_size = self.max_message_size,
                "Message exceeds maximum size, truncating body"
            );
            self.truncated = true;
        }
    }

    /// Deliver the buffered message, if any. `false` means stop.
    fn flush(&mut self, on_message: &mut dyn FnMut(u64, &[u8]) -> bool) -> bool {
        if self.current.is_empty() {
            return true;
        }
        let keep_going = on_message(self.start, &self.current);
        if keep_going {
            self.delivered += 1;
        }
        self.current.clear();
        self.truncated = false;
        keep_going
    }
}

fn is_mbox_separator(line: &[u8]) -> bool {
    line.strip_prefix(&[0xEF, 0xBB, 0xBF])
        .unwrap_or(line)
        .starts_with(b"From ")
}

/// `>From ` → `From `, `>>From ` → `>From `.
fn unquote_from_line(line: &[u8]) -> &[u8] {
    let quotes = line.iter().take_while(|&&b| b == b'>').count();
    if quotes > 0 && line[quotes..].starts_with(b"From ") {
        &line[1..]
    } else {
        line
    }
}

fn is_blank_line(line: &[u8]) -> bool {
    line.iter().all(|b| b" \t\r\n".contains(b))
}
