//! Archive traversal: `.mbox` files, `.eml` files and directories of either.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::charset::{CharsetDecoder, DecodeResult};
use crate::error::{MboxError, Result};
use crate::model::mail::MessageRecord;
use crate::parser::eml::{looks_like_message, read_eml};
use crate::parser::mbox::MboxParser;
use crate::record::RecordBuilder;

/// How a source file is framed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    /// Many messages separated by `From ` lines.
    Mbox,
    /// A single message.
    Eml,
}

/// One file to read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub path: PathBuf,
    pub kind: SourceKind,
}

/// Totals for one extraction run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractionSummary {
    pub files: usize,
    pub messages: u64,
    /// Messages that could not be parsed at all and produced no record.
    pub skipped: u64,
    pub decode_failures: usize,
    pub messages_with_failures: u64,
    pub bytes: u64,
}

impl ExtractionSummary {
    fn add(&mut self, record: &MessageRecord) {
        self.messages += 1;
        let failures = record.decode_failures();
        if failures > 0 {
            self.decode_failures += failures;
            self.messages_with_failures += 1;
        }
    }
}

fn kind_of(path: &Path) -> Option<SourceKind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "mbox" | "mbx" => Some(SourceKind::Mbox),
        "eml" => Some(SourceKind::Eml),
        _ => None,
    }
}

/// Resolve `path` to the files to read.
///
/// A file is read as EML when its extension says so and as mbox otherwise.
/// A directory contributes its `.mbox` and `.eml` files (not recursive),
/// sorted by name.
pub fn collect_sources(path: &Path) -> Result<Vec<Source>> {
    let metadata = std::fs::metadata(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            MboxError::FileNotFound(path.to_path_buf())
        } else {
            MboxError::io(path, e)
        }
    })?;

    if metadata.is_file() {
        let kind = kind_of(path).unwrap_or(SourceKind::Mbox);
        return Ok(vec![Source {
            path: path.to_path_buf(),
            kind,
        }]);
    }
    if !metadata.is_dir() {
        return Err(MboxError::UnsupportedFile(path.to_path_buf()));
    }

    let mut sources = Vec::new();
    for entry in std::fs::read_dir(path).map_err(|e| MboxError::io(path, e))? {
        let entry = entry.map_err(|e| MboxError::io(path, e))?;
        let entry_path = entry.path();
        if !entry_path.is_file() {
            continue;
        }
        match kind_of(&entry_path) {
            Some(kind) => sources.push(Source {
                path: entry_path,
                kind,
            }),
            None => debug!(path = %entry_path.display(), "Skipping file with unknown extension"),
        }
    }
    sources.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(sources)
}

/// Extract every message under `path`, handing each record to `on_record`.
///
/// Records are numbered across the whole run. An error from `on_record`
/// stops the run and is returned.
pub fn extract(
    path: &Path,
    builder: &RecordBuilder,
    on_record: &mut dyn FnMut(MessageRecord) -> Result<()>,
    progress: Option<&dyn Fn(u64, u64)>,
) -> Result<ExtractionSummary> {
    let sources = collect_sources(path)?;
    let mut summary = ExtractionSummary::default();
    let mut index: u64 = 0;

    for source in &sources {
        summary.files += 1;
        match source.kind {
            SourceKind::Eml => {
                let raw = read_eml(&source.path)?;
                summary.bytes += raw.len() as u64;
                if !looks_like_message(&raw) {
                    warn!(path = %source.path.display(), "File does not start with a header block");
                }
                if let Some(record) = build_one(builder, &raw, index, &source.path, &mut summary) {
                    on_record(record)?;
                }
                index += 1;
            }
            SourceKind::Mbox => {
                let parser = MboxParser::new(&source.path)?;
                summary.bytes += parser.file_size();
                let mut callback_error = None;
                parser.parse(
                    &mut |_offset, raw| {
                        let record = build_one(builder, raw, index, &source.path, &mut summary);
                        index += 1;
                        match record.map(&mut *on_record) {
                            Some(Err(e)) => {
                                callback_error = Some(e);
                                false
                            }
                            _ => true,
                        }
                    },
                    progress,
                )?;
                if let Some(e) = callback_error {
                    return Err(e);
                }
            }
        }
    }

    info!(
        files = summary.files,
        messages = summary.messages,
        decode_failures = summary.decode_failures,
        "Extraction complete"
    );
    Ok(summary)
}

/// Extract everything under `path` into memory.
pub fn extract_all(
    path: &Path,
    builder: &RecordBuilder,
) -> Result<(Vec<MessageRecord>, ExtractionSummary)> {
    let mut records = Vec::new();
    let summary = extract(
        path,
        builder,
        &mut |record| {
            records.push(record);
            Ok(())
        },
        None,
    )?;
    Ok((records, summary))
}

/// Decode one raw payload file, as the `decode` command does.
///
/// Under the `raise` policy an undecodable payload is an
/// [`MboxError::Decode`].
pub fn decode_file(
    path: &Path,
    declared: Option<&str>,
    decoder: &CharsetDecoder,
) -> Result<DecodeResult> {
    let bytes = std::fs::read(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => MboxError::FileNotFound(path.to_path_buf()),
        _ => MboxError::io(path, e),
    })?;
    let result = decoder.decode(&bytes, declared)?;
    debug!(
        path = %path.display(),
        encoding = result.encoding_used.as_deref().unwrap_or("-"),
        "Decoded payload file"
    );
    Ok(result)
}

fn build_one(
    builder: &RecordBuilder,
    raw: &[u8],
    index: u64,
    source: &Path,
    summary: &mut ExtractionSummary,
) -> Option<MessageRecord> {
    match builder.build(raw, index, Some(source)) {
        Ok(record) => {
            summary.add(&record);
            Some(record)
        }
        Err(e) => {
            warn!(path = %source.display(), index, error = %e, "Skipping unparseable message");
            summary.skipped += 1;
            None
        }
    }
}
