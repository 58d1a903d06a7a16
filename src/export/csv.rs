//! Export message records to CSV.
//!
//! One row per message, RFC 4180 quoting, any output encoding
//! `encoding_rs` can produce. Output can be split into several files.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use encoding_rs::{Encoding, UTF_8};
use tracing::{debug, warn};

use crate::error::{MboxError, Result};
use crate::model::address::{join_addresses, join_names};
use crate::model::mail::MessageRecord;

/// Columns written when none are chosen.
pub const DEFAULT_COLUMNS: [&str; 11] = [
    "subject",
    "date",
    "to_header",
    "cc_header",
    "from_header",
    "body",
    "has_file",
    "attach_file_list",
    "has_image",
    "is_multipart",
    "has_delivered_to",
];

/// Every column name [`column_value`] understands.
pub const ALL_COLUMNS: [&str; 26] = [
    "index",
    "source",
    "subject",
    "date",
    "to_header",
    "cc_header",
    "from_header",
    "to_names",
    "to_addresses",
    "cc_names",
    "cc_addresses",
    "from_names",
    "from_addresses",
    "body",
    "plain",
    "html",
    "has_file",
    "attach_file_list",
    "has_image",
    "image_count",
    "is_multipart",
    "has_delivered_to",
    "removed_url_count",
    "removed_address_count",
    "decode_failures",
    "decode_failure_fields",
];

/// Prefix of a column holding the named header, e.g. `header:message-id`.
pub const HEADER_COLUMN_PREFIX: &str = "header:";

fn is_known_column(column: &str) -> bool {
    match column.strip_prefix(HEADER_COLUMN_PREFIX) {
        Some(name) => !name.trim().is_empty(),
        None => ALL_COLUMNS.contains(&column),
    }
}

const UTF8_BOM: [u8; 3] = [0xEF, 0xBB, 0xBF];

/// How to lay out CSV output.
#[derive(Debug, Clone)]
pub struct CsvOptions {
    columns: Vec<String>,
    encoding: &'static Encoding,
    bom: bool,
    slice: usize,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            columns: DEFAULT_COLUMNS.iter().map(|s| s.to_string()).collect(),
            encoding: UTF_8,
            bom: false,
            slice: 1,
        }
    }
}

impl CsvOptions {
    /// Validate columns and the encoding label.
    pub fn new(columns: &[String], encoding: &str, bom: bool, slice: usize) -> Result<Self> {
        if let Some(unknown) = columns.iter().find(|c| !is_known_column(c)) {
            return Err(MboxError::ExportError(format!(
                "unknown column '{unknown}' (available: {}, or {HEADER_COLUMN_PREFIX}<name>)",
                ALL_COLUMNS.join(", ")
            )));
        }
        let encoding = Encoding::for_label(encoding.trim().as_bytes())
            .ok_or_else(|| MboxError::ExportError(format!("unknown output encoding '{encoding}'")))?;
        let columns = if columns.is_empty() {
            Self::default().columns
        } else {
            columns.to_vec()
        };
        Ok(Self {
            columns,
            encoding,
            bom,
            slice: slice.max(1),
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// The encoding bytes are actually written in.
    ///
    /// UTF-16 labels produce UTF-8, as `encoding_rs` encoders do.
    pub fn output_encoding(&self) -> &'static Encoding {
        self.encoding.output_encoding()
    }
}

/// Text of one cell.
pub fn column_value(record: &MessageRecord, column: &str) -> String {
    fn opt(value: &Option<String>) -> String {
        value.clone().unwrap_or_default()
    }
    match column {
        "index" => record.index.to_string(),
        "source" => record
            .source
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_default(),
        "subject" => opt(&record.subject),
        "date" => record.date.as_ref().map(ToString::to_string).unwrap_or_default(),
        "to_header" => opt(&record.to_header),
        "cc_header" => opt(&record.cc_header),
        "from_header" => opt(&record.from_header),
        "to_names" => join_names(&record.to),
        "to_addresses" => join_addresses(&record.to),
        "cc_names" => join_names(&record.cc),
        "cc_addresses" => join_addresses(&record.cc),
        "from_names" => join_names(&record.from),
        "from_addresses" => join_addresses(&record.from),
        "body" => record.body.preferred().to_string(),
        "plain" => opt(&record.body.plain),
        "html" => opt(&record.body.html),
        "has_file" => record.has_file.to_string(),
        "attach_file_list" => record.attach_file_list.join("; "),
        "has_image" => record.has_image.to_string(),
        "image_count" => record.image_count.to_string(),
        "is_multipart" => record.is_multipart.to_string(),
        "has_delivered_to" => record.has_delivered_to.to_string(),
        "removed_url_count" => record.removed_url_count.to_string(),
        "removed_address_count" => record.removed_address_count.to_string(),
        "decode_failures" => record.decode_failures().to_string(),
        "decode_failure_fields" => record
            .failures
            .iter()
            .map(|f| f.field.as_str())
            .collect::<Vec<_>>()
            .join("; "),
        other => match other.strip_prefix(HEADER_COLUMN_PREFIX) {
            Some(name) => record.header(name.trim()).unwrap_or_default().to_string(),
            None => String::new(),
        },
    }
}

/// Writes rows to one output stream.
pub struct CsvWriter<'o, W: Write> {
    out: W,
    options: &'o CsvOptions,
    unmappable_reported: bool,
}

impl<'o, W: Write> CsvWriter<'o, W> {
    /// Start a file: optional BOM, then the header row.
    pub fn new(mut out: W, options: &'o CsvOptions) -> Result<Self> {
        if options.bom && options.output_encoding() == UTF_8 {
            out.write_all(&UTF8_BOM).map_err(export_io)?;
        }
        let mut writer = Self {
            out,
            options,
            unmappable_reported: false,
        };
        let header: Vec<String> = options.columns.clone();
        writer.write_row(&header)?;
        Ok(writer)
    }

    pub fn write_record(&mut self, record: &MessageRecord) -> Result<()> {
        let row: Vec<String> = self
            .options
            .columns
            .iter()
            .map(|c| column_value(record, c))
            .collect();
        self.write_row(&row)
    }

    fn write_row(&mut self, cells: &[String]) -> Result<()> {
        let mut line = cells
            .iter()
            .map(|c| csv_escape(c))
            .collect::<Vec<_>>()
            .join(",");
        line.push_str("\r\n");

        let (bytes, _, unmappable) = self.options.encoding.encode(&line);
        if unmappable && !self.unmappable_reported {
            warn!(
                encoding = self.options.output_encoding().name(),
                "Characters not representable in output encoding were written as HTML references"
            );
            self.unmappable_reported = true;
        }
        self.out.write_all(&bytes).map_err(export_io)
    }

    pub fn finish(mut self) -> Result<W> {
        self.out.flush().map_err(export_io)?;
        Ok(self.out)
    }
}

fn export_io(e: std::io::Error) -> MboxError {
    MboxError::ExportError(e.to_string())
}

/// Output file names for `slice` files.
///
/// A directory gets `mbox.csv` inside it. With more than one slice the
/// files are `<stem>-1.csv`, `<stem>-2.csv`, …
pub fn output_paths(output: &Path, slice: usize) -> Vec<PathBuf> {
    let base = if output.is_dir() {
        output.join("mbox.csv")
    } else {
        output.with_extension("csv")
    };
    if slice <= 1 {
        return vec![base];
    }
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mbox".to_string());
    (1..=slice)
        .map(|i| base.with_file_name(format!("{stem}-{i}.csv")))
        .collect()
}

/// Export records, split evenly over the configured number of files.
///
/// Every file gets a header row, even when there are fewer records than
/// slices. Returns the paths written.
pub fn export_csv(
    records: &[MessageRecord],
    output: &Path,
    options: &CsvOptions,
) -> Result<Vec<PathBuf>> {
    let paths = output_paths(output, options.slice);
    let chunk_size = records.len().div_ceil(paths.len()).max(1);
    let mut chunks = records.chunks(chunk_size);

    for path in &paths {
        let file = File::create(path).map_err(|e| MboxError::io(path, e))?;
        let mut writer = CsvWriter::new(BufWriter::new(file), options)?;
        let chunk = chunks.next().unwrap_or_default();
        for record in chunk {
            writer.write_record(record)?;
        }
        writer.finish()?;
        debug!(path = %path.display(), rows = chunk.len(), "Wrote CSV file");
    }
    Ok(paths)
}

/// Escape a value for CSV (RFC 4180).
///
/// Wraps in double quotes if the value contains commas, quotes, or newlines.
fn csv_escape(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::mail::Body;

    fn record(subject: &str) -> MessageRecord {
        MessageRecord {
            subject: Some(subject.to_string()),
            body: Body {
                plain: Some("line1\nline2".to_string()),
                html: None,
            },
            attach_file_list: vec!["a.pdf".into(), "b.zip".into()],
            has_file: true,
            ..MessageRecord::default()
        }
    }

    #[test]
    fn test_csv_escape() {
        assert_eq!(csv_escape("hello"), "hello");
        assert_eq!(csv_escape("hello, world"), "\"hello, world\"");
        assert_eq!(csv_escape("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(csv_escape("line1\nline2"), "\"line1\nline2\"");
    }

    #[test]
    fn test_rows_in_memory() {
        let options = CsvOptions::new(
            &["subject".into(), "body".into(), "attach_file_list".into(), "has_image".into()],
            "utf-8",
            true,
            1,
        )
        .unwrap();
        let mut writer = CsvWriter::new(Vec::new(), &options).unwrap();
        writer.write_record(&record("Hi, there")).unwrap();
        let bytes = writer.finish().unwrap();

        assert!(bytes.starts_with(&UTF8_BOM));
        let text = std::str::from_utf8(&bytes[3..]).unwrap();
        assert_eq!(
            text,
            "subject,body,attach_file_list,has_image\r\n\
             \"Hi, there\",\"line1\nline2\",a.pdf; b.zip,false\r\n"
        );
    }

    #[test]
    fn test_header_columns() {
        let options = CsvOptions::new(
            &["header:Message-ID".into(), "header:x-mailer".into(), "subject".into()],
            "utf-8",
            false,
            1,
        )
        .unwrap();
        let mut row = record("Hi");
        row.headers = vec![("Message-ID".into(), "<m1@example.com>".into())];

        let mut writer = CsvWriter::new(Vec::new(), &options).unwrap();
        writer.write_record(&row).unwrap();
        let text = String::from_utf8(writer.finish().unwrap()).unwrap();
        assert_eq!(
            text,
            "header:Message-ID,header:x-mailer,subject\r\n<m1@example.com>,,Hi\r\n"
        );
        assert!(CsvOptions::new(&["header:".into()], "utf-8", false, 1).is_err());
    }

    #[test]
    fn test_shift_jis_output() {
        let options = CsvOptions::new(&["subject".into()], "Shift_JIS", true, 1).unwrap();
        let mut writer = CsvWriter::new(Vec::new(), &options).unwrap();
        writer.write_record(&record("日本語")).unwrap();
        let bytes = writer.finish().unwrap();

        // No BOM outside UTF-8.
        let (text, _, had_errors) = encoding_rs::SHIFT_JIS.decode(&bytes);
        assert!(!had_errors);
        assert_eq!(text, "subject\r\n日本語\r\n");
    }

    #[test]
    fn test_invalid_options() {
        assert!(matches!(
            CsvOptions::new(&["nope".into()], "utf-8", false, 1),
            Err(MboxError::ExportError(_))
        ));
        assert!(matches!(
            CsvOptions::new(&[], "klingon", false, 1),
            Err(MboxError::ExportError(_))
        ));
        assert_eq!(
            CsvOptions::new(&[], "utf-8", false, 0).unwrap().columns().len(),
            DEFAULT_COLUMNS.len()
        );
    }

    #[test]
    fn test_slicing() {
        let dir = tempfile::tempdir().unwrap();
        let options = CsvOptions::new(&["subject".into()], "utf-8", false, 2).unwrap();
        let records: Vec<_> = ["a", "b", "c"].iter().map(|s| record(s)).collect();

        let paths = export_csv(&records, &dir.path().join("out.csv"), &options).unwrap();
        assert_eq!(
            paths,
            [dir.path().join("out-1.csv"), dir.path().join("out-2.csv")]
        );
        assert_eq!(
            std::fs::read_to_string(&paths[0]).unwrap(),
            "subject\r\na\r\nb\r\n"
        );
        assert_eq!(std::fs::read_to_string(&paths[1]).unwrap(), "subject\r\nc\r\n");
    }

    #[test]
    fn test_output_paths_for_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(output_paths(dir.path(), 1), [dir.path().join("mbox.csv")]);
        assert_eq!(
            output_paths(&dir.path().join("rows.txt"), 1),
            [dir.path().join("rows.csv")]
        );
    }
}
