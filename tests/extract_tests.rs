//! End-to-end tests: archives on disk in, records and exported files out.

use std::sync::Arc;

use assert_fs::prelude::*;
use base64::Engine;
use predicates::prelude::*;

use mboxrows::archive::{extract_all, ExtractionSummary};
use mboxrows::charset::{Detector, FailurePolicy};
use mboxrows::error::DecodeError;
use mboxrows::export::csv::{export_csv, CsvOptions};
use mboxrows::export::json::JsonlWriter;
use mboxrows::options::ExtractOptions;
use mboxrows::record::RecordBuilder;

fn b64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// `=?ISO-2022-JP?B?...?=` for `text`.
fn jis_word(text: &str) -> String {
    let (bytes, _, _) = encoding_rs::ISO_2022_JP.encode(text);
    format!("=?ISO-2022-JP?B?{}?=", b64(&bytes))
}

/// One mbox message: separator, headers, blank line, body.
fn message(from_line: &str, headers: &[String], body: &[u8]) -> Vec<u8> {
    let mut out = format!("From {from_line}\n").into_bytes();
    for header in headers {
        out.extend_from_slice(header.as_bytes());
        out.push(b'\n');
    }
    out.push(b'\n');
    out.extend_from_slice(body);
    out.extend_from_slice(b"\n\n");
    out
}

/// Three messages in three legacy Japanese encodings.
fn japanese_mbox() -> Vec<u8> {
    let (cp932_body, _, _) = encoding_rs::SHIFT_JIS.encode("価格表①を送ります");
    let (euc_body, _, _) = encoding_rs::EUC_JP.encode("<p>ご確認ください</p>");
    let (jis_body, _, _) = encoding_rs::ISO_2022_JP.encode("よろしくお願いします");

    let mut mbox = message(
        "sato@example.jp Mon Apr 01 09:00:00 2024",
        &[
            format!("Subject: {}", jis_word("見積もり")),
            "From: sato@example.jp".to_string(),
            "To: buyer@example.com".to_string(),
            "Date: Mon, 01 Apr 2024 09:00:00 +0900".to_string(),
            "Content-Type: text/plain; charset=Shift_JIS".to_string(),
            "Content-Transfer-Encoding: 8bit".to_string(),
        ],
        &cp932_body,
    );
    mbox.extend(message(
        "kato@example.jp Tue Apr 02 09:00:00 2024",
        &[
            format!("Subject: {}", jis_word("確認のお願い")),
            "From: kato@example.jp".to_string(),
            "Content-Type: text/html; charset=\"euc-jp\"".to_string(),
            "Content-Transfer-Encoding: 8bit".to_string(),
        ],
        &euc_body,
    ));
    mbox.extend(message(
        "ito@example.jp Wed Apr 03 09:00:00 2024",
        &[
            format!("Subject: {}", jis_word("ご挨拶")),
            "From: ito@example.jp".to_string(),
            "Cc: sato@example.jp".to_string(),
            "Content-Type: text/plain; charset=ISO-2022-JP".to_string(),
        ],
        &jis_body,
    ));
    mbox
}

#[test]
fn test_japanese_archive_decodes() {
    let temp = assert_fs::TempDir::new().unwrap();
    let archive = temp.child("japan.mbox");
    archive.write_binary(&japanese_mbox()).unwrap();

    let (records, summary) = extract_all(archive.path(), &RecordBuilder::default()).unwrap();

    assert_eq!(summary.messages, 3);
    assert_eq!(summary.files, 1);
    assert_eq!(summary.decode_failures, 0);

    let subjects: Vec<_> = records.iter().map(|r| r.subject.as_deref()).collect();
    assert_eq!(
        subjects,
        [Some("見積もり"), Some("確認のお願い"), Some("ご挨拶")]
    );
    assert_eq!(records[0].body.plain.as_deref(), Some("価格表①を送ります"));
    assert_eq!(records[1].body.html.as_deref(), Some("ご確認ください"));
    assert_eq!(records[2].body.plain.as_deref(), Some("よろしくお願いします"));
    assert_eq!(records[2].cc_header.as_deref(), Some("sato@example.jp"));
    assert!(records.iter().all(|r| r.source.as_deref() == Some(archive.path())));
}

#[test]
fn test_nec_special_character_in_legacy_body() {
    // ESC $ B, row 13 cell 1 (circled digit one), ESC ( B
    let body = b"\x1b$B\x2d\x21\x1b(B OK";
    let raw = message(
        "a@example.jp Thu Jan 04 10:00:00 2024",
        &[
            "Subject: legacy".to_string(),
            "Content-Type: text/plain; charset=iso-2022-jp-ms".to_string(),
        ],
        body,
    );

    let temp = assert_fs::TempDir::new().unwrap();
    let archive = temp.child("legacy.mbox");
    archive.write_binary(&raw).unwrap();

    let (records, summary) = extract_all(archive.path(), &RecordBuilder::default()).unwrap();
    assert_eq!(summary.decode_failures, 0);
    assert_eq!(records[0].body.plain.as_deref(), Some("① OK"));
}

#[test]
fn test_csv_export_of_archive() {
    let temp = assert_fs::TempDir::new().unwrap();
    let archive = temp.child("japan.mbox");
    archive.write_binary(&japanese_mbox()).unwrap();

    let (records, _) = extract_all(archive.path(), &RecordBuilder::default()).unwrap();
    let options = CsvOptions::new(&[], "utf-8", true, 1).unwrap();
    let written = export_csv(&records, temp.child("rows.csv").path(), &options).unwrap();
    assert_eq!(written.len(), 1);

    let csv = temp.child("rows.csv");
    csv.assert(predicate::path::exists());
    csv.assert(predicate::str::starts_with(
        "\u{FEFF}subject,date,to_header,cc_header,from_header,body,has_file,\
         attach_file_list,has_image,is_multipart,has_delivered_to\r\n",
    ));
    csv.assert(predicate::str::contains(
        "見積もり,2024-04-01 00:00:00+00:00,buyer@example.com,,sato@example.jp,価格表①を送ります,false,,false,false,false",
    ));
}

#[test]
fn test_sliced_csv_and_jsonl() {
    let temp = assert_fs::TempDir::new().unwrap();
    let archive = temp.child("japan.mbox");
    archive.write_binary(&japanese_mbox()).unwrap();
    let (records, _) = extract_all(archive.path(), &RecordBuilder::default()).unwrap();

    let options = CsvOptions::new(&["index".into(), "subject".into()], "utf-8", false, 2).unwrap();
    export_csv(&records, temp.child("rows.csv").path(), &options).unwrap();
    temp.child("rows-1.csv")
        .assert("index,subject\r\n0,見積もり\r\n1,確認のお願い\r\n");
    temp.child("rows-2.csv").assert("index,subject\r\n2,ご挨拶\r\n");
    temp.child("rows.csv").assert(predicate::path::missing());

    let jsonl = temp.child("rows.jsonl");
    let file = std::fs::File::create(jsonl.path()).unwrap();
    let mut writer = JsonlWriter::new(file);
    for record in &records {
        writer.write_record(record).unwrap();
    }
    writer.finish().unwrap();
    jsonl.assert(predicate::str::contains("\"subject\":\"ご挨拶\""));
    let text = std::fs::read_to_string(jsonl.path()).unwrap();
    assert_eq!(text.lines().count(), 3);
}

#[test]
fn test_directory_of_eml_and_mbox() {
    let temp = assert_fs::TempDir::new().unwrap();
    temp.child("a.eml")
        .write_str("Subject: first\nFrom: a@example.com\n\nhello\n")
        .unwrap();
    temp.child("b.mbox").write_binary(&japanese_mbox()).unwrap();
    temp.child("readme.txt").write_str("not mail").unwrap();

    let (records, summary) = extract_all(temp.path(), &RecordBuilder::default()).unwrap();
    assert_eq!(
        summary,
        ExtractionSummary {
            files: 2,
            messages: 4,
            skipped: 0,
            decode_failures: 0,
            messages_with_failures: 0,
            bytes: summary.bytes,
        }
    );
    assert_eq!(records[0].subject.as_deref(), Some("first"));
    assert_eq!(records[3].index, 3);
}

#[test]
fn test_raise_policy_counts_failures() {
    let mut body = b"ok then ".to_vec();
    body.extend_from_slice(&[0x82, 0xA0, 0xFF, 0xFF, 0x80]);
    let raw = message(
        "x Thu Jan 04 10:00:00 2024",
        &[
            "Subject: broken".to_string(),
            "Content-Type: text/plain; charset=utf-8".to_string(),
        ],
        &body,
    );
    let temp = assert_fs::TempDir::new().unwrap();
    let archive = temp.child("broken.mbox");
    archive.write_binary(&raw).unwrap();

    let options = ExtractOptions {
        on_decode_failure: FailurePolicy::Raise,
        trial_charsets: vec!["utf-8".into(), "us-ascii".into()],
        extension_charset_overrides: Default::default(),
        ..ExtractOptions::default()
    };
    let decoder = options.charset_decoder().with_detector(Arc::new(NoGuess));
    let builder = RecordBuilder::new(options).with_decoder(decoder);
    let (records, summary) = extract_all(archive.path(), &builder).unwrap();

    assert_eq!(summary.messages, 1);
    assert_eq!(summary.decode_failures, 1);
    assert_eq!(summary.messages_with_failures, 1);
    let record = &records[0];
    assert_eq!(record.subject.as_deref(), Some("broken"));
    assert_eq!(record.body.plain.as_deref(), Some(""));
    assert!(matches!(
        record.failures[0].error,
        DecodeError::DecodeExhausted { .. }
    ));
    assert_eq!(record.failures[0].declared_charset.as_deref(), Some("utf-8"));
    assert_eq!(record.failures[0].content_type.as_deref(), Some("text/plain"));
}

/// Detector that never guesses, so only the declared and trial charsets run.
#[derive(Debug)]
struct NoGuess;

impl Detector for NoGuess {
    fn detect(&self, _bytes: &[u8]) -> Option<String> {
        None
    }
}
