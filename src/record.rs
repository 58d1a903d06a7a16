//! Builds one [`MessageRecord`] from one raw message.

use std::path::Path;

use mailparse::{MailHeader, ParsedMail};
use tracing::{debug, field, info_span, Span};

use crate::charset::CharsetDecoder;
use crate::error::Result;
use crate::model::address::EmailAddress;
use crate::model::mail::{DecodeFailure, MessageRecord, RecordDate};
use crate::options::ExtractOptions;
use crate::parser::header::{parse_date, HeaderDecoder};
use crate::parser::mime::{parse_message, walk_parts, BodyExtractor};

/// Turns raw messages into records using one set of options.
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    options: ExtractOptions,
    decoder: CharsetDecoder,
}

impl Default for RecordBuilder {
    fn default() -> Self {
        Self::new(ExtractOptions::default())
    }
}

impl RecordBuilder {
    pub fn new(options: ExtractOptions) -> Self {
        let decoder = options.charset_decoder();
        Self { options, decoder }
    }

    /// Use a custom decoder (extra codecs, another detector).
    pub fn with_decoder(mut self, decoder: CharsetDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn decoder(&self) -> &CharsetDecoder {
        &self.decoder
    }

    pub fn options(&self) -> &ExtractOptions {
        &self.options
    }

    /// Build the record for one message.
    ///
    /// Decode failures never fail the message: the field is left empty and
    /// the failure is listed in [`MessageRecord::failures`]. Only a message
    /// that cannot be parsed as MIME at all is an error.
    pub fn build(&self, raw: &[u8], index: u64, source: Option<&Path>) -> Result<MessageRecord> {
        let span = info_span!("message", index, subject = field::Empty);
        let _guard = span.enter();

        let mail = parse_message(raw)?;
        let headers = HeaderDecoder::new(&self.decoder).with_cleaning(
            self.options.auto_clean,
            self.options.clean_hooks.for_headers(),
        );

        let mut record = MessageRecord {
            index,
            source: source.map(Path::to_path_buf),
            ..MessageRecord::default()
        };

        let decoded = self.decode_headers(&headers, &mail, &span, &mut record.failures);
        let named = |name: &str| {
            decoded
                .iter()
                .find(|(field, _)| field.eq_ignore_ascii_case(name))
                .and_then(|(_, value)| value.clone())
        };

        record.subject = named("Subject");
        record.date = named("Date")
            .filter(|value| !value.is_empty())
            .map(|value| match parse_date(&value) {
                Some(dt) => RecordDate::Parsed(dt),
                None => RecordDate::Raw(value),
            });
        record.to_header = named("To");
        record.cc_header = named("Cc");
        record.from_header = named("From");
        record.to = address_list(record.to_header.as_deref());
        record.cc = address_list(record.cc_header.as_deref());
        record.from = address_list(record.from_header.as_deref());
        record.headers = decoded
            .into_iter()
            .map(|(field, value)| (field, value.unwrap_or_default()))
            .collect();
        record.has_delivered_to = record.has_header("Delivered-To");

        let extracted = BodyExtractor::new(&self.decoder)
            .with_content_type_filter(self.options.content_type_filter.as_deref())
            .with_cleaning(self.options.auto_clean, self.options.clean_hooks.for_body())
            .extract(walk_parts(&mail));

        record.body = extracted.body;
        record.image_count = extracted.images.len();
        record.has_image = !extracted.images.is_empty();
        record.has_file = !extracted.attachments.is_empty();
        record.attach_file_list = extracted.attachments;
        record.is_multipart = extracted.is_multipart;
        record.removed_url_count = extracted.removed_url_count;
        record.removed_address_count = extracted.removed_address_count;
        record.failures.extend(extracted.failures);

        if !record.failures.is_empty() {
            debug!(failures = record.failures.len(), "Message had decode failures");
        }
        Ok(record)
    }

    /// Decode every header, in message order.
    ///
    /// The first `Subject` is decoded before the rest so diagnostics for
    /// the other fields carry it. A value that could not be decoded is
    /// `None` and its failure is pushed to `failures`.
    fn decode_headers(
        &self,
        decoder: &HeaderDecoder<'_>,
        mail: &ParsedMail<'_>,
        span: &Span,
        failures: &mut Vec<DecodeFailure>,
    ) -> Vec<(String, Option<String>)> {
        let subject_at = mail
            .headers
            .iter()
            .position(|h| h.get_key_ref().eq_ignore_ascii_case("Subject"));
        let rest = (0..mail.headers.len()).filter(|&i| Some(i) != subject_at);

        let mut values: Vec<Option<String>> = vec![None; mail.headers.len()];
        for i in subject_at.into_iter().chain(rest) {
            let header = &mail.headers[i];
            let name = header.get_key();
            let value = match decoder.decode_header(&name, Some(header.get_value_raw())) {
                Ok(decoded) => decoded.map(|decoded| {
                    failures.extend(decoded.failures);
                    decoded.value
                }),
                Err(failure) => {
                    failures.push(failure);
                    None
                }
            };
            let value = match (value, self.options.clean_hooks.for_field(&name)) {
                (Some(value), Some(transform)) => Some(transform(&value)),
                (value, _) => value,
            };
            if Some(i) == subject_at {
                if let Some(subject) = value.as_deref() {
                    span.record("subject", subject);
                }
            }
            values[i] = value;
        }

        mail.headers
            .iter()
            .map(MailHeader::get_key)
            .zip(values)
            .collect()
    }
}

fn address_list(value: Option<&str>) -> Vec<EmailAddress> {
    value.map(EmailAddress::parse_list).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::charset::FailurePolicy;
    use crate::error::DecodeError;
    use crate::parser::clean::CleanHooks;

    fn iso2022jp_subject(text: &str) -> String {
        use base64::Engine;
        let (bytes, _, _) = encoding_rs::ISO_2022_JP.encode(text);
        format!(
            "=?ISO-2022-JP?B?{}?=",
            base64::engine::general_purpose::STANDARD.encode(bytes)
        )
    }

    #[test]
    fn test_end_to_end_japanese_subject_and_html_body() {
        let raw = format!(
            "From sender@example.com Thu Jan 04 10:00:00 2024\n\
             Subject: {}\n\
             Date: Thu, 04 Jan 2024 19:00:00 +0900\n\
             From: =?UTF-8?B?5bGx55Sw?= <yamada@example.jp>\n\
             To: a@example.com, \"B, Person\" <b@example.com>\n\
             Delivered-To: a@example.com\n\
             Content-Type: text/html; charset=us-ascii\n\
             \n\
             <script>alert(1)</script><p>Contact me@example.com</p>\n",
            iso2022jp_subject("会議の件")
        );

        let record = RecordBuilder::default()
            .build(raw.as_bytes(), 7, None)
            .unwrap();

        assert_eq!(record.index, 7);
        assert_eq!(record.subject.as_deref(), Some("会議の件"));
        assert_eq!(record.body.html.as_deref(), Some("Contact %MAIL_ADDRESS%"));
        assert_eq!(record.body.plain, None);
        assert_eq!(record.removed_address_count, 1);
        assert_eq!(record.removed_url_count, 0);
        assert_eq!(record.from_header.as_deref(), Some("山田 <yamada@example.jp>"));
        assert_eq!(record.from[0].display_name, "山田");
        assert_eq!(record.to.len(), 2);
        assert_eq!(record.to[1].display_name, "B, Person");
        assert_eq!(record.cc_header, None);
        assert!(record.has_delivered_to);
        assert!(!record.is_multipart);
        assert!(record.failures.is_empty());
        assert_eq!(
            record.date.as_ref().map(ToString::to_string).as_deref(),
            Some("2024-01-04 10:00:00+00:00")
        );
    }

    #[test]
    fn test_image_and_attachment_flags() {
        let raw = b"Subject: files\n\
            Content-Type: multipart/mixed; boundary=\"B\"\n\
            \n\
            --B\n\
            Content-Type: text/plain\n\
            \n\
            see attached\n\
            --B\n\
            Content-Type: image/png\n\
            Content-Transfer-Encoding: base64\n\
            \n\
            iVBORw0KGgo=\n\
            --B\n\
            Content-Type: application/pdf; name=\"report.pdf\"\n\
            Content-Transfer-Encoding: base64\n\
            \n\
            JVBERi0xLjQK\n\
            --B--\n";

        let record = RecordBuilder::default().build(raw, 0, None).unwrap();
        assert!(record.is_multipart);
        assert!(record.has_image);
        assert_eq!(record.image_count, 1);
        assert!(record.has_file);
        assert_eq!(record.attach_file_list, ["report.pdf"]);
        assert_eq!(record.body.plain.as_deref(), Some("see attached"));
        assert!(!record.has_delivered_to);
    }

    #[test]
    fn test_unparseable_date_kept_raw() {
        let raw = b"Subject: x\nDate: 99 bottles\n\nbody\n";
        let record = RecordBuilder::default().build(raw, 0, None).unwrap();
        assert_eq!(
            record.date,
            Some(RecordDate::Raw("99 bottles".to_string()))
        );
    }

    #[test]
    fn test_missing_headers_are_none() {
        let record = RecordBuilder::default()
            .build(b"X-Other: 1\n\nbody\n", 0, None)
            .unwrap();
        assert_eq!(record.subject, None);
        assert_eq!(record.date, None);
        assert_eq!(record.to_header, None);
        assert!(record.to.is_empty());
        assert_eq!(record.body.plain.as_deref(), Some("body"));
    }

    #[test]
    fn test_raise_records_failure_and_keeps_message() {
        let options = ExtractOptions {
            on_decode_failure: FailurePolicy::Raise,
            trial_charsets: vec!["utf-8".into()],
            ..ExtractOptions::default()
        };
        let decoder = CharsetDecoder::default()
            .with_trial_charsets(["utf-8"])
            .with_policy(FailurePolicy::Raise)
            .with_detector(std::sync::Arc::new(NoGuess));
        let builder = RecordBuilder::new(options).with_decoder(decoder);

        let mut raw = b"Subject: fine\nContent-Type: text/plain; charset=x-bogus\n\n".to_vec();
        raw.extend_from_slice(&[0xFF, 0xFE, 0x80]);
        raw.push(b'\n');

        let record = builder.build(&raw, 0, None).unwrap();
        assert_eq!(record.subject.as_deref(), Some("fine"));
        assert_eq!(record.body.plain.as_deref(), Some(""));
        assert_eq!(record.decode_failures(), 1);
        assert_eq!(record.failures[0].field, "body");
        assert_eq!(
            record.failures[0].error,
            DecodeError::UnrecognizedEncodingLabel {
                label: "x-bogus".to_string()
            }
        );
    }

    #[test]
    fn test_every_header_is_decoded_in_order() {
        let options = ExtractOptions {
            clean_hooks: CleanHooks::default().with_field(
                "x-priority",
                std::sync::Arc::new(|s: &str| s.split_whitespace().next().unwrap_or("").to_string()),
            ),
            ..ExtractOptions::default()
        };
        let raw = b"Message-ID: <abc@example.jp>
            Subject: hello
            Reply-To: =?UTF-8?B?5bGx55Sw?= <yamada@example.jp>
            X-Priority: 3 (Normal)
            
            body
";

        let record = RecordBuilder::new(options).build(raw, 0, None).unwrap();
        let names: Vec<&str> = record.headers.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["Message-ID", "Subject", "Reply-To", "X-Priority"]);
        assert_eq!(record.header("message-id"), Some("<abc@example.jp>"));
        assert_eq!(record.header("Reply-To"), Some("山田 <yamada@example.jp>"));
        assert_eq!(record.header("X-Priority"), Some("3"));
        assert!(!record.has_header("Delivered-To"));

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("<abc@example.jp>"));
        assert!(json.contains("山田 <yamada@example.jp>"));
    }

    #[test]
    fn test_no_clean_keeps_markup() {
        let options = ExtractOptions {
            auto_clean: false,
            ..ExtractOptions::default()
        };
        let raw = b"Subject:  spaced  \nContent-Type: text/html\n\n<p>hi</p>\n";
        let record = RecordBuilder::new(options).build(raw, 0, None).unwrap();
        assert_eq!(record.subject.as_deref(), Some("spaced  "));
        assert_eq!(record.body.html.as_deref(), Some("<p>hi</p>\n"));
    }

    #[derive(Debug)]
    struct NoGuess;

    impl crate::charset::Detector for NoGuess {
        fn detect(&self, _bytes: &[u8]) -> Option<String> {
            None
        }
    }
}
