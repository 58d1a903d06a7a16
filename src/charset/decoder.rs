//! Layered charset decoding.
//!
//! Order of attempts for one payload:
//!
//! 1. the declared charset, then its variants;
//! 2. the detected charset (if not already tried), then its variants;
//! 3. the trial list.
//!
//! A codec name is never tried twice, so the number of attempts is bounded
//! by the size of those lists.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::charset::codec::{normalize_label, Codec, CodecTable};
use crate::charset::detect::{Detector, StatisticalDetector};
use crate::charset::variants::VARIANTS;
use crate::error::DecodeError;
use crate::model::part::Payload;

/// Charsets tried when the declared and detected ones both fail.
pub const DEFAULT_TRIAL_CHARSETS: [&str; 3] = ["utf-8", "cp932", "shift_jis"];

/// Charset substituted for labels that say "unknown".
pub const DEFAULT_UNKNOWN_CHARSET: &str = "cp932";

/// Labels meaning "8-bit data in an unknown charset".
const UNKNOWN_LABELS: [&str; 4] = ["unknown-8bit", "unknown-8-bit", "x-unknown", "unknown"];

/// Bytes of the payload shown in failure diagnostics.
const PREFIX_LEN: usize = 48;

/// What to do when no charset decodes a payload.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Log a warning and use empty text.
    #[default]
    Warn,
    /// Use empty text silently.
    Ignore,
    /// Return the error.
    Raise,
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Warn => "warn",
            Self::Ignore => "ignore",
            Self::Raise => "raise",
        };
        f.write_str(s)
    }
}

/// Outcome of decoding one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeResult {
    pub text: String,
    /// Codec that produced `text`; `None` for text payloads and failures.
    pub encoding_used: Option<String>,
    /// Declared label as found in the message, kept even after a fallback.
    pub original_declared_encoding: Option<String>,
    /// Set when every attempt failed and the policy swallowed the error.
    pub failure_reason: Option<DecodeError>,
}

impl DecodeResult {
    fn decoded(text: String, used: Option<&str>, declared: Option<String>) -> Self {
        Self {
            text,
            encoding_used: used.map(str::to_string),
            original_declared_encoding: declared,
            failure_reason: None,
        }
    }

    fn failed(reason: DecodeError, declared: Option<String>) -> Self {
        Self {
            text: String::new(),
            encoding_used: None,
            original_declared_encoding: declared,
            failure_reason: Some(reason),
        }
    }

    /// Whether the text is a placeholder for a failed decode.
    pub fn is_failure(&self) -> bool {
        self.failure_reason.is_some()
    }

    /// Whether a fallback replaced the declared charset.
    pub fn used_fallback(&self) -> bool {
        match (&self.original_declared_encoding, &self.encoding_used) {
            (Some(declared), Some(used)) => normalize_label(declared) != normalize_label(used),
            _ => false,
        }
    }
}

/// Bytes-to-text decoder with detection and fallbacks.
///
/// The codec table is injected; the default constructor uses
/// [`CodecTable::standard`].
#[derive(Debug, Clone)]
pub struct CharsetDecoder {
    codecs: CodecTable,
    detector: Arc<dyn Detector>,
    trial_charsets: Vec<String>,
    /// Normalized detected label -> replacement label.
    extension_overrides: HashMap<String, String>,
    unknown_default: String,
    policy: FailurePolicy,
}

impl Default for CharsetDecoder {
    fn default() -> Self {
        Self::new(CodecTable::standard())
    }
}

impl CharsetDecoder {
    pub fn new(codecs: CodecTable) -> Self {
        Self {
            codecs,
            detector: Arc::new(StatisticalDetector),
            trial_charsets: DEFAULT_TRIAL_CHARSETS.iter().map(|s| s.to_string()).collect(),
            extension_overrides: HashMap::from([(
                normalize_label("shift_jis"),
                "cp932".to_string(),
            )]),
            unknown_default: DEFAULT_UNKNOWN_CHARSET.to_string(),
            policy: FailurePolicy::default(),
        }
    }

    pub fn with_detector(mut self, detector: Arc<dyn Detector>) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_trial_charsets<I, S>(mut self, charsets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trial_charsets = charsets.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the detected-label overrides.
    pub fn with_extension_overrides<I, K, V>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        self.extension_overrides = overrides
            .into_iter()
            .map(|(k, v)| (normalize_label(k.as_ref()), v.into()))
            .collect();
        self
    }

    pub fn with_unknown_default(mut self, label: impl Into<String>) -> Self {
        self.unknown_default = label.into();
        self
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn codecs(&self) -> &CodecTable {
        &self.codecs
    }

    /// Decode a MIME payload. Text payloads are returned unchanged.
    pub fn decode_payload(
        &self,
        payload: &Payload,
        declared: Option<&str>,
    ) -> Result<DecodeResult, DecodeError> {
        match payload {
            Payload::Text(text) => Ok(DecodeResult::decoded(
                text.clone(),
                None,
                declared.map(str::to_string),
            )),
            Payload::Bytes(bytes) => self.decode(bytes, declared),
        }
    }

    /// Decode `bytes`, preferring the `declared` charset.
    ///
    /// Returns `Err` only under [`FailurePolicy::Raise`], or when a payload
    /// declared as ISO-2022-JP-MS is corrupt.
    pub fn decode(
        &self,
        bytes: &[u8],
        declared: Option<&str>,
    ) -> Result<DecodeResult, DecodeError> {
        let original = declared
            .map(str::trim)
            .filter(|label| !label.is_empty())
            .map(str::to_string);

        if bytes.is_empty() {
            return Ok(DecodeResult::decoded(
                String::new(),
                original.as_deref(),
                original.clone(),
            ));
        }

        let mut tried = HashSet::new();
        let mut unrecognized = None;

        if let Some(label) = original.as_deref().map(|l| self.resolve_unknown(l)) {
            match self.codecs.lookup(&label) {
                None => {
                    debug!(charset = %label, "Unrecognized declared charset");
                    unrecognized = Some(label);
                }
                Some(codec) => {
                    tried.insert(normalize_label(codec.name()));
                    match codec.decode(bytes) {
                        Ok(text) => {
                            return Ok(DecodeResult::decoded(text, Some(codec.name()), original))
                        }
                        Err(err @ DecodeError::MalformedLegacySequence { .. }) => {
                            self.report(&err, bytes, original.as_deref(), None);
                            return Err(err);
                        }
                        Err(err) => trace!(%err, "Declared charset failed"),
                    }
                    if let Some((text, used)) = self.try_variants(bytes, codec.name(), &mut tried)
                    {
                        return Ok(DecodeResult::decoded(text, Some(used), original));
                    }
                }
            }
        }

        let detected = self
            .detector
            .detect(bytes)
            .map(|label| self.apply_override(label));
        debug!(
            declared = original.as_deref().unwrap_or("none"),
            detected = detected.as_deref().unwrap_or("none"),
            "Falling back to detection"
        );

        if let Some(label) = detected.as_deref() {
            if let Some((text, used)) = self.try_with_variants(bytes, label, &mut tried) {
                return Ok(DecodeResult::decoded(text, Some(&used), original));
            }
        }

        for trial in &self.trial_charsets {
            if let Some((text, used)) = self.try_label(bytes, trial, &mut tried) {
                return Ok(DecodeResult::decoded(text, Some(&used), original));
            }
        }

        let err = match unrecognized {
            Some(label) => DecodeError::UnrecognizedEncodingLabel { label },
            None => DecodeError::DecodeExhausted {
                declared: original.clone(),
                detected: detected.clone(),
            },
        };
        self.report(&err, bytes, original.as_deref(), detected.as_deref());
        match self.policy {
            FailurePolicy::Raise => Err(err),
            FailurePolicy::Warn | FailurePolicy::Ignore => Ok(DecodeResult::failed(err, original)),
        }
    }

    fn resolve_unknown(&self, label: &str) -> String {
        let normalized = normalize_label(label);
        if UNKNOWN_LABELS.iter().any(|u| normalize_label(u) == normalized) {
            self.unknown_default.clone()
        } else {
            label.to_string()
        }
    }

    fn apply_override(&self, label: String) -> String {
        self.extension_overrides
            .get(&normalize_label(&label))
            .cloned()
            .unwrap_or(label)
    }

    /// Try one label. Codecs already tried are skipped.
    fn try_label(
        &self,
        bytes: &[u8],
        label: &str,
        tried: &mut HashSet<String>,
    ) -> Option<(String, String)> {
        let codec = self.codecs.lookup(label)?;
        self.try_codec(bytes, codec.as_ref(), tried)
    }

    fn try_codec(
        &self,
        bytes: &[u8],
        codec: &dyn Codec,
        tried: &mut HashSet<String>,
    ) -> Option<(String, String)> {
        if !tried.insert(normalize_label(codec.name())) {
            return None;
        }
        match codec.decode(bytes) {
            Ok(text) => Some((text, codec.name().to_string())),
            Err(err) => {
                trace!(charset = codec.name(), %err, "Candidate charset failed");
                None
            }
        }
    }

    fn try_variants(
        &self,
        bytes: &[u8],
        name: &str,
        tried: &mut HashSet<String>,
    ) -> Option<(String, &'static str)> {
        VARIANTS.variants(name).iter().find_map(|&variant| {
            let codec = self.codecs.lookup(variant)?;
            self.try_codec(bytes, codec.as_ref(), tried)
                .map(|(text, _)| (text, variant))
        })
    }

    fn try_with_variants(
        &self,
        bytes: &[u8],
        label: &str,
        tried: &mut HashSet<String>,
    ) -> Option<(String, String)> {
        let codec = self.codecs.lookup(label)?;
        if let Some(hit) = self.try_codec(bytes, codec.as_ref(), tried) {
            return Some(hit);
        }
        self.try_variants(bytes, codec.name(), tried)
            .map(|(text, used)| (text, used.to_string()))
    }

    fn report(
        &self,
        err: &DecodeError,
        bytes: &[u8],
        declared: Option<&str>,
        detected: Option<&str>,
    ) {
        if self.policy != FailurePolicy::Warn {
            return;
        }
        let prefix = &bytes[..bytes.len().min(PREFIX_LEN)];
        warn!(
            declared = declared.unwrap_or("none"),
            detected = detected.unwrap_or("none"),
            prefix = %prefix.escape_ascii(),
            "{err}"
        );
    }
}
