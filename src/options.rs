//! Extraction options.

use std::collections::BTreeMap;

use crate::charset::decoder::{DEFAULT_TRIAL_CHARSETS, DEFAULT_UNKNOWN_CHARSET};
use crate::charset::{CharsetDecoder, CodecTable, FailurePolicy};
use crate::config::Config;
use crate::parser::clean::CleanHooks;

/// Everything that controls how a message becomes a record.
#[derive(Debug, Clone)]
pub struct ExtractOptions {
    /// Clean headers and bodies after decoding.
    pub auto_clean: bool,
    /// Only decode text parts of these content types.
    pub content_type_filter: Option<Vec<String>>,
    /// Charsets tried in order once the declared and detected ones fail.
    pub trial_charsets: Vec<String>,
    /// Detected label → label actually used.
    pub extension_charset_overrides: BTreeMap<String, String>,
    pub clean_hooks: CleanHooks,
    pub on_decode_failure: FailurePolicy,
    /// Charset assumed for `unknown-8bit` payloads.
    pub unknown_charset_default: String,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            auto_clean: true,
            content_type_filter: None,
            trial_charsets: DEFAULT_TRIAL_CHARSETS.iter().map(|s| s.to_string()).collect(),
            extension_charset_overrides: BTreeMap::from([(
                "SHIFT_JIS".to_string(),
                "CP932".to_string(),
            )]),
            clean_hooks: CleanHooks::default(),
            on_decode_failure: FailurePolicy::Warn,
            unknown_charset_default: DEFAULT_UNKNOWN_CHARSET.to_string(),
        }
    }
}

impl From<&Config> for ExtractOptions {
    fn from(config: &Config) -> Self {
        Self {
            auto_clean: config.clean.auto_clean,
            content_type_filter: config.clean.content_type_filter.clone(),
            trial_charsets: config.decode.trial_charsets.clone(),
            extension_charset_overrides: config.decode.extension_charset_overrides.clone(),
            clean_hooks: CleanHooks::default(),
            on_decode_failure: config.decode.on_decode_failure,
            unknown_charset_default: config.decode.unknown_charset_default.clone(),
        }
    }
}

impl ExtractOptions {
    /// Build the charset decoder these options describe, over the standard codecs.
    pub fn charset_decoder(&self) -> CharsetDecoder {
        CharsetDecoder::new(CodecTable::standard())
            .with_trial_charsets(self.trial_charsets.iter().cloned())
            .with_extension_overrides(self.extension_charset_overrides.iter())
            .with_unknown_default(self.unknown_charset_default.clone())
            .with_policy(self.on_decode_failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_config_defaults() {
        let from_config = ExtractOptions::from(&Config::default());
        let defaults = ExtractOptions::default();
        assert_eq!(from_config.auto_clean, defaults.auto_clean);
        assert_eq!(from_config.trial_charsets, defaults.trial_charsets);
        assert_eq!(
            from_config.extension_charset_overrides,
            defaults.extension_charset_overrides
        );
        assert_eq!(from_config.on_decode_failure, defaults.on_decode_failure);
    }

    #[test]
    fn test_charset_decoder_carries_policy() {
        let options = ExtractOptions {
            on_decode_failure: FailurePolicy::Raise,
            ..ExtractOptions::default()
        };
        assert_eq!(options.charset_decoder().policy(), FailurePolicy::Raise);
    }
}
