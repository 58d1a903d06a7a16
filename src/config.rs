//! Application configuration.
//!
//! Configuration is loaded from a TOML file at:
//! 1. `$MBOXROWS_CONFIG` (environment variable)
//! 2. `~/.config/mboxrows/config.toml` (Linux/macOS)
//!    `%APPDATA%\mboxrows\config.toml` (Windows)
//! 3. Built-in defaults

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::charset::FailurePolicy;
use crate::export::csv::DEFAULT_COLUMNS;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General behavior settings.
    pub general: GeneralConfig,
    /// Charset decoding.
    pub decode: DecodeConfig,
    /// Text cleaning.
    pub clean: CleanConfig,
    /// Export defaults.
    pub export: ExportConfig,
}

/// General behavior settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Override cache directory for logs.
    pub cache_dir: Option<PathBuf>,
    /// Log level: "error", "warn", "info", "debug", "trace".
    pub log_level: String,
}

/// Charset decoding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// Charsets tried in order once the declared and detected ones fail.
    pub trial_charsets: Vec<String>,
    /// Detected label → label actually used (e.g. `SHIFT_JIS` → `CP932`).
    pub extension_charset_overrides: BTreeMap<String, String>,
    /// What to do when a payload cannot be decoded.
    pub on_decode_failure: FailurePolicy,
    /// Charset assumed for `unknown-8bit` and similar labels.
    pub unknown_charset_default: String,
}

/// Text cleaning settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CleanConfig {
    /// Strip markup, URLs and addresses from headers and bodies.
    pub auto_clean: bool,
    /// Only decode text parts of these content types.
    pub content_type_filter: Option<Vec<String>>,
}

/// Export defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Default export format: "csv" or "jsonl".
    pub default_format: String,
    /// CSV columns, in order.
    pub columns: Vec<String>,
    /// Output encoding label (any label `encoding_rs` knows).
    pub encoding: String,
    /// Write a UTF-8 byte order mark.
    pub bom: bool,
    /// Split the CSV output into this many files.
    pub slice: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            cache_dir: None,
            log_level: "warn".to_string(),
        }
    }
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            trial_charsets: crate::charset::decoder::DEFAULT_TRIAL_CHARSETS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            extension_charset_overrides: BTreeMap::from([(
                "SHIFT_JIS".to_string(),
                "CP932".to_string(),
            )]),
            on_decode_failure: FailurePolicy::Warn,
            unknown_charset_default: crate::charset::decoder::DEFAULT_UNKNOWN_CHARSET.to_string(),
        }
    }
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            auto_clean: true,
            content_type_filter: None,
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            default_format: "csv".to_string(),
            columns: DEFAULT_COLUMNS.iter().map(|s| s.to_string()).collect(),
            encoding: "utf-8".to_string(),
            bom: false,
            slice: 1,
        }
    }
}

// ── Load / save ─────────────────────────────────────────────────

/// Load configuration, searching standard locations.
///
/// Returns the default configuration if no file is found or on parse error.
pub fn load_config() -> Config {
    if let Some(path) = config_file_path() {
        if path.exists() {
            match std::fs::read_to_string(&path) {
                Ok(contents) => match toml::from_str::<Config>(&contents) {
                    Ok(cfg) => {
                        tracing::info!(path = %path.display(), "Loaded config");
                        return cfg;
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "Failed to parse config, using defaults"
                        );
                    }
                },
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "Failed to read config file, using defaults"
                    );
                }
            }
        }
    }
    Config::default()
}

/// Save configuration to the standard location.
pub fn save_config(config: &Config) -> anyhow::Result<PathBuf> {
    let path = config_file_path()
        .ok_or_else(|| anyhow::anyhow!("Could not determine config file path"))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let contents = toml::to_string_pretty(config)?;
    std::fs::write(&path, contents)?;
    tracing::info!(path = %path.display(), "Saved config");
    Ok(path)
}

/// Determine the config file path (checking env var first, then standard dirs).
pub fn config_file_path() -> Option<PathBuf> {
    if let Ok(env_path) = std::env::var("MBOXROWS_CONFIG") {
        return Some(PathBuf::from(env_path));
    }
    dirs::config_dir().map(|d| d.join("mboxrows").join("config.toml"))
}

/// Return the cache directory for logs.
pub fn cache_dir(config: &Config) -> PathBuf {
    if let Some(ref dir) = config.general.cache_dir {
        return dir.clone();
    }
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mboxrows")
}

/// Return the log file path.
pub fn log_file_path(config: &Config) -> PathBuf {
    cache_dir(config).join("mboxrows.log")
}
