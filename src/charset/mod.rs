//! Charset decoding engine.
//!
//! - [`codec`]: strict codecs and the label table
//! - [`iso2022jp_ms`]: decoder for ISO-2022-JP-MS
//! - [`detect`]: charset detection
//! - [`variants`]: sibling charsets retried on failure
//! - [`decoder`]: the layered fallback chain tying them together

pub mod codec;
pub mod decoder;
pub mod detect;
pub mod iso2022jp_ms;
pub mod jis_tables;
pub mod variants;

pub use codec::{Codec, CodecTable};
pub use decoder::{CharsetDecoder, DecodeResult, FailurePolicy};
pub use detect::{Detector, StatisticalDetector};
