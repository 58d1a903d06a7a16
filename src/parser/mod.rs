//! Email parsing: MBOX splitting, EML reading, header decoding, MIME walking and text cleaning.

pub mod clean;
pub mod eml;
pub mod header;
pub mod mbox;
pub mod mime;
