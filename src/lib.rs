//! `mboxrows`: turn MBOX and EML archives into clean tabular rows.
//!
//! The core is the charset engine in [`charset`]: bytes with a missing,
//! wrong or unknown charset label are decoded through the declared
//! charset, a statistical guess, sibling charsets and a trial list, with a
//! built-in ISO-2022-JP-MS decoder for old Japanese mail. [`record`] turns
//! one raw message into a [`model::mail::MessageRecord`]; [`archive`] and
//! [`export`] handle files on either side.

pub mod archive;
pub mod charset;
pub mod config;
pub mod error;
pub mod export;
pub mod model;
pub mod options;
pub mod parser;
pub mod record;
