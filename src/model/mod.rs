//! Data model: MIME parts in, message records out.

pub mod address;
pub mod mail;
pub mod part;
