//! Export functionality: CSV and JSON lines.

pub mod csv;
pub mod json;
