//! Families of charsets that are commonly mislabeled as one another.
//!
//! When a declared or detected charset fails, its siblings are tried next
//! (e.g. a "Shift_JIS" message that really uses Windows-31J characters).

use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::charset::codec::normalize_label;

/// Each group lists codec names in preferred retry order.
///
/// EUC-JP has no sibling: `encoding_rs` has no JIS X 0213 decoder, so
/// EUC-JIS-2004 and Shift_JIS-2004 labels are unknown to the codec table.
const SIMILAR_GROUPS: &[&[&str]] = &[
    &["iso-2022-jp", "iso-2022-jp-ms"],
    &["cp932", "shift_jis"],
    &["us-ascii", "utf-8"],
];

/// Lookup from a codec name to its siblings.
#[derive(Debug, Clone, Default)]
pub struct VariantTable {
    entries: HashMap<String, Vec<&'static str>>,
}

impl VariantTable {
    fn from_groups(groups: &[&[&'static str]]) -> Self {
        let mut entries = HashMap::new();
        for group in groups {
            for &member in *group {
                let siblings: Vec<&'static str> =
                    group.iter().copied().filter(|&other| other != member).collect();
                entries.insert(normalize_label(member), siblings);
            }
        }
        Self { entries }
    }

    /// Siblings of `name`, or an empty slice.
    pub fn variants(&self, name: &str) -> &[&'static str] {
        self.entries
            .get(&normalize_label(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

/// Built-in variant table.
pub static VARIANTS: Lazy<VariantTable> = Lazy::new(|| VariantTable::from_groups(SIMILAR_GROUPS));

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_japanese_families() {
        assert_eq!(VARIANTS.variants("shift_jis"), &["cp932"]);
        assert_eq!(VARIANTS.variants("CP932"), &["shift_jis"]);
        assert_eq!(VARIANTS.variants("ISO-2022-JP"), &["iso-2022-jp-ms"]);
        assert_eq!(VARIANTS.variants("iso_2022_jp_ms"), &["iso-2022-jp"]);
    }

    #[test]
    fn test_ascii_family_and_unknown() {
        assert_eq!(VARIANTS.variants("us-ascii"), &["utf-8"]);
        assert!(VARIANTS.variants("koi8-r").is_empty());
    }
}
