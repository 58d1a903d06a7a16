//! JIS X 0208 lookup tables used by the ISO-2022-JP-MS decoder.
//!
//! Rows are addressed by the raw 7-bit bytes of a two-byte character
//! (`lead`, `trail`), both in `0x21..=0x7E`.
//!
//! - The 1990 table is the JIS X 0208 index shared with EUC-JP, read through
//!   `encoding_rs` one cell at a time.
//! - The 1978 table only lists where JIS C 6226-1978 differs from the later
//!   revisions: the 22 kanji pairs swapped in 1983 and the cells that did not
//!   exist yet.
//! - The NEC special characters (row 13) and the NEC-selected IBM extensions
//!   (rows 89–92) are vendor rows outside the standard ranges.

use encoding_rs::EUC_JP;

/// JIS X 0208 revision selected by the active escape sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revision {
    /// `ESC $ @`
    Jis1978,
    /// `ESC $ B`
    Jis1990,
}

/// Lead byte of the NEC special character row.
const NEC_ROW: u8 = 0x2D;

/// Lead bytes of the NEC-selected IBM extension rows.
const IBM_ROWS: std::ops::RangeInclusive<u8> = 0x79..=0x7C;

/// Kanji pairs whose code points were exchanged between the 1978 and 1983
/// editions (level 1 simplified form, level 2 traditional form).
const JIS78_SWAPPED: [(u16, u16); 22] = [
    (0x3033, 0x724D),
    (0x3229, 0x7274),
    (0x3342, 0x695A),
    (0x3349, 0x5978),
    (0x3376, 0x635E),
    (0x3443, 0x5E75),
    (0x3452, 0x6B5D),
    (0x375B, 0x7074),
    (0x395C, 0x6268),
    (0x3C49, 0x6922),
    (0x3F59, 0x7057),
    (0x4128, 0x6C4D),
    (0x445B, 0x5464),
    (0x4557, 0x626A),
    (0x456E, 0x5B6D),
    (0x4573, 0x5E39),
    (0x4676, 0x6D6E),
    (0x4768, 0x6A24),
    (0x4930, 0x5B58),
    (0x4B79, 0x5056),
    (0x4C79, 0x692E),
    (0x4F36, 0x6446),
];

/// Cells assigned after 1978 (symbols and box drawing added in 1983, the
/// two kanji added in 1990). Inclusive ranges.
const JIS78_UNASSIGNED: [(u16, u16); 7] = [
    (0x223A, 0x2241),
    (0x224A, 0x2250),
    (0x225C, 0x226A),
    (0x2272, 0x2279),
    (0x227E, 0x227E),
    (0x2821, 0x2840),
    (0x7425, 0x7426),
];

/// NEC special characters, row 13 (`0x2D21..=0x2D7E`). Zero marks an
/// unassigned cell.
#[rustfmt::skip]
const NEC_SPECIAL: [u16; 94] = [
    // 0x2D21: circled digits 1-20
    0x2460, 0x2461, 0x2462, 0x2463, 0x2464, 0x2465, 0x2466, 0x2467,
    0x2468, 0x2469, 0x246A, 0x246B, 0x246C, 0x246D, 0x246E, 0x246F,
    0x2470, 0x2471, 0x2472, 0x2473,
    // 0x2D35: roman numerals I-X
    0x2160, 0x2161, 0x2162, 0x2163, 0x2164, 0x2165, 0x2166, 0x2167,
    0x2168, 0x2169,
    // 0x2D3F
    0x0000,
    // 0x2D40: squared katakana words and units
    0x3349, 0x3314, 0x3322, 0x334D, 0x3318, 0x3327, 0x3303, 0x3336,
    0x3351, 0x3357, 0x330D, 0x3326, 0x3323, 0x332B, 0x334A, 0x333B,
    0x339C, 0x339D, 0x339E, 0x338E, 0x338F, 0x33C4, 0x33A1,
    // 0x2D57
    0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000, 0x0000,
    // 0x2D5F: era name, quotes and abbreviations
    0x337B, 0x301D, 0x301F, 0x2116, 0x33CD, 0x2121, 0x32A4, 0x32A5,
    0x32A6, 0x32A7, 0x32A8, 0x3231, 0x3232, 0x3239, 0x337E, 0x337D,
    0x337C,
    // 0x2D70: mathematical symbols
    0x2252, 0x2261, 0x222B, 0x222E, 0x2211, 0x221A, 0x22A5, 0x2220,
    0x221F, 0x22BF, 0x2235, 0x2229, 0x222A,
    // 0x2D7D
    0x0000, 0x0000,
];

fn code(lead: u8, trail: u8) -> u16 {
    (u16::from(lead) << 8) | u16::from(trail)
}

/// Rows defined by JIS X 0208 itself (non-kanji rows 1–8, kanji rows 16–84).
fn is_standard_row(lead: u8) -> bool {
    matches!(lead, 0x21..=0x28 | 0x30..=0x74)
}

fn is_cell(byte: u8) -> bool {
    (0x21..=0x7E).contains(&byte)
}

/// Look up one cell of the JIS X 0208 index via its EUC-JP form.
fn jis_x0208_index(lead: u8, trail: u8) -> Option<char> {
    let euc = [lead | 0x80, trail | 0x80];
    EUC_JP
        .decode_without_bom_handling_and_without_replacement(&euc)
        .and_then(|s| s.chars().next())
}

/// JIS X 0208:1990 (also 1983) mapping of a standard cell.
fn jis1990(lead: u8, trail: u8) -> Option<char> {
    jis_x0208_index(lead, trail)
}

/// Entry of the 1978 table, if that edition differs from 1990 at this cell.
///
/// `Some(None)` means the cell did not exist in 1978.
fn jis1978(lead: u8, trail: u8) -> Option<Option<char>> {
    let c = code(lead, trail);
    if JIS78_UNASSIGNED
        .iter()
        .any(|&(start, end)| (start..=end).contains(&c))
    {
        return Some(None);
    }
    JIS78_SWAPPED.iter().find_map(|&(a, b)| {
        let partner = if c == a {
            b
        } else if c == b {
            a
        } else {
            return None;
        };
        let [pl, pt] = partner.to_be_bytes();
        Some(jis1990(pl, pt))
    })
}

fn nec_special(trail: u8) -> Option<char> {
    let cp = NEC_SPECIAL[usize::from(trail - 0x21)];
    if cp == 0 {
        None
    } else {
        char::from_u32(u32::from(cp))
    }
}

fn ibm_extension(lead: u8, trail: u8) -> Option<char> {
    jis_x0208_index(lead, trail)
}

/// Decode one two-byte character.
///
/// Pairs outside the valid ranges for `revision`, and cells with no
/// mapping, decode to U+0000 so the caller stays aligned on pair
/// boundaries.
pub fn decode_pair(lead: u8, trail: u8, revision: Revision) -> char {
    if !is_cell(lead) || !is_cell(trail) {
        return '\0';
    }
    let mapped = match revision {
        Revision::Jis1978 if is_standard_row(lead) => {
            jis1978(lead, trail).unwrap_or_else(|| jis1990(lead, trail))
        }
        Revision::Jis1990 if is_standard_row(lead) => jis1990(lead, trail),
        Revision::Jis1990 if lead == NEC_ROW => nec_special(trail),
        Revision::Jis1990 if IBM_ROWS.contains(&lead) => ibm_extension(lead, trail),
        _ => None,
    };
    mapped.unwrap_or('\0')
}
