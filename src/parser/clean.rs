//! Text cleaning for header values and bodies.
//!
//! Cleaning always runs on decoded text. The body pipeline strips markup
//! first and collapses whitespace last.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::Lazy;
use quick_xml::escape::resolve_html5_entity;
use regex::{Captures, Regex};
use serde::Serialize;

/// User-supplied cleaning step applied after the built-in rules.
pub type CleanFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Replacement for URLs in bodies.
pub const URL_PLACEHOLDER: &str = "%URL%";

/// Replacement for email addresses in bodies.
pub const ADDRESS_PLACEHOLDER: &str = "%MAIL_ADDRESS%";

static COMMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)<!--.*?-->").expect("Invalid comment regex"));

static STYLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<style(?:\s[^>]*)?>.*?</style\s*>").expect("Invalid style regex")
});

static SCRIPT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<script(?:\s[^>]*)?>.*?</script\s*>").expect("Invalid script regex")
});

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"<(?:"[^"]*"|'[^']*'|[^'">])*>"#).expect("Invalid tag regex"));

static LINE_BREAK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\r\n|[\r\x0B\x0C\x{85}\x{2028}\x{2029}]").expect("Invalid line break regex")
});

static BODY_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:https?|ftp)://[-_.!~*'()a-zA-Z0-9;/?:@&=+$,%#]+").expect("Invalid URL regex")
});

static HEADER_URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:https?|ftp)://\S+").expect("Invalid URL regex"));

static ADDRESS_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[a-zA-Z0-9_.+-]+@[a-zA-Z0-9-]+\.[a-zA-Z0-9.-]+").expect("Invalid address regex")
});

static ENTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"&(#[0-9]+;?|#[xX][0-9a-fA-F]+;?|[^\t\n\x0C <&#;]{1,32};?)")
        .expect("Invalid entity regex")
});

static WHITESPACE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));

/// Names HTML also accepts without the trailing semicolon.
const LEGACY_ENTITIES: &[&str] = &[
    "AElig", "AMP", "Aacute", "Acirc", "Agrave", "Aring", "Atilde", "Auml", "COPY", "Ccedil",
    "ETH", "Eacute", "Ecirc", "Egrave", "Euml", "GT", "Iacute", "Icirc", "Igrave", "Iuml", "LT",
    "Ntilde", "Oacute", "Ocirc", "Ograve", "Oslash", "Otilde", "Ouml", "QUOT", "REG", "THORN",
    "Uacute", "Ucirc", "Ugrave", "Uuml", "Yacute", "aacute", "acirc", "acute", "aelig", "agrave",
    "amp", "aring", "atilde", "auml", "brvbar", "ccedil", "cedil", "cent", "copy", "curren",
    "deg", "divide", "eacute", "ecirc", "egrave", "eth", "euml", "frac12", "frac14", "frac34",
    "gt", "iacute", "icirc", "iexcl", "igrave", "iquest", "iuml", "laquo", "lt", "macr", "micro",
    "middot", "nbsp", "not", "ntilde", "oacute", "ocirc", "ograve", "ordf", "ordm", "oslash",
    "otilde", "ouml", "para", "plusmn", "pound", "quot", "raquo", "reg", "sect", "shy", "sup1",
    "sup2", "sup3", "szlig", "thorn", "times", "uacute", "ucirc", "ugrave", "uml", "uuml",
    "yacute", "yen", "yuml",
];

/// Custom cleaning functions. `all` takes priority over the specific ones.
///
/// `fields` maps a header name (any case) to a transform applied to that
/// header's decoded value, whether or not cleaning is enabled.
#[derive(Clone, Default)]
pub struct CleanHooks {
    pub all: Option<CleanFn>,
    pub headers: Option<CleanFn>,
    pub body: Option<CleanFn>,
    fields: BTreeMap<String, CleanFn>,
}

impl CleanHooks {
    pub fn for_headers(&self) -> Option<&CleanFn> {
        self.all.as_ref().or(self.headers.as_ref())
    }

    pub fn for_body(&self) -> Option<&CleanFn> {
        self.all.as_ref().or(self.body.as_ref())
    }

    /// Transform the named header with `transform`.
    pub fn with_field(mut self, name: &str, transform: CleanFn) -> Self {
        self.fields.insert(name.to_ascii_lowercase(), transform);
        self
    }

    pub fn for_field(&self, name: &str) -> Option<&CleanFn> {
        self.fields.get(&name.to_ascii_lowercase())
    }
}

impl fmt::Debug for CleanHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CleanHooks")
            .field("all", &self.all.is_some())
            .field("headers", &self.headers.is_some())
            .field("body", &self.body.is_some())
            .field("fields", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A cleaned body and what the cleaner replaced.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanedText {
    pub value: String,
    pub removed_url_count: usize,
    pub removed_address_count: usize,
}

/// Replace every match of `re` and count them.
fn replace_counted<'a>(re: &Regex, text: &'a str, with: &str) -> (Cow<'a, str>, usize) {
    let count = re.find_iter(text).count();
    if count == 0 {
        (Cow::Borrowed(text), 0)
    } else {
        (re.replace_all(text, with), count)
    }
}

/// Decode HTML character references the way a browser does.
///
/// Named references use the full HTML5 table. Legacy names are also
/// recognised without a semicolon or as the prefix of a longer word
/// (`&ampx` is `&x`). Unknown names are left untouched.
pub fn html_unescape(text: &str) -> Cow<'_, str> {
    if !text.contains('&') {
        return Cow::Borrowed(text);
    }
    ENTITY_RE.replace_all(text, |caps: &Captures<'_>| unescape_reference(&caps[1]))
}

fn unescape_reference(reference: &str) -> String {
    if let Some(number) = reference.strip_prefix('#') {
        let number = number.trim_end_matches(';');
        let code = match number.strip_prefix(['x', 'X']) {
            Some(hex) => u32::from_str_radix(hex, 16),
            None => number.parse::<u32>(),
        };
        return numeric_reference(code.unwrap_or(u32::MAX)).to_string();
    }

    if let Some(name) = reference.strip_suffix(';') {
        if let Some(value) = resolve_html5_entity(name) {
            return value.to_string();
        }
    } else if LEGACY_ENTITIES.contains(&reference) {
        if let Some(value) = resolve_html5_entity(reference) {
            return value.to_string();
        }
    }

    for end in (2..reference.len()).rev() {
        if !reference.is_char_boundary(end) {
            continue;
        }
        let (name, rest) = reference.split_at(end);
        if LEGACY_ENTITIES.contains(&name) {
            if let Some(value) = resolve_html5_entity(name) {
                return format!("{value}{rest}");
            }
        }
    }
    format!("&{reference}")
}

/// Invalid code points become U+FFFD; C1 controls are read as windows-1252.
fn numeric_reference(cp: u32) -> char {
    match cp {
        0 | 0xD800..=0xDFFF => '\u{FFFD}',
        0x80..=0x9F => {
            let byte = [cp as u8];
            let (decoded, _) = encoding_rs::WINDOWS_1252.decode_without_bom_handling(&byte);
            decoded.chars().next().unwrap_or('\u{FFFD}')
        }
        _ => char::from_u32(cp).unwrap_or('\u{FFFD}'),
    }
}

/// Clean a decoded header value.
///
/// Line breaks are removed, URLs become a single space and whitespace
/// runs are collapsed.
pub fn clean_header(value: &str, hook: Option<&CleanFn>) -> String {
    let text = LINE_BREAK_RE.replace_all(value, "");
    let text = text.replace('\n', "");
    let text = HEADER_URL_RE.replace_all(text.trim(), " ");
    let text = WHITESPACE_RE.replace_all(&text, " ");
    let text = text.trim();
    match hook {
        Some(hook) => hook(text),
        None => text.to_string(),
    }
}

/// Clean a decoded body (plain or HTML).
///
/// Markup removal and the counted replacements are repeated while HTML
/// unescaping still changes the text, so cleaning cleaned text is a no-op.
pub fn clean_body(value: &str, hook: Option<&CleanFn>) -> CleanedText {
    let mut removed_url_count = 0;
    let mut removed_address_count = 0;
    let mut text = value.to_string();
    loop {
        let stripped = strip_markup(&text);
        let (replaced, urls, addresses) = replace_links(&stripped);
        removed_url_count += urls;
        removed_address_count += addresses;
        let unescaped = html_unescape(&replaced).into_owned();
        let settled = unescaped == replaced;
        text = unescaped;
        if settled {
            break;
        }
    }

    let text = text.trim().replace(['\t', '\u{3000}'], "");
    let (text, urls, addresses) = replace_links(&text);
    removed_url_count += urls;
    removed_address_count += addresses;
    let text = WHITESPACE_RE.replace_all(&text, " ");
    let text = text.trim();

    let value = match hook {
        Some(hook) => hook(text),
        None => text.to_string(),
    };
    CleanedText {
        value,
        removed_url_count,
        removed_address_count,
    }
}

fn strip_markup(text: &str) -> String {
    let text = COMMENT_RE.replace_all(text, "");
    let text = STYLE_RE.replace_all(&text, "");
    let text = SCRIPT_RE.replace_all(&text, "");
    let text = TAG_RE.replace_all(&text, "");
    LINE_BREAK_RE.replace_all(&text, "\n").into_owned()
}

/// Replace URLs, then addresses. Returns the text and both counts.
fn replace_links(text: &str) -> (String, usize, usize) {
    let (text, urls) = replace_counted(&BODY_URL_RE, text, URL_PLACEHOLDER);
    let (text, addresses) = replace_counted(&ADDRESS_RE, &text, ADDRESS_PLACEHOLDER);
    (text.into_owned(), urls, addresses)
}
