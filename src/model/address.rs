//! Email address lists (RFC 5322 §3.4), parsed from decoded header text.

use serde::Serialize;

/// One mailbox from a To/Cc/From header.
///
/// # Examples
/// - `"山田 太郎 <taro@example.jp>"` → `display_name = "山田 太郎"`, `address = "taro@example.jp"`
/// - `"user@example.com"` → `display_name = ""`, `address = "user@example.com"`
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EmailAddress {
    pub display_name: String,
    pub address: String,
}

impl EmailAddress {
    /// Parse a single mailbox.
    ///
    /// Accepts `user@domain`, `<user@domain>`, `Name <user@domain>`,
    /// `"Quoted, Name" <user@domain>` and the obsolete
    /// `user@domain (Name)` form. Anything else is kept as the address.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();

        if let (Some(open), Some(close)) = (trimmed.rfind('<'), trimmed.rfind('>')) {
            if close > open {
                return Self {
                    display_name: unquote(&trimmed[..open]),
                    address: trimmed[open + 1..close].trim().to_string(),
                };
            }
        }

        if let (Some(open), true) = (trimmed.find('('), trimmed.ends_with(')')) {
            let address = trimmed[..open].trim();
            if address.contains('@') {
                return Self {
                    display_name: trimmed[open + 1..trimmed.len() - 1].trim().to_string(),
                    address: address.to_string(),
                };
            }
        }

        Self {
            display_name: String::new(),
            address: trimmed.to_string(),
        }
    }

    /// Parse an address list.
    ///
    /// Commas inside quotes or angle brackets do not split. Group syntax
    /// (`Team: a@b.com, c@d.com;`) is flattened into its members, and empty
    /// groups such as `undisclosed-recipients:;` yield nothing.
    pub fn parse_list(raw: &str) -> Vec<Self> {
        let mut results = Vec::new();
        let mut current = String::new();
        let mut in_quotes = false;
        let mut in_angle = false;
        let mut escaped = false;

        let mut flush = |current: &mut String| {
            let addr = Self::parse(current);
            if !addr.address.is_empty() {
                results.push(addr);
            }
            current.clear();
        };

        for ch in raw.chars() {
            if escaped {
                current.push(ch);
                escaped = false;
                continue;
            }
            match ch {
                '\\' if in_quotes => {
                    current.push(ch);
                    escaped = true;
                }
                '"' => {
                    in_quotes = !in_quotes;
                    current.push(ch);
                }
                '<' if !in_quotes => {
                    in_angle = true;
                    current.push(ch);
                }
                '>' if !in_quotes => {
                    in_angle = false;
                    current.push(ch);
                }
                // Group display name: drop it, keep the members
                ':' if !in_quotes && !in_angle => current.clear(),
                ',' | ';' if !in_quotes && !in_angle => flush(&mut current),
                _ => current.push(ch),
            }
        }
        flush(&mut current);

        results
    }

    /// `"Display Name <address>"` or just `"address"`.
    pub fn display(&self) -> String {
        if self.display_name.is_empty() {
            self.address.clone()
        } else {
            format!("{} <{}>", self.display_name, self.address)
        }
    }
}

/// Display names of a list, joined for a single CSV cell.
pub fn join_names(list: &[EmailAddress]) -> String {
    list.iter()
        .map(|a| a.display_name.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Bare addresses of a list, joined for a single CSV cell.
pub fn join_addresses(list: &[EmailAddress]) -> String {
    list.iter()
        .map(|a| a.address.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Strip surrounding double quotes and unescape quoted pairs.
fn unquote(s: &str) -> String {
    let trimmed = s.trim();
    match trimmed
        .strip_prefix('"')
        .and_then(|rest| rest.strip_suffix('"'))
    {
        Some(inner) => {
            let mut out = String::with_capacity(inner.len());
            let mut chars = inner.chars();
            while let Some(c) = chars.next() {
                if c == '\\' {
                    if let Some(next) = chars.next() {
                        out.push(next);
                    }
                } else {
                    out.push(c);
                }
            }
            out.trim().to_string()
        }
        None => trimmed.to_string(),
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display())
    }
}
