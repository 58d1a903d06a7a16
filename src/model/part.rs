//! MIME parts as handed from the walker to the body extractor.

/// Content of a part after transfer decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Raw bytes still in the part's charset.
    Bytes(Vec<u8>),
    /// Text that is already decoded and needs no charset handling.
    Text(String),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Self::Bytes(b) => b.len(),
            Self::Text(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The payload as bytes, for parts that are kept undecoded.
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Bytes(b) => b,
            Self::Text(t) => t.into_bytes(),
        }
    }
}

/// One leaf or container part of a message, in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPart {
    /// `maintype/subtype`, lowercase.
    pub content_type: String,
    /// The `charset` parameter, verbatim.
    pub declared_charset: Option<String>,
    pub payload: Payload,
    /// From `Content-Disposition: filename` or `Content-Type: name`.
    pub filename: Option<String>,
}

impl RawPart {
    pub fn maintype(&self) -> &str {
        self.content_type
            .split_once('/')
            .map_or(self.content_type.as_str(), |(main, _)| main)
    }

    pub fn is_multipart(&self) -> bool {
        self.maintype() == "multipart"
    }

    pub fn is_image(&self) -> bool {
        self.maintype() == "image"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn part(content_type: &str) -> RawPart {
        RawPart {
            content_type: content_type.to_string(),
            declared_charset: None,
            payload: Payload::Bytes(Vec::new()),
            filename: None,
        }
    }

    #[test]
    fn test_maintype() {
        assert_eq!(part("multipart/mixed").maintype(), "multipart");
        assert!(part("multipart/alternative").is_multipart());
        assert!(part("image/png").is_image());
        assert_eq!(part("text").maintype(), "text");
    }

    #[test]
    fn test_payload_len() {
        assert_eq!(Payload::Text("abc".into()).len(), 3);
        assert!(Payload::Bytes(Vec::new()).is_empty());
        assert_eq!(Payload::Text("é".into()).into_bytes(), vec![0xC3, 0xA9]);
    }
}
