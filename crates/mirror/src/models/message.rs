//! Message identities flowing through the fetch-and-deliver pipeline

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::TagPolicy;

/// Protocol-level message identifier (the `Message-ID` header value)
///
/// Always stored in normalized form: one layer of surrounding angle
/// brackets or double quotes is stripped on construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Create a message id, normalizing the raw header value
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(Self::normalize(raw.as_ref()).to_string())
    }

    /// Create an identifier for a message that carries no `Message-ID`,
    /// derived from its content hash
    pub fn synthetic(content_hash: &str) -> Self {
        Self(format!("synthetic-{}", content_hash))
    }

    /// Parse an optional raw header value, treating blank values as absent
    pub fn parse(raw: &str) -> Option<Self> {
        let id = Self::new(raw.trim());
        if id.0.is_empty() { None } else { Some(id) }
    }

    /// Strip exactly one layer of surrounding `<...>` or `"..."`
    pub fn normalize(raw: &str) -> &str {
        let stripped = raw
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
            .or_else(|| raw.strip_prefix('"').and_then(|s| s.strip_suffix('"')));
        stripped.unwrap_or(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// A remote message that is newer than the cursor and not yet indexed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateMessage {
    /// Remote folder the message lives in
    pub folder: String,
    /// Server-assigned UID within the folder
    pub uid: u32,
    /// Normalized identifier, if the envelope carried one
    pub message_id: Option<MessageId>,
}

/// A message durably committed to the local store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredFile {
    /// Absolute path of the file in the folder's `cur` directory
    pub path: PathBuf,
    /// Lowercase hex SHA-256 of the file contents
    pub content_hash: String,
}

/// Handoff record for the search/tag index
#[derive(Debug, Clone)]
pub struct IndexUpdate {
    /// File to add to the index
    pub path: PathBuf,
    /// Identifier the index should file the message under
    pub message_id: MessageId,
    /// Tag operations to apply once the message is new to the index
    pub tags: TagPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_brackets() {
        assert_eq!(MessageId::new("<abc@example.com>").as_str(), "abc@example.com");
    }

    #[test]
    fn test_normalize_quotes() {
        assert_eq!(MessageId::new("\"abc@example.com\"").as_str(), "abc@example.com");
    }

    #[test]
    fn test_normalize_strips_one_layer_only() {
        assert_eq!(MessageId::new("<<abc>>").as_str(), "<abc>");
        assert_eq!(MessageId::new("\"<abc>\"").as_str(), "<abc>");
    }

    #[test]
    fn test_normalize_unbalanced_is_untouched() {
        assert_eq!(MessageId::new("<abc").as_str(), "<abc");
        assert_eq!(MessageId::new("abc>").as_str(), "abc>");
        assert_eq!(MessageId::new("<abc\"").as_str(), "<abc\"");
        assert_eq!(MessageId::new("plain@id").as_str(), "plain@id");
    }

    #[test]
    fn test_parse_blank() {
        assert_eq!(MessageId::parse(""), None);
        assert_eq!(MessageId::parse("  "), None);
        assert_eq!(MessageId::parse("<>"), None);
        assert_eq!(MessageId::parse(" <a@b> "), Some(MessageId::new("a@b")));
    }

    #[test]
    fn test_synthetic() {
        assert_eq!(MessageId::synthetic("00ff").as_str(), "synthetic-00ff");
    }
}
