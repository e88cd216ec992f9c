//! Canonical list entries produced by the parsers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// EntryKind is what an entry asks the sinkhole to do with its domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Sinkhole the domain
    #[default]
    Block,
    /// Exception that overrides any block for the domain
    Allow,
    /// Cosmetic element-hiding rule, no DNS meaning
    Element,
}

impl EntryKind {
    /// Parse an entry kind from a string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "block" => Some(EntryKind::Block),
            "allow" => Some(EntryKind::Allow),
            "element" => Some(EntryKind::Element),
            _ => None,
        }
    }

    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryKind::Block => "block",
            EntryKind::Allow => "allow",
            EntryKind::Element => "element",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single parsed list entry.
///
/// Entries are immutable once produced: the domain is always non-empty and
/// element entries always carry the raw pattern they were parsed from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    domain: String,
    source_id: String,
    kind: EntryKind,
    line_number: usize,
    raw_pattern: Option<String>,
}

impl Entry {
    /// Entry from a standard hosts line (no raw pattern kept).
    pub(crate) fn hosts(domain: &str, source_id: &str, line_number: usize) -> Self {
        Self {
            domain: domain.to_string(),
            source_id: source_id.to_string(),
            kind: EntryKind::Block,
            line_number,
            raw_pattern: None,
        }
    }

    /// Entry from an adblock line, keeping the full original text.
    pub(crate) fn adblock(
        domain: &str,
        source_id: &str,
        kind: EntryKind,
        line_number: usize,
        raw_pattern: &str,
    ) -> Self {
        Self {
            domain: domain.to_string(),
            source_id: source_id.to_string(),
            kind,
            line_number,
            raw_pattern: Some(raw_pattern.to_string()),
        }
    }

    /// The domain as it appeared in the source.
    pub fn domain(&self) -> &str {
        &self.domain
    }

    /// Identifier of the source this entry came from.
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// 1-based line in the source text.
    pub fn line_number(&self) -> usize {
        self.line_number
    }

    /// Original pattern text for adblock-origin entries.
    pub fn raw_pattern(&self) -> Option<&str> {
        self.raw_pattern.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_kind_parse() {
        assert_eq!(EntryKind::parse("block"), Some(EntryKind::Block));
        assert_eq!(EntryKind::parse("ALLOW"), Some(EntryKind::Allow));
        assert_eq!(EntryKind::parse("Element"), Some(EntryKind::Element));
        assert_eq!(EntryKind::parse("reject"), None);
    }

    #[test]
    fn test_entry_kind_display() {
        assert_eq!(EntryKind::Block.to_string(), "block");
        assert_eq!(EntryKind::Allow.to_string(), "allow");
        assert_eq!(EntryKind::Element.to_string(), "element");
    }

    #[test]
    fn test_hosts_entry_has_no_raw_pattern() {
        let entry = Entry::hosts("Example.com", "src-1", 3);
        assert_eq!(entry.domain(), "Example.com");
        assert_eq!(entry.source_id(), "src-1");
        assert_eq!(entry.kind(), EntryKind::Block);
        assert_eq!(entry.line_number(), 3);
        assert!(entry.raw_pattern().is_none());
    }

    #[test]
    fn test_adblock_entry_keeps_raw_pattern() {
        let entry = Entry::adblock("ads.com", "s", EntryKind::Element, 1, "ads.com##.banner");
        assert_eq!(entry.raw_pattern(), Some("ads.com##.banner"));
    }
}
