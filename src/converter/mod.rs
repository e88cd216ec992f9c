//! Format converters for hosts and adblock lists.
//!
//! Raw list text comes in one of two conventions:
//! - **standard**: `<ip> <domain> [domain...]`, `#` comments
//! - **adblock**: `||domain^`, `@@||domain^`, `domain##selector`, `!` comments
//!
//! [`parse_content`] turns either into canonical [`Entry`] values, and the
//! functions in [`render`] turn entries or aggregated domain sets back into
//! list text.

mod adblock;
mod detect;
mod hosts;
pub mod render;

pub use adblock::parse_adblock;
pub use detect::{DetectionResult, FormatDetector, DEFAULT_CONFIDENCE_THRESHOLD, MAX_SAMPLE_LINES};
pub use hosts::parse_standard_hosts;
pub use render::{to_adblock_lines, to_standard_lines};

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Entry, Error};

/// ListFormat names the textual convention of a list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListFormat {
    /// Classic hosts-file syntax
    Standard,
    /// Adblock Plus pattern syntax
    Adblock,
    /// Unknown or mixed, decided per line
    #[default]
    Auto,
}

impl ListFormat {
    /// Parse a format from a string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "standard" | "hosts" => Some(ListFormat::Standard),
            "adblock" | "abp" => Some(ListFormat::Adblock),
            "auto" => Some(ListFormat::Auto),
            _ => None,
        }
    }

    /// Get the canonical string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ListFormat::Standard => "standard",
            ListFormat::Adblock => "adblock",
            ListFormat::Auto => "auto",
        }
    }
}

impl fmt::Display for ListFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ListFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| Error::InvalidFormat(s.to_string()))
    }
}

/// Parse raw list text into entries using the given format.
///
/// Lines that cannot be classified contribute nothing; this never fails.
/// With [`ListFormat::Auto`] each line is routed by its own shape, so a
/// mixed list still yields whatever both grammars recognize.
///
/// # Example
/// ```
/// use hostmerge::converter::{parse_content, ListFormat};
///
/// let entries = parse_content("0.0.0.0 ads.com tracker.net", "src", ListFormat::Standard);
/// assert_eq!(entries.len(), 2);
/// ```
pub fn parse_content(text: &str, source_id: &str, format: ListFormat) -> Vec<Entry> {
    match format {
        ListFormat::Standard => parse_standard_hosts(text, source_id),
        ListFormat::Adblock => parse_adblock(text, source_id),
        ListFormat::Auto => parse_mixed(text, source_id),
    }
}

fn parse_mixed(text: &str, source_id: &str) -> Vec<Entry> {
    let mut entries = Vec::new();

    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        let line_number = idx + 1;

        if adblock::looks_like_adblock(line) {
            entries.extend(adblock::parse_line(line, source_id, line_number));
        } else {
            hosts::parse_line(line, source_id, line_number, &mut entries);
        }
    }

    entries
}
