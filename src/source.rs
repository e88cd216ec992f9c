//! List source definitions.

use serde::{Deserialize, Serialize};

use crate::converter::ListFormat;

/// A hosts or adblock list to aggregate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Opaque identifier carried on every entry
    pub id: String,
    /// Display name
    #[serde(default)]
    pub name: String,
    /// `http(s)://` URL, `file://` URL or local path
    pub url: String,
    /// Pinned format; `auto` runs detection
    #[serde(default)]
    pub format: ListFormat,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl Source {
    /// Create an enabled source with format detection.
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            url: url.into(),
            format: ListFormat::Auto,
            enabled: true,
        }
    }

    /// Pin the list format instead of detecting it.
    pub fn with_format(mut self, format: ListFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Name for logs, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_builder() {
        let source = Source::new("ads", "https://example.com/hosts.txt")
            .with_format(ListFormat::Standard)
            .with_name("Ad servers");
        assert_eq!(source.id, "ads");
        assert_eq!(source.display_name(), "Ad servers");
        assert_eq!(source.format, ListFormat::Standard);
        assert!(source.enabled);
        assert!(!source.disabled().enabled);
    }

    #[test]
    fn test_source_yaml_defaults() {
        let source: Source = serde_yaml::from_str("id: x\nurl: /tmp/x.txt\n").unwrap();
        assert_eq!(source.format, ListFormat::Auto);
        assert!(source.enabled);
        assert_eq!(source.display_name(), "x");
    }
}
