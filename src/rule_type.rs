//! Filter rule type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// RuleType is how a filter rule's pattern is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    /// Block the domain (exact, `*`/`?` wildcards allowed)
    Block,
    /// Allow the domain (exact, `*`/`?` wildcards allowed)
    Allow,
    /// Block by wildcard pattern
    Wildcard,
    /// Block by regular expression, evaluated under a timeout
    Regex,
}

impl RuleType {
    /// Parse a rule type from a string (case-insensitive).
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "block" | "deny" => Some(RuleType::Block),
            "allow" | "exception" => Some(RuleType::Allow),
            "wildcard" | "glob" => Some(RuleType::Wildcard),
            "regex" | "regexp" => Some(RuleType::Regex),
            _ => None,
        }
    }

    /// Get the canonical string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            RuleType::Block => "block",
            RuleType::Allow => "allow",
            RuleType::Wildcard => "wildcard",
            RuleType::Regex => "regex",
        }
    }

    /// Whether a match means the domain is allowed rather than blocked.
    pub fn is_allow(&self) -> bool {
        matches!(self, RuleType::Allow)
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for RuleType {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s).ok_or_else(|| crate::Error::InvalidRuleType(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_type_from_str() {
        assert_eq!(RuleType::parse("block"), Some(RuleType::Block));
        assert_eq!(RuleType::parse("ALLOW"), Some(RuleType::Allow));
        assert_eq!(RuleType::parse("Wildcard"), Some(RuleType::Wildcard));
        assert_eq!(RuleType::parse("regex"), Some(RuleType::Regex));
        assert_eq!(RuleType::parse("regexp"), Some(RuleType::Regex));
        assert_eq!(RuleType::parse("DOMAIN"), None);
        assert!("DOMAIN".parse::<RuleType>().is_err());
    }

    #[test]
    fn test_rule_type_display_roundtrip() {
        for rule_type in [
            RuleType::Block,
            RuleType::Allow,
            RuleType::Wildcard,
            RuleType::Regex,
        ] {
            assert_eq!(RuleType::parse(&rule_type.to_string()), Some(rule_type));
        }
    }

    #[test]
    fn test_is_allow() {
        assert!(RuleType::Allow.is_allow());
        assert!(!RuleType::Block.is_allow());
        assert!(!RuleType::Regex.is_allow());
    }
}
