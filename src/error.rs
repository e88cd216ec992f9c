//! Error types for hostmerge.

use std::time::Duration;
use thiserror::Error;

/// Error type for hostmerge operations.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON encoding/decoding error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid list format name
    #[error("invalid list format: {0}")]
    InvalidFormat(String),

    /// Invalid filter rule type name
    #[error("invalid filter rule type: {0}")]
    InvalidRuleType(String),

    /// Filter rule registration or lookup failure
    #[error(transparent)]
    Filter(#[from] FilterError),

    /// Source fetch failure
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Aggregation task failure
    #[error("aggregation error: {0}")]
    Aggregation(String),
}

/// Result type alias for hostmerge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for filter rule operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// Pattern failed safety analysis
    #[error("invalid pattern '{pattern}': {}", .issues.join("; "))]
    PatternInvalid { pattern: String, issues: Vec<String> },

    /// Pattern flagged as catastrophic-backtracking risk
    #[error("pattern '{pattern}' rejected as ReDoS risk: {}", .issues.join("; "))]
    PatternRedosRisk { pattern: String, issues: Vec<String> },

    /// No rule with this id
    #[error("filter rule not found: {0}")]
    RuleNotFound(String),
}

/// Error type for bounded pattern execution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// Match did not finish within the budget
    #[error("pattern execution timed out after {0:?}")]
    Timeout(Duration),

    /// Worker thread could not be started or died mid-match
    #[error("pattern worker failed: {0}")]
    Worker(String),
}

/// Error type for source retrieval.
#[derive(Error, Debug)]
pub enum FetchError {
    /// Remote returned a non-success status
    #[error("HTTP {status} fetching {url}")]
    Status { url: String, status: u16 },

    /// Connection or protocol failure
    #[error("transport error fetching {url}: {message}")]
    Transport { url: String, message: String },

    /// Local read failure
    #[error("IO error reading {location}: {source}")]
    Io {
        location: String,
        #[source]
        source: std::io::Error,
    },

    /// Body was not decodable text
    #[error("invalid content from {0}: {1}")]
    Decode(String, String),

    /// Scheme the fetcher does not handle
    #[error("unsupported source location: {0}")]
    Unsupported(String),

    /// No content registered (in-memory fetchers)
    #[error("no content for source {0}")]
    Missing(String),
}
