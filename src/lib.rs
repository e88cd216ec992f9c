//! hostmerge - hosts and adblock list aggregation.
//!
//! This crate ingests block/allow lists published in two competing
//! conventions, classic hosts files and adblock (ABP) network rules,
//! normalizes them into one entry model and merges them across sources
//! with allow-list precedence. Operators can layer their own exact,
//! wildcard and regex filter rules on top; every pattern is screened for
//! catastrophic backtracking and regex rules run under a hard timeout.
//!
//! # Features
//!
//! - **Dual-syntax parsing**: hosts lines and `||domain^` / `@@||domain^` /
//!   `domain##selector` rules, never panicking on garbage input
//! - **Format detection**: heuristic sampling with a confidence threshold
//! - **Deduplication**: case-folded, sorted block and allow sets
//! - **Safe filter rules**: ReDoS screening plus bounded regex execution
//! - **Single-flight background runs**: triggers coalesce into at most one
//!   follow-up aggregation
//! - **Cached downloads**: ETag-aware HTTP fetching with gzip support
//!
//! # Quick Start
//!
//! ```
//! use hostmerge::aggregate::Aggregator;
//! use hostmerge::fetch::StaticFetcher;
//! use hostmerge::Source;
//!
//! let fetcher = StaticFetcher::new()
//!     .with("mem://hosts", "0.0.0.0 ads.example.com\n0.0.0.0 tracker.net")
//!     .with("mem://abp", "||tracker.net^\n@@||ads.example.com^");
//! let sources = vec![
//!     Source::new("hosts", "mem://hosts"),
//!     Source::new("abp", "mem://abp"),
//! ];
//!
//! let outcome = Aggregator::new().aggregate(&sources, &fetcher);
//! assert_eq!(outcome.blocked_domains, vec!["tracker.net"]);
//! assert_eq!(outcome.allowed_domains, vec!["ads.example.com"]);
//! ```
//!
//! # Filter Rules
//!
//! ```
//! use hostmerge::filter::{FilterEngine, NewRule};
//! use hostmerge::{FilterError, RuleType};
//!
//! let engine = FilterEngine::new();
//! engine.add_rule(NewRule::new(r"^ad\d+\.", RuleType::Regex)).unwrap();
//!
//! let err = engine.add_rule(NewRule::new("(a+)+$", RuleType::Regex)).unwrap_err();
//! assert!(matches!(err, FilterError::PatternRedosRisk { .. }));
//!
//! assert!(engine.test_domain("ad42.tracker.net").is_blocked());
//! ```

mod entry;
mod error;
mod rule_type;
mod source;

pub mod aggregate;
pub mod config;
pub mod converter;
pub mod coordinator;
pub mod domain;
pub mod fetch;
pub mod filter;
pub mod metadata;
pub mod store;

pub use aggregate::{AggregationOutcome, Aggregator, SourceContribution, SourceStatus};
pub use config::AppConfig;
pub use converter::{parse_content, DetectionResult, FormatDetector, ListFormat};
pub use coordinator::{AutoAggregator, TriggerOutcome};
pub use domain::{is_valid_adblock_domain, is_valid_domain};
pub use entry::{Entry, EntryKind};
pub use error::{Error, ExecError, FetchError, FilterError, Result};
pub use fetch::{FetchedContent, SourceFetcher};
pub use filter::{FilterEngine, FilterResult, FilterRule};
pub use rule_type::RuleType;
pub use source::Source;
