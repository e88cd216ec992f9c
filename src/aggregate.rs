//! Cross-source aggregation.
//!
//! An [`Aggregator`] walks a list of sources, fetches and parses each one
//! inside its own error boundary, then merges every entry into sorted
//! block and allow sets with allow precedence. Each call builds a fresh
//! [`AggregationOutcome`]; nothing is carried across runs.

use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use crate::converter::{parse_content, DetectionResult, FormatDetector, ListFormat};
use crate::fetch::SourceFetcher;
use crate::filter::FilterEngine;
use crate::metadata::system_time_serde;
use crate::{Entry, EntryKind, Source};

/// How a source fared in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceStatus {
    Success,
    Error,
    /// Content was served from a cache
    Cached,
    /// Source is disabled
    Skipped,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Success => "SUCCESS",
            SourceStatus::Error => "ERROR",
            SourceStatus::Cached => "CACHED",
            SourceStatus::Skipped => "SKIPPED",
        }
    }

    /// Whether the source contributed content.
    pub fn is_ok(&self) -> bool {
        matches!(self, SourceStatus::Success | SourceStatus::Cached)
    }
}

impl std::fmt::Display for SourceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-source record in an outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceContribution {
    pub source_id: String,
    pub name: String,
    pub url: String,
    pub status: SourceStatus,
    /// Entries parsed from this source, all kinds
    pub entry_count: usize,
    pub fetch_duration_ms: u64,
    /// Detection run over the fetched text
    pub detection: Option<DetectionResult>,
    /// Format actually used to parse
    pub format: Option<ListFormat>,
    pub error: Option<String>,
}

impl SourceContribution {
    fn new(source: &Source, status: SourceStatus) -> Self {
        Self {
            source_id: source.id.clone(),
            name: source.display_name().to_string(),
            url: source.url.clone(),
            status,
            entry_count: 0,
            fetch_duration_ms: 0,
            detection: None,
            format: None,
            error: None,
        }
    }
}

/// Result of one aggregation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationOutcome {
    /// Sources that contributed content (SUCCESS or CACHED)
    pub total_sources: usize,
    /// Raw entries of every kind, before deduplication
    pub total_entries: usize,
    /// Size of the final block set
    pub unique_entries: usize,
    /// Sorted, lowercased
    pub blocked_domains: Vec<String>,
    /// Sorted, lowercased
    pub allowed_domains: Vec<String>,
    /// Sorted, deduplicated element-hiding rules
    pub element_rules: Vec<String>,
    pub duplicates_removed: usize,
    /// Block entries dropped because an allow entry covers them
    pub allow_excluded: usize,
    /// Blocked domains moved to the allow set by filter rules
    pub filtered_by_rules: usize,
    pub processing_time_ms: u64,
    pub sources: Vec<SourceContribution>,
    #[serde(default, with = "system_time_serde")]
    pub completed_at: Option<SystemTime>,
}

impl AggregationOutcome {
    /// Contributions with a given status.
    pub fn sources_with_status(&self, status: SourceStatus) -> impl Iterator<Item = &SourceContribution> {
        self.sources.iter().filter(move |s| s.status == status)
    }

    /// Whether the run had no source to work with, as opposed to all sources failing.
    pub fn had_no_enabled_sources(&self) -> bool {
        self.sources.iter().all(|s| s.status == SourceStatus::Skipped)
    }
}

/// Deduplicated view of a set of entries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeResult {
    pub blocked: Vec<String>,
    pub allowed: Vec<String>,
    pub element_rules: Vec<String>,
    /// Raw block-kind entries seen
    pub raw_block_entries: usize,
    /// Raw block-kind entries whose domain is allowed
    pub allow_excluded: usize,
    /// First source that blocked each domain
    first_source: AHashMap<String, String>,
}

impl MergeResult {
    /// Repeated block entries collapsed by the merge.
    pub fn duplicates_removed(&self) -> usize {
        self.raw_block_entries
            .saturating_sub(self.allow_excluded)
            .saturating_sub(self.blocked.len())
    }

    /// Id of the first source that blocked `domain`.
    pub fn first_source(&self, domain: &str) -> Option<&str> {
        self.first_source.get(domain).map(String::as_str)
    }
}

/// Merge entries into sorted block/allow sets.
///
/// Allow entries are collected first, so an allow for a domain removes
/// every block for it no matter which source or line came first. Domains
/// are compared and returned lowercased.
///
/// # Example
/// ```
/// use hostmerge::aggregate::merge_entries;
/// use hostmerge::converter::{parse_content, ListFormat};
///
/// let entries = parse_content("||ads.com^\n@@||ok.com^\n||ok.com^", "s", ListFormat::Adblock);
/// let merged = merge_entries(&entries);
/// assert_eq!(merged.blocked, vec!["ads.com"]);
/// assert_eq!(merged.allowed, vec!["ok.com"]);
/// ```
pub fn merge_entries(entries: &[Entry]) -> MergeResult {
    let allow: AHashSet<String> = entries
        .iter()
        .filter(|e| e.kind() == EntryKind::Allow)
        .map(|e| e.domain().to_lowercase())
        .collect();

    let mut block: AHashSet<String> = AHashSet::new();
    let mut elements: AHashSet<&str> = AHashSet::new();
    let mut first_source = AHashMap::new();
    let mut raw_block_entries = 0;
    let mut allow_excluded = 0;

    for entry in entries {
        match entry.kind() {
            EntryKind::Block => {
                raw_block_entries += 1;
                let domain = entry.domain().to_lowercase();
                if allow.contains(&domain) {
                    allow_excluded += 1;
                    continue;
                }
                first_source
                    .entry(domain.clone())
                    .or_insert_with(|| entry.source_id().to_string());
                block.insert(domain);
            }
            EntryKind::Element => {
                if let Some(raw) = entry.raw_pattern() {
                    elements.insert(raw);
                }
            }
            EntryKind::Allow => {}
        }
    }

    let mut blocked: Vec<String> = block.into_iter().collect();
    blocked.sort_unstable();
    let mut allowed: Vec<String> = allow.into_iter().collect();
    allowed.sort_unstable();
    let mut element_rules: Vec<String> = elements.into_iter().map(str::to_string).collect();
    element_rules.sort_unstable();

    MergeResult {
        blocked,
        allowed,
        element_rules,
        raw_block_entries,
        allow_excluded,
        first_source,
    }
}

/// Aggregates sources into one outcome.
///
/// # Example
/// ```
/// use hostmerge::aggregate::Aggregator;
/// use hostmerge::fetch::StaticFetcher;
/// use hostmerge::Source;
///
/// let fetcher = StaticFetcher::new()
///     .with("mem://a", "0.0.0.0 example.com\n0.0.0.0 unique1.com")
///     .with("mem://b", "0.0.0.0 example.com\n0.0.0.0 unique2.com");
/// let sources = vec![Source::new("a", "mem://a"), Source::new("b", "mem://b")];
///
/// let outcome = Aggregator::new().aggregate(&sources, &fetcher);
/// assert_eq!(outcome.total_entries, 4);
/// assert_eq!(outcome.unique_entries, 3);
/// assert_eq!(outcome.duplicates_removed, 1);
/// ```
#[derive(Clone, Default)]
pub struct Aggregator {
    detector: FormatDetector,
    filter: Option<Arc<FilterEngine>>,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_detector(mut self, detector: FormatDetector) -> Self {
        self.detector = detector;
        self
    }

    /// Apply filter rules to the merged block set.
    ///
    /// A blocked domain matching an allow rule moves to the allow set.
    pub fn with_filter(mut self, filter: Arc<FilterEngine>) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Run one aggregation. Always returns an outcome, even if every source fails.
    pub fn aggregate(&self, sources: &[Source], fetcher: &dyn SourceFetcher) -> AggregationOutcome {
        let start = Instant::now();
        let mut entries: Vec<Entry> = Vec::new();
        let mut contributions = Vec::with_capacity(sources.len());

        for source in sources {
            if !source.enabled {
                log::debug!("Skipping disabled source {}", source.id);
                contributions.push(SourceContribution::new(source, SourceStatus::Skipped));
                continue;
            }

            let (contribution, parsed) = self.process_source(source, fetcher);
            entries.extend(parsed);
            contributions.push(contribution);
        }

        let mut merged = merge_entries(&entries);
        let duplicates_removed = merged.duplicates_removed();
        let filtered_by_rules = self.apply_filter(&mut merged);

        let total_sources = contributions.iter().filter(|c| c.status.is_ok()).count();
        let outcome = AggregationOutcome {
            total_sources,
            total_entries: entries.len(),
            unique_entries: merged.blocked.len(),
            duplicates_removed,
            allow_excluded: merged.allow_excluded,
            filtered_by_rules,
            blocked_domains: merged.blocked,
            allowed_domains: merged.allowed,
            element_rules: merged.element_rules,
            processing_time_ms: start.elapsed().as_millis() as u64,
            sources: contributions,
            completed_at: Some(SystemTime::now()),
        };

        log::info!(
            "Aggregated {}/{} sources: {} entries, {} blocked, {} allowed, {} duplicates in {}ms",
            outcome.total_sources,
            sources.len(),
            outcome.total_entries,
            outcome.unique_entries,
            outcome.allowed_domains.len(),
            outcome.duplicates_removed,
            outcome.processing_time_ms
        );

        outcome
    }

    /// Fetch, detect and parse one source inside its own error boundary.
    fn process_source(
        &self,
        source: &Source,
        fetcher: &dyn SourceFetcher,
    ) -> (SourceContribution, Vec<Entry>) {
        let start = Instant::now();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let content = fetcher.fetch(source).map_err(|e| e.to_string())?;
            let fetch_ms = start.elapsed().as_millis() as u64;

            let detection = self.detector.detect(&content.text);
            let format = detection.resolve(source.format);
            let entries = parse_content(&content.text, &source.id, format);
            Ok::<_, String>((content.from_cache, fetch_ms, detection, format, entries))
        }));

        let outcome = result.unwrap_or_else(|payload| Err(panic_message(payload.as_ref())));
        match outcome {
            Ok((from_cache, fetch_ms, detection, format, parsed)) => {
                let status = if from_cache {
                    SourceStatus::Cached
                } else {
                    SourceStatus::Success
                };
                log::debug!(
                    "Source {} ({}): {} entries as {} in {}ms",
                    source.id,
                    status,
                    parsed.len(),
                    format,
                    fetch_ms
                );

                let mut contribution = SourceContribution::new(source, status);
                contribution.entry_count = parsed.len();
                contribution.fetch_duration_ms = fetch_ms;
                contribution.detection = Some(detection);
                contribution.format = Some(format);
                (contribution, parsed)
            }
            Err(message) => {
                log::warn!("Source {} failed: {}", source.id, message);
                let mut contribution = SourceContribution::new(source, SourceStatus::Error);
                contribution.fetch_duration_ms = start.elapsed().as_millis() as u64;
                contribution.error = Some(message);
                (contribution, Vec::new())
            }
        }
    }

    /// Move blocked domains matched by allow rules into the allow set.
    ///
    /// Each regex evaluation starts a worker thread, so a pass costs one
    /// thread per blocked domain and regex rule. Without an enabled allow
    /// rule nothing can be released and the pass is skipped.
    fn apply_filter(&self, merged: &mut MergeResult) -> usize {
        let Some(filter) = self.filter.as_ref() else {
            return 0;
        };
        if !filter.has_enabled_allow_rules() {
            return 0;
        }

        let mut released = Vec::new();
        merged.blocked.retain(|domain| {
            let result = match merged.first_source.get(domain) {
                Some(source_id) => filter.test_domain_for_source(domain, source_id),
                None => filter.test_domain(domain),
            };
            if result.is_allowed() {
                released.push(domain.clone());
                false
            } else {
                true
            }
        });

        let count = released.len();
        if count > 0 {
            log::debug!("Filter rules released {} blocked domains", count);
            merged.allowed.extend(released);
            merged.allowed.sort_unstable();
            merged.allowed.dedup();
        }
        count
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("panic: {}", s)
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("panic: {}", s)
    } else {
        "panic while processing source".to_string()
    }
}
