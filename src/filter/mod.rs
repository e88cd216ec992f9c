//! Operator-defined filter rules evaluated per domain.
//!
//! A [`FilterEngine`] owns a set of rules (exact, wildcard and regex) and
//! evaluates domains against them in priority order. Every pattern passes
//! the [`SafetyAnalyzer`] before it is stored, and regex rules run under a
//! [`BoundedExecutor`] so a pathological pattern can stall at most one
//! evaluation before it is disabled.

mod executor;
mod safety;

pub use executor::{BoundedExecutor, PatternMatcher, TimeoutTier};
pub use safety::{
    PatternStats, SafetyAnalyzer, SafetyLimits, SafetyReport, MAX_COMPLEXITY,
    UNBOUNDED_COMPLEXITY,
};

use ahash::AHashMap;
use parking_lot::RwLock;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{ExecError, FilterError};
use crate::RuleType;

/// A stored filter rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterRule {
    /// Generated identifier
    pub id: String,
    pub pattern: String,
    pub rule_type: RuleType,
    /// Lower values are evaluated first
    pub priority: i32,
    pub enabled: bool,
    /// Restrict the rule to entries from one source
    pub source_id: Option<String>,
}

/// Parameters for a new rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRule {
    pub pattern: String,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub source_id: Option<String>,
}

fn default_enabled() -> bool {
    true
}

impl NewRule {
    /// An enabled, unscoped rule at priority 0.
    pub fn new(pattern: impl Into<String>, rule_type: RuleType) -> Self {
        Self {
            pattern: pattern.into(),
            rule_type,
            priority: 0,
            enabled: true,
            source_id: None,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

/// Partial update of an existing rule; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleUpdate {
    pub pattern: Option<String>,
    pub rule_type: Option<RuleType>,
    pub priority: Option<i32>,
    pub enabled: Option<bool>,
    pub source_id: Option<Option<String>>,
}

/// Outcome of evaluating one domain.
#[derive(Debug, Clone)]
pub struct FilterResult {
    pub matched: bool,
    /// The first matching rule
    pub rule: Option<FilterRule>,
    pub elapsed: Duration,
    /// Rules disabled during this evaluation because they timed out
    pub disabled_rules: Vec<String>,
}

impl FilterResult {
    /// Matched a rule that blocks.
    pub fn is_blocked(&self) -> bool {
        self.rule.as_ref().map_or(false, |r| !r.rule_type.is_allow())
    }

    /// Matched an allow rule.
    pub fn is_allowed(&self) -> bool {
        self.rule.as_ref().map_or(false, |r| r.rule_type.is_allow())
    }
}

/// Compiled form of a rule pattern.
#[derive(Clone)]
enum CompiledPattern {
    /// Lowercased exact domain
    Exact(String),
    /// Anchored wildcard, cheap enough to run inline
    Wildcard(Arc<Regex>),
    /// User regex, run under the executor
    Regex(Arc<Regex>),
}

impl CompiledPattern {
    fn compile(pattern: &str, rule_type: RuleType) -> Result<Self, regex::Error> {
        match rule_type {
            RuleType::Regex => {
                let regex = RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .size_limit(safety::REGEX_SIZE_LIMIT)
                    .build()?;
                Ok(CompiledPattern::Regex(Arc::new(regex)))
            }
            RuleType::Wildcard => Ok(CompiledPattern::Wildcard(Arc::new(compile_wildcard(
                pattern,
            )?))),
            RuleType::Block | RuleType::Allow => {
                if safety::has_wildcard_meta(pattern) {
                    Ok(CompiledPattern::Wildcard(Arc::new(compile_wildcard(
                        pattern,
                    )?)))
                } else {
                    Ok(CompiledPattern::Exact(pattern.trim().to_lowercase()))
                }
            }
        }
    }
}

/// Compile `*`/`?` wildcards into an anchored, case-insensitive regex.
fn compile_wildcard(pattern: &str) -> Result<Regex, regex::Error> {
    let mut re = String::with_capacity(pattern.len() * 2 + 2);
    re.push('^');
    for c in pattern.trim().chars() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            other => re.push_str(&regex::escape(&other.to_string())),
        }
    }
    re.push('$');
    RegexBuilder::new(&re).case_insensitive(true).build()
}

struct StoredRule {
    rule: FilterRule,
    /// Insertion order, breaks priority ties
    seq: u64,
    /// Bumped by every update
    generation: u64,
    compiled: CompiledPattern,
}

/// Priority-ordered filter rule engine.
///
/// Rules are held in a lock-protected map owned by the engine instance.
/// Evaluation works on a snapshot, so a slow regex never holds the lock.
///
/// # Example
/// ```
/// use hostmerge::filter::{FilterEngine, NewRule};
/// use hostmerge::RuleType;
///
/// let engine = FilterEngine::new();
/// engine.add_rule(NewRule::new("*.doubleclick.net", RuleType::Wildcard)).unwrap();
///
/// let result = engine.test_domain("ad.doubleclick.net");
/// assert!(result.matched);
/// assert!(result.is_blocked());
/// ```
pub struct FilterEngine {
    rules: RwLock<AHashMap<String, Arc<StoredRule>>>,
    next_seq: AtomicU64,
    analyzer: SafetyAnalyzer,
    executor: BoundedExecutor,
}

impl Default for FilterEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl FilterEngine {
    /// Create an engine with default analyzer limits and a 1 s regex timeout.
    pub fn new() -> Self {
        Self::with_components(SafetyAnalyzer::default(), BoundedExecutor::default())
    }

    /// Create an engine with a custom regex timeout.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_components(SafetyAnalyzer::default(), BoundedExecutor::new(timeout))
    }

    pub fn with_components(analyzer: SafetyAnalyzer, executor: BoundedExecutor) -> Self {
        Self {
            rules: RwLock::new(AHashMap::new()),
            next_seq: AtomicU64::new(1),
            analyzer,
            executor,
        }
    }

    pub fn analyzer(&self) -> &SafetyAnalyzer {
        &self.analyzer
    }

    pub fn executor(&self) -> &BoundedExecutor {
        &self.executor
    }

    /// Validate and store a rule.
    pub fn add_rule(&self, new_rule: NewRule) -> Result<FilterRule, FilterError> {
        let compiled = self.validate(&new_rule.pattern, new_rule.rule_type)?;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        let rule = FilterRule {
            id: format!("rule-{}", seq),
            pattern: new_rule.pattern,
            rule_type: new_rule.rule_type,
            priority: new_rule.priority,
            enabled: new_rule.enabled,
            source_id: new_rule.source_id,
        };

        log::debug!(
            "Added {} rule {} '{}' (priority {})",
            rule.rule_type,
            rule.id,
            rule.pattern,
            rule.priority
        );

        self.rules.write().insert(
            rule.id.clone(),
            Arc::new(StoredRule {
                rule: rule.clone(),
                seq,
                generation: 0,
                compiled,
            }),
        );
        Ok(rule)
    }

    /// Apply a partial update; the pattern is re-analyzed when it or the type changes.
    pub fn update_rule(&self, id: &str, update: RuleUpdate) -> Result<FilterRule, FilterError> {
        let mut rules = self.rules.write();
        let current = rules
            .get(id)
            .cloned()
            .ok_or_else(|| FilterError::RuleNotFound(id.to_string()))?;

        let mut rule = current.rule.clone();
        let pattern_changed = update.pattern.as_ref().map_or(false, |p| *p != rule.pattern);
        let type_changed = update.rule_type.map_or(false, |t| t != rule.rule_type);

        if let Some(pattern) = update.pattern {
            rule.pattern = pattern;
        }
        if let Some(rule_type) = update.rule_type {
            rule.rule_type = rule_type;
        }
        if let Some(priority) = update.priority {
            rule.priority = priority;
        }
        if let Some(enabled) = update.enabled {
            rule.enabled = enabled;
        }
        if let Some(source_id) = update.source_id {
            rule.source_id = source_id;
        }

        let compiled = if pattern_changed || type_changed {
            self.validate(&rule.pattern, rule.rule_type)?
        } else {
            current.compiled.clone()
        };

        rules.insert(
            id.to_string(),
            Arc::new(StoredRule {
                rule: rule.clone(),
                seq: current.seq,
                generation: current.generation + 1,
                compiled,
            }),
        );
        Ok(rule)
    }

    /// Remove a rule, returning it.
    pub fn remove_rule(&self, id: &str) -> Result<FilterRule, FilterError> {
        self.rules
            .write()
            .remove(id)
            .map(|stored| stored.rule.clone())
            .ok_or_else(|| FilterError::RuleNotFound(id.to_string()))
    }

    pub fn get_rule(&self, id: &str) -> Option<FilterRule> {
        self.rules.read().get(id).map(|stored| stored.rule.clone())
    }

    /// All rules in evaluation order.
    pub fn rules(&self) -> Vec<FilterRule> {
        self.ordered(|_| true)
            .into_iter()
            .map(|stored| stored.rule.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.rules.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.read().is_empty()
    }

    /// Whether any enabled rule can release a domain.
    pub fn has_enabled_allow_rules(&self) -> bool {
        self.rules
            .read()
            .values()
            .any(|stored| stored.rule.enabled && stored.rule.rule_type.is_allow())
    }

    /// Evaluate a domain against all unscoped rules.
    pub fn test_domain(&self, domain: &str) -> FilterResult {
        self.evaluate(domain, None)
    }

    /// Evaluate a domain against unscoped rules plus rules scoped to `source_id`.
    pub fn test_domain_for_source(&self, domain: &str, source_id: &str) -> FilterResult {
        self.evaluate(domain, Some(source_id))
    }

    fn evaluate(&self, domain: &str, source_id: Option<&str>) -> FilterResult {
        let start = Instant::now();
        let lowered = domain.trim().to_lowercase();
        let mut disabled_rules = Vec::new();

        let candidates = self.ordered(|rule| {
            rule.enabled
                && match (&rule.source_id, source_id) {
                    (None, _) => true,
                    (Some(scope), Some(source)) => scope == source,
                    (Some(_), None) => false,
                }
        });

        for stored in candidates {
            let matched = match &stored.compiled {
                CompiledPattern::Exact(exact) => *exact == lowered,
                CompiledPattern::Wildcard(regex) => regex.is_match(&lowered),
                CompiledPattern::Regex(regex) => {
                    let matcher: Arc<dyn PatternMatcher> = regex.clone();
                    match self.executor.execute(matcher, &lowered) {
                        Ok(matched) => matched,
                        Err(ExecError::Timeout(timeout)) => {
                            self.disable_after_timeout(&stored, timeout);
                            disabled_rules.push(stored.rule.id.clone());
                            false
                        }
                        Err(e) => {
                            log::warn!("Filter rule {} failed to execute: {}", stored.rule.id, e);
                            false
                        }
                    }
                }
            };

            if matched {
                return FilterResult {
                    matched: true,
                    rule: Some(stored.rule.clone()),
                    elapsed: start.elapsed(),
                    disabled_rules,
                };
            }
        }

        FilterResult {
            matched: false,
            rule: None,
            elapsed: start.elapsed(),
            disabled_rules,
        }
    }

    /// Flip a timed-out regex rule to disabled.
    fn disable_after_timeout(&self, stored: &StoredRule, timeout: Duration) {
        let mut rules = self.rules.write();
        let Some(current) = rules.get(&stored.rule.id).cloned() else {
            return;
        };
        // Rule was updated or already disabled meanwhile
        if current.generation != stored.generation || !current.rule.enabled {
            return;
        }

        let mut rule = current.rule.clone();
        rule.enabled = false;
        let compiled = current.compiled.clone();
        log::warn!(
            "Disabled filter rule {} '{}': regex exceeded {:?}",
            rule.id,
            rule.pattern,
            timeout
        );
        rules.insert(
            rule.id.clone(),
            Arc::new(StoredRule {
                rule,
                seq: current.seq,
                generation: current.generation,
                compiled,
            }),
        );
    }

    /// Snapshot of stored rules passing `filter`, sorted by priority then insertion.
    fn ordered(&self, filter: impl Fn(&FilterRule) -> bool) -> Vec<Arc<StoredRule>> {
        let mut snapshot: Vec<Arc<StoredRule>> = self
            .rules
            .read()
            .values()
            .filter(|stored| filter(&stored.rule))
            .cloned()
            .collect();
        snapshot.sort_by_key(|stored| (stored.rule.priority, stored.seq));
        snapshot
    }

    /// Run safety analysis and compile.
    fn validate(&self, pattern: &str, rule_type: RuleType) -> Result<CompiledPattern, FilterError> {
        let report = self.analyzer.analyze(pattern, rule_type);
        if report.is_redos_risk {
            log::warn!("Rejected {} pattern '{}' as ReDoS risk", rule_type, pattern);
            return Err(FilterError::PatternRedosRisk {
                pattern: pattern.to_string(),
                issues: report.issues,
            });
        }
        if !report.valid {
            return Err(FilterError::PatternInvalid {
                pattern: pattern.to_string(),
                issues: report.issues,
            });
        }

        CompiledPattern::compile(pattern, rule_type).map_err(|e| FilterError::PatternInvalid {
            pattern: pattern.to_string(),
            issues: vec![e.to_string()],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_rules_case_insensitive() {
        let engine = FilterEngine::new();
        engine.add_rule(NewRule::new("Ads.Example.com", RuleType::Block)).unwrap();

        assert!(engine.test_domain("ads.example.com").matched);
        assert!(engine.test_domain("ADS.EXAMPLE.COM").is_blocked());
        assert!(!engine.test_domain("www.ads.example.com").matched);
    }

    #[test]
    fn test_priority_order_and_ties() {
        let engine = FilterEngine::new();
        let block = engine
            .add_rule(NewRule::new("*.example.com", RuleType::Wildcard).with_priority(10))
            .unwrap();
        let allow = engine
            .add_rule(NewRule::new("good.example.com", RuleType::Allow).with_priority(1))
            .unwrap();

        let result = engine.test_domain("good.example.com");
        assert_eq!(result.rule.as_ref().map(|r| r.id.as_str()), Some(allow.id.as_str()));
        assert!(result.is_allowed());

        let result = engine.test_domain("bad.example.com");
        assert_eq!(result.rule.map(|r| r.id), Some(block.id));

        // Same priority: first inserted wins
        let engine = FilterEngine::new();
        let first = engine.add_rule(NewRule::new("*.net", RuleType::Wildcard)).unwrap();
        engine.add_rule(NewRule::new("x.net", RuleType::Allow)).unwrap();
        assert_eq!(engine.test_domain("x.net").rule.map(|r| r.id), Some(first.id));
    }

    #[test]
    fn test_wildcard_question_mark() {
        let engine = FilterEngine::new();
        engine.add_rule(NewRule::new("ad?.site.org", RuleType::Block)).unwrap();
        assert!(engine.test_domain("ad1.site.org").matched);
        assert!(!engine.test_domain("ad12.site.org").matched);
        // Dots in wildcard patterns are literal
        assert!(!engine.test_domain("ad1xsite.org").matched);
    }

    #[test]
    fn test_regex_rule() {
        let engine = FilterEngine::new();
        engine
            .add_rule(NewRule::new(r"^ad[0-9]+\.", RuleType::Regex))
            .unwrap();
        assert!(engine.test_domain("AD42.tracker.net").is_blocked());
        assert!(!engine.test_domain("bad42.tracker.net").matched);
    }

    #[test]
    fn test_no_rules_no_match() {
        let engine = FilterEngine::new();
        let result = engine.test_domain("example.com");
        assert!(!result.matched);
        assert!(result.rule.is_none());
    }

    #[test]
    fn test_disabled_rules_skipped() {
        let engine = FilterEngine::new();
        engine
            .add_rule(NewRule::new("example.com", RuleType::Block).disabled())
            .unwrap();
        assert!(!engine.test_domain("example.com").matched);
    }

    #[test]
    fn test_redos_rejected_distinctly() {
        let engine = FilterEngine::new();
        let err = engine.add_rule(NewRule::new("(a+)+$", RuleType::Regex)).unwrap_err();
        assert!(matches!(err, FilterError::PatternRedosRisk { .. }));

        let err = engine.add_rule(NewRule::new("(broken", RuleType::Regex)).unwrap_err();
        assert!(matches!(err, FilterError::PatternInvalid { .. }));

        let err = engine.add_rule(NewRule::new("", RuleType::Block)).unwrap_err();
        assert!(matches!(err, FilterError::PatternInvalid { .. }));

        assert!(engine.is_empty());
    }

    #[test]
    fn test_update_revalidates() {
        let engine = FilterEngine::new();
        let rule = engine.add_rule(NewRule::new("ads.com", RuleType::Block)).unwrap();

        let err = engine
            .update_rule(
                &rule.id,
                RuleUpdate {
                    pattern: Some("(x*)*".to_string()),
                    rule_type: Some(RuleType::Regex),
                    ..RuleUpdate::default()
                },
            )
            .unwrap_err();
        assert!(matches!(err, FilterError::PatternRedosRisk { .. }));
        // Failed update leaves the rule untouched
        assert_eq!(engine.get_rule(&rule.id), Some(rule.clone()));

        let updated = engine
            .update_rule(
                &rule.id,
                RuleUpdate {
                    pattern: Some("*.ads.com".to_string()),
                    priority: Some(-5),
                    ..RuleUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(updated.priority, -5);
        assert!(engine.test_domain("x.ads.com").matched);
        assert!(!engine.test_domain("ads.com").matched);
    }

    #[test]
    fn test_remove_rule() {
        let engine = FilterEngine::new();
        let rule = engine.add_rule(NewRule::new("ads.com", RuleType::Block)).unwrap();
        assert_eq!(engine.len(), 1);
        assert_eq!(engine.remove_rule(&rule.id).unwrap().id, rule.id);
        assert!(matches!(
            engine.remove_rule(&rule.id),
            Err(FilterError::RuleNotFound(_))
        ));
        assert!(engine.is_empty());
    }

    #[test]
    fn test_source_scoping() {
        let engine = FilterEngine::new();
        engine
            .add_rule(NewRule::new("scoped.com", RuleType::Block).with_source("list-a"))
            .unwrap();

        assert!(!engine.test_domain("scoped.com").matched);
        assert!(engine.test_domain_for_source("scoped.com", "list-a").matched);
        assert!(!engine.test_domain_for_source("scoped.com", "list-b").matched);
    }

    #[test]
    fn test_regex_timeout_disables_rule() {
        let engine = FilterEngine::with_timeout(Duration::from_nanos(1));
        let slow = engine.add_rule(NewRule::new(r"\d+x", RuleType::Regex)).unwrap();
        let fallback = engine
            .add_rule(NewRule::new("*", RuleType::Wildcard).with_priority(100))
            .unwrap();

        // Large input keeps the worker busy well past the deadline
        let input = "1".repeat(4 * 1024 * 1024);
        let result = engine.test_domain(&input);

        assert_eq!(result.disabled_rules, vec![slow.id.clone()]);
        // Evaluation continued with the next rule
        assert_eq!(result.rule.map(|r| r.id), Some(fallback.id));
        assert_eq!(engine.get_rule(&slow.id).map(|r| r.enabled), Some(false));

        // Manual re-enable is allowed
        let rule = engine
            .update_rule(
                &slow.id,
                RuleUpdate {
                    enabled: Some(true),
                    ..RuleUpdate::default()
                },
            )
            .unwrap();
        assert!(rule.enabled);
    }

    #[test]
    fn test_stale_timeout_does_not_disable_updated_rule() {
        let engine = FilterEngine::new();
        let rule = engine.add_rule(NewRule::new(r"^ads\d+\.com$", RuleType::Regex)).unwrap();
        let stale = engine.rules.read().get(&rule.id).cloned().unwrap();

        engine
            .update_rule(
                &rule.id,
                RuleUpdate {
                    pattern: Some(r"^track\d+\.com$".to_string()),
                    ..RuleUpdate::default()
                },
            )
            .unwrap();

        // Timeout from an evaluation that started before the update
        engine.disable_after_timeout(&stale, Duration::from_millis(1));
        assert_eq!(engine.get_rule(&rule.id).map(|r| r.enabled), Some(true));

        let current = engine.rules.read().get(&rule.id).cloned().unwrap();
        engine.disable_after_timeout(&current, Duration::from_millis(1));
        assert_eq!(engine.get_rule(&rule.id).map(|r| r.enabled), Some(false));
    }

    #[test]
    fn test_has_enabled_allow_rules() {
        let engine = FilterEngine::new();
        assert!(!engine.has_enabled_allow_rules());

        engine.add_rule(NewRule::new(r"^ads\d+\.", RuleType::Regex)).unwrap();
        let allow = engine
            .add_rule(NewRule::new("keep.com", RuleType::Allow).disabled())
            .unwrap();
        assert!(!engine.has_enabled_allow_rules());

        engine
            .update_rule(
                &allow.id,
                RuleUpdate {
                    enabled: Some(true),
                    ..RuleUpdate::default()
                },
            )
            .unwrap();
        assert!(engine.has_enabled_allow_rules());
    }

    #[test]
    fn test_rules_listed_in_evaluation_order() {
        let engine = FilterEngine::new();
        engine.add_rule(NewRule::new("c.com", RuleType::Block).with_priority(3)).unwrap();
        engine.add_rule(NewRule::new("a.com", RuleType::Block).with_priority(1)).unwrap();
        engine.add_rule(NewRule::new("b.com", RuleType::Block).with_priority(2)).unwrap();

        let patterns: Vec<String> = engine.rules().into_iter().map(|r| r.pattern).collect();
        assert_eq!(patterns, vec!["a.com", "b.com", "c.com"]);
    }
}
