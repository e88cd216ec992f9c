//! Static safety analysis of filter rule patterns.
//!
//! Every pattern is analyzed before a rule is stored. Regex patterns get a
//! structural scan that counts quantifiers, nesting, alternations, groups
//! and backreferences, and flags the shapes that cause catastrophic
//! backtracking in backtracking engines. The analysis is a pure function of
//! its input.

use serde::Serialize;

use crate::domain::MAX_DOMAIN_LENGTH;
use crate::RuleType;

/// Complexity reported for patterns that do not compile.
pub const UNBOUNDED_COMPLEXITY: u32 = u32::MAX;

/// Complexity at or above which a pattern is rejected.
pub const MAX_COMPLEXITY: u32 = 500;

/// Complexity added for each exceeded limit.
const LIMIT_PENALTY: u32 = 100;

/// Compiled program size cap for regex rules.
pub(crate) const REGEX_SIZE_LIMIT: usize = 1 << 20;

/// Per-category limits applied by the analyzer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyLimits {
    pub max_pattern_length: usize,
    pub max_wildcards: usize,
    pub max_quantifiers: usize,
    pub max_nested_quantifiers: usize,
    pub max_alternations: usize,
    pub max_groups: usize,
    pub max_backreferences: usize,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            max_pattern_length: 500,
            max_wildcards: 3,
            max_quantifiers: 10,
            max_nested_quantifiers: 0,
            max_alternations: 10,
            max_groups: 10,
            max_backreferences: 0,
        }
    }
}

/// Structural counts gathered from a pattern.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatternStats {
    pub length: usize,
    pub wildcards: usize,
    pub quantifiers: usize,
    pub nested_quantifiers: usize,
    pub alternations: usize,
    pub groups: usize,
    pub backreferences: usize,
}

/// Result of analyzing one pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SafetyReport {
    /// Compiled, no issues, complexity under [`MAX_COMPLEXITY`]
    pub valid: bool,
    pub complexity: u32,
    pub issues: Vec<String>,
    /// Structural catastrophic-backtracking shape found
    pub is_redos_risk: bool,
    pub stats: PatternStats,
}

/// Pattern safety analyzer.
#[derive(Debug, Clone, Default)]
pub struct SafetyAnalyzer {
    limits: SafetyLimits,
}

impl SafetyAnalyzer {
    /// Create an analyzer with custom limits.
    pub fn new(limits: SafetyLimits) -> Self {
        Self { limits }
    }

    pub fn limits(&self) -> &SafetyLimits {
        &self.limits
    }

    /// Analyze `pattern` at the strictness its rule type calls for.
    ///
    /// # Example
    /// ```
    /// use hostmerge::filter::SafetyAnalyzer;
    /// use hostmerge::RuleType;
    ///
    /// let report = SafetyAnalyzer::default().analyze("(a+)+", RuleType::Regex);
    /// assert!(report.is_redos_risk);
    /// assert!(!report.valid);
    /// ```
    pub fn analyze(&self, pattern: &str, rule_type: RuleType) -> SafetyReport {
        match rule_type {
            RuleType::Regex => self.analyze_regex(pattern),
            RuleType::Wildcard => self.analyze_wildcard(pattern),
            RuleType::Block | RuleType::Allow => {
                if has_wildcard_meta(pattern) {
                    self.analyze_wildcard(pattern)
                } else {
                    self.analyze_exact(pattern)
                }
            }
        }
    }

    fn analyze_exact(&self, pattern: &str) -> SafetyReport {
        let mut issues = Vec::new();
        if pattern.trim().is_empty() {
            issues.push("pattern is empty".to_string());
        }
        if pattern.len() > MAX_DOMAIN_LENGTH {
            issues.push(format!(
                "pattern length {} exceeds {}",
                pattern.len(),
                MAX_DOMAIN_LENGTH
            ));
        }

        SafetyReport {
            valid: issues.is_empty(),
            complexity: 1,
            issues,
            is_redos_risk: false,
            stats: PatternStats {
                length: pattern.len(),
                ..PatternStats::default()
            },
        }
    }

    fn analyze_wildcard(&self, pattern: &str) -> SafetyReport {
        let limits = &self.limits;
        let wildcards = pattern.matches('*').count();
        let mut issues = Vec::new();
        let mut complexity = 1 + (wildcards as u32) * 10;

        if pattern.trim().is_empty() {
            issues.push("pattern is empty".to_string());
        }
        if pattern.len() > limits.max_pattern_length {
            issues.push(format!(
                "pattern length {} exceeds {}",
                pattern.len(),
                limits.max_pattern_length
            ));
            complexity = complexity.saturating_add(LIMIT_PENALTY);
        }
        if wildcards > limits.max_wildcards {
            issues.push(format!(
                "{} wildcards exceed maximum depth {}",
                wildcards, limits.max_wildcards
            ));
            complexity = complexity.saturating_add(LIMIT_PENALTY);
        }

        SafetyReport {
            valid: issues.is_empty() && complexity < MAX_COMPLEXITY,
            complexity,
            issues,
            is_redos_risk: false,
            stats: PatternStats {
                length: pattern.len(),
                wildcards,
                ..PatternStats::default()
            },
        }
    }

    fn analyze_regex(&self, pattern: &str) -> SafetyReport {
        let limits = &self.limits;
        let scan = scan_regex(pattern);
        let stats = &scan.stats;
        let mut issues = Vec::new();

        let mut complexity = (stats.length as u32)
            .saturating_add(stats.quantifiers as u32 * 5)
            .saturating_add(stats.nested_quantifiers as u32 * 50)
            .saturating_add(stats.alternations as u32 * 3)
            .saturating_add(stats.groups as u32 * 2)
            .saturating_add(stats.backreferences as u32 * 25);

        let checks = [
            ("pattern length", stats.length, limits.max_pattern_length),
            ("quantifiers", stats.quantifiers, limits.max_quantifiers),
            (
                "nested quantifiers",
                stats.nested_quantifiers,
                limits.max_nested_quantifiers,
            ),
            ("alternations", stats.alternations, limits.max_alternations),
            ("groups", stats.groups, limits.max_groups),
            ("backreferences", stats.backreferences, limits.max_backreferences),
        ];
        for (name, count, max) in checks {
            if count > max {
                issues.push(format!("{} {} exceeds maximum {}", name, count, max));
                complexity = complexity.saturating_add(LIMIT_PENALTY);
            }
        }

        issues.extend(scan.risks.iter().cloned());
        let is_redos_risk = !scan.risks.is_empty();

        if pattern.is_empty() {
            issues.push("pattern is empty".to_string());
        }

        if let Err(e) = regex::RegexBuilder::new(pattern)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()
        {
            issues.push(format!("pattern does not compile: {}", e));
            return SafetyReport {
                valid: false,
                complexity: UNBOUNDED_COMPLEXITY,
                issues,
                is_redos_risk,
                stats: scan.stats,
            };
        }

        if complexity >= MAX_COMPLEXITY {
            issues.push(format!(
                "complexity {} reaches ceiling {}",
                complexity, MAX_COMPLEXITY
            ));
        }

        SafetyReport {
            valid: issues.is_empty(),
            complexity,
            issues,
            is_redos_risk,
            stats: scan.stats,
        }
    }
}

/// Whether a block/allow pattern uses wildcard metacharacters.
pub(crate) fn has_wildcard_meta(pattern: &str) -> bool {
    pattern.contains('*') || pattern.contains('?')
}

/// Output of the structural regex scan.
struct RegexScan {
    stats: PatternStats,
    risks: Vec<String>,
}

/// What the previous token was, for attributing quantifiers.
#[derive(Clone, Copy)]
enum Prev {
    Start,
    Atom,
    Group {
        had_quantifier: bool,
        capture: Option<usize>,
    },
    Quantifier,
}

struct GroupFrame {
    capture: Option<usize>,
    has_quantifier: bool,
}

/// Single pass over the pattern text.
///
/// This is not a full regex parser: it understands escapes, character
/// classes, groups and quantifiers well enough to count them and to find
/// nested or stacked quantifiers.
fn scan_regex(pattern: &str) -> RegexScan {
    let chars: Vec<char> = pattern.chars().collect();
    let mut stats = PatternStats {
        length: pattern.len(),
        ..PatternStats::default()
    };
    let mut risks = Vec::new();

    let mut stack: Vec<GroupFrame> = Vec::new();
    let mut quantified_captures: Vec<usize> = Vec::new();
    let mut backrefs: Vec<usize> = Vec::new();
    let mut capture_count = 0usize;
    let mut prev = Prev::Start;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                let digits: String = chars[i + 1..]
                    .iter()
                    .take_while(|d| d.is_ascii_digit())
                    .collect();
                if !digits.is_empty() && !digits.starts_with('0') {
                    stats.backreferences += 1;
                    if let Ok(n) = digits.parse::<usize>() {
                        backrefs.push(n);
                    }
                    i += 1 + digits.len();
                } else if chars.get(i + 1) == Some(&'k') && chars.get(i + 2) == Some(&'<') {
                    stats.backreferences += 1;
                    let close = chars[i..].iter().position(|&ch| ch == '>');
                    i += close.map(|p| p + 1).unwrap_or(chars.len() - i);
                } else {
                    i += 2;
                }
                prev = Prev::Atom;
                continue;
            }
            '[' => {
                i = skip_class(&chars, i);
                prev = Prev::Atom;
                continue;
            }
            '(' => match group_open(&chars, i) {
                GroupOpen::Flags(len) => {
                    i += len;
                    continue;
                }
                GroupOpen::Group { prefix, capture } => {
                    stats.groups += 1;
                    let capture = if capture {
                        capture_count += 1;
                        Some(capture_count)
                    } else {
                        None
                    };
                    stack.push(GroupFrame {
                        capture,
                        has_quantifier: false,
                    });
                    prev = Prev::Start;
                    i += prefix;
                    continue;
                }
            },
            ')' => {
                match stack.pop() {
                    Some(frame) => {
                        if frame.has_quantifier {
                            if let Some(parent) = stack.last_mut() {
                                parent.has_quantifier = true;
                            }
                        }
                        prev = Prev::Group {
                            had_quantifier: frame.has_quantifier,
                            capture: frame.capture,
                        };
                    }
                    None => prev = Prev::Atom,
                }
            }
            '|' => {
                stats.alternations += 1;
                prev = Prev::Start;
            }
            '*' | '+' | '?' | '{' => {
                let len = quantifier_len(&chars, i);
                if len == 0 {
                    // Literal '{'
                    prev = Prev::Atom;
                    i += 1;
                    continue;
                }

                // Lazy/possessive suffix on a quantifier
                if matches!(prev, Prev::Quantifier) && c == '?' {
                    i += 1;
                    continue;
                }

                stats.quantifiers += 1;
                match prev {
                    Prev::Quantifier => {
                        risks.push(format!(
                            "stacked quantifier '{}' at offset {}",
                            chars[i..i + len].iter().collect::<String>(),
                            i
                        ));
                    }
                    Prev::Group {
                        had_quantifier,
                        capture,
                    } => {
                        if let Some(n) = capture {
                            quantified_captures.push(n);
                        }
                        if had_quantifier {
                            stats.nested_quantifiers += 1;
                            risks.push(format!(
                                "nested quantifier: quantified group contains a quantifier (offset {})",
                                i
                            ));
                        }
                        if let Some(parent) = stack.last_mut() {
                            parent.has_quantifier = true;
                        }
                    }
                    Prev::Atom | Prev::Start => {
                        if let Some(parent) = stack.last_mut() {
                            parent.has_quantifier = true;
                        }
                    }
                }
                prev = Prev::Quantifier;
                i += len;
                continue;
            }
            _ => prev = Prev::Atom,
        }
        i += 1;
    }

    for n in backrefs {
        if quantified_captures.contains(&n) {
            risks.push(format!("backreference \\{} refers to a quantified group", n));
        }
    }

    RegexScan { stats, risks }
}

/// How a `(` opens.
enum GroupOpen {
    /// Inline flags such as `(?i)`, spanning this many chars
    Flags(usize),
    /// A group whose opening syntax spans `prefix` chars
    Group { prefix: usize, capture: bool },
}

/// Classify the group opener at `i` and measure its prefix.
fn group_open(chars: &[char], i: usize) -> GroupOpen {
    if chars.get(i + 1) != Some(&'?') {
        return GroupOpen::Group {
            prefix: 1,
            capture: true,
        };
    }

    let rest = &chars[i + 2..];
    match rest.first() {
        Some(':') | Some('=') | Some('!') | Some('>') => GroupOpen::Group {
            prefix: 3,
            capture: false,
        },
        Some('<') if matches!(rest.get(1), Some('=') | Some('!')) => GroupOpen::Group {
            prefix: 4,
            capture: false,
        },
        Some('<') | Some('P') => {
            // (?<name>...) and (?P<name>...)
            let prefix = rest
                .iter()
                .position(|&ch| ch == '>')
                .map(|p| p + 3)
                .unwrap_or(chars.len() - i);
            GroupOpen::Group {
                prefix,
                capture: true,
            }
        }
        _ => match rest.iter().position(|&ch| ch == ')' || ch == ':') {
            Some(p) if rest[p] == ')' => GroupOpen::Flags(p + 3),
            Some(p) => GroupOpen::Group {
                prefix: p + 3,
                capture: false,
            },
            None => GroupOpen::Group {
                prefix: chars.len() - i,
                capture: false,
            },
        },
    }
}

/// Index just past a character class starting at `start`.
fn skip_class(chars: &[char], start: usize) -> usize {
    let mut i = start + 1;
    if chars.get(i) == Some(&'^') {
        i += 1;
    }
    // Leading ']' is literal
    if chars.get(i) == Some(&']') {
        i += 1;
    }
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 2,
            ']' => return i + 1,
            _ => i += 1,
        }
    }
    chars.len()
}

/// Length of the quantifier at `i`, or 0 if `{` is a literal.
fn quantifier_len(chars: &[char], i: usize) -> usize {
    if chars[i] != '{' {
        return 1;
    }
    let mut j = i + 1;
    let mut saw_digit = false;
    while j < chars.len() {
        match chars[j] {
            d if d.is_ascii_digit() => saw_digit = true,
            ',' => {}
            '}' if saw_digit => return j - i + 1,
            _ => return 0,
        }
        j += 1;
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(pattern: &str, rule_type: RuleType) -> SafetyReport {
        SafetyAnalyzer::default().analyze(pattern, rule_type)
    }

    #[test]
    fn test_nested_quantifier_is_redos() {
        for pattern in ["(a+)+", "(a*)*", "(\\w+\\.)+com", "((ab)+c)*", "(?:x+)+$"] {
            let report = analyze(pattern, RuleType::Regex);
            assert!(report.is_redos_risk, "{}", pattern);
            assert!(!report.valid, "{}", pattern);
            assert!(report.stats.nested_quantifiers >= 1, "{}", pattern);
        }
    }

    #[test]
    fn test_simple_regex_is_valid() {
        let report = analyze(r"^ads?\d*\.example\.com$", RuleType::Regex);
        assert!(report.valid, "{:?}", report.issues);
        assert!(!report.is_redos_risk);
        assert_eq!(report.stats.quantifiers, 2);
        assert!(report.complexity < MAX_COMPLEXITY);
    }

    #[test]
    fn test_quantified_group_without_inner_quantifier_is_fine() {
        let report = analyze(r"^(ad|track)?\.example\.com$", RuleType::Regex);
        assert!(report.valid, "{:?}", report.issues);
        assert_eq!(report.stats.alternations, 1);
        assert_eq!(report.stats.groups, 1);
    }

    #[test]
    fn test_stacked_quantifier_is_redos() {
        let report = analyze("(ab)*{2}", RuleType::Regex);
        assert!(report.is_redos_risk);

        // Lazy suffix is not a second quantifier
        let lazy = analyze("a+?b", RuleType::Regex);
        assert!(!lazy.is_redos_risk);
        assert_eq!(lazy.stats.quantifiers, 1);
    }

    #[test]
    fn test_backreference_to_quantified_group() {
        let report = analyze(r"(a)+\1", RuleType::Regex);
        assert!(report.is_redos_risk);
        assert_eq!(report.stats.backreferences, 1);
        // The regex engine has no backreferences
        assert_eq!(report.complexity, UNBOUNDED_COMPLEXITY);
        assert!(!report.valid);
    }

    #[test]
    fn test_uncompilable_regex() {
        let report = analyze("(unclosed", RuleType::Regex);
        assert!(!report.valid);
        assert!(!report.is_redos_risk);
        assert_eq!(report.complexity, UNBOUNDED_COMPLEXITY);
    }

    #[test]
    fn test_character_class_contents_ignored() {
        let report = analyze(r"^[a-z|+*()]+\.com$", RuleType::Regex);
        assert_eq!(report.stats.alternations, 0);
        assert_eq!(report.stats.groups, 0);
        assert_eq!(report.stats.quantifiers, 1);
        assert!(report.valid, "{:?}", report.issues);
    }

    #[test]
    fn test_limits_exceeded() {
        let many_alts = (0..12).map(|i| format!("d{}", i)).collect::<Vec<_>>().join("|");
        let report = analyze(&many_alts, RuleType::Regex);
        assert!(!report.valid);
        assert!(!report.is_redos_risk);
        assert!(report.issues.iter().any(|i| i.starts_with("alternations")));

        let long = "a".repeat(600);
        let report = analyze(&long, RuleType::Regex);
        assert!(!report.valid);
        assert!(report.complexity >= MAX_COMPLEXITY);
    }

    #[test]
    fn test_wildcard_analysis() {
        let ok = analyze("*.ads.*.com", RuleType::Wildcard);
        assert!(ok.valid);
        assert!(!ok.is_redos_risk);
        assert_eq!(ok.stats.wildcards, 2);

        let deep = analyze("*a*b*c*", RuleType::Wildcard);
        assert!(!deep.valid);
        assert!(!deep.is_redos_risk);

        assert!(!analyze("", RuleType::Wildcard).valid);
    }

    #[test]
    fn test_exact_analysis() {
        let report = analyze("ads.example.com", RuleType::Block);
        assert!(report.valid);
        assert_eq!(report.complexity, 1);

        assert!(!analyze("", RuleType::Allow).valid);
        assert!(!analyze(&"a".repeat(300), RuleType::Block).valid);

        // Metacharacters switch block/allow to wildcard analysis
        let wild = analyze("*.example.com", RuleType::Block);
        assert_eq!(wild.stats.wildcards, 1);
        assert!(wild.complexity > 1);
    }

    #[test]
    fn test_deterministic() {
        let a = analyze(r"(x+)+y|z{2,5}", RuleType::Regex);
        let b = analyze(r"(x+)+y|z{2,5}", RuleType::Regex);
        assert_eq!(a, b);
    }

    #[test]
    fn test_non_capturing_group_prefix_is_not_a_quantifier() {
        let report = analyze(r"^(?:www\.)?example\.com$", RuleType::Regex);
        assert!(report.valid, "{:?}", report.issues);
        assert!(!report.is_redos_risk);
        assert_eq!(report.stats.quantifiers, 1);
        assert_eq!(report.stats.nested_quantifiers, 0);
        assert_eq!(report.stats.groups, 1);

        let named = analyze(r"^(?P<host>ads)?\.example\.com$", RuleType::Regex);
        assert!(named.valid, "{:?}", named.issues);
        assert_eq!(named.stats.quantifiers, 1);

        let scoped = analyze(r"^(?i:ads|track)\.net$", RuleType::Regex);
        assert!(scoped.valid, "{:?}", scoped.issues);
        assert_eq!(scoped.stats.quantifiers, 0);
        assert_eq!(scoped.stats.groups, 1);
    }

    #[test]
    fn test_inline_flags_are_not_groups() {
        let report = analyze(r"(?i)^ads\.com$", RuleType::Regex);
        assert!(report.valid, "{:?}", report.issues);
        assert_eq!(report.stats.quantifiers, 0);
        assert_eq!(report.stats.groups, 0);
    }

    #[test]
    fn test_literal_brace() {
        let report = analyze(r"a{b", RuleType::Regex);
        assert_eq!(report.stats.quantifiers, 0);
    }
}
