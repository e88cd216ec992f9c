//! Heuristic format detection.
//!
//! The detector samples the head of a list, counts lines shaped like
//! adblock network rules (`||domain^`) and lines shaped like hosts entries
//! (`0.0.0.0 domain`, `127.0.0.1 domain`), and picks the majority when it
//! is confident enough. Otherwise it answers [`ListFormat::Auto`].

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::ListFormat;

/// Maximum number of non-blank, non-comment lines inspected.
pub const MAX_SAMPLE_LINES: usize = 100;

/// Default minimum confidence (percent) to commit to a format.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 60.0;

/// Confidence gap (percentage points) under which a list is reported as mixed.
const MIXED_CONTENT_THRESHOLD: f64 = 10.0;

static ADBLOCK_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:@@)?\|\|[^\s^]+\^").unwrap());

static STANDARD_SHAPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?:0\.0\.0\.0|127\.0\.0\.1)\s+").unwrap());

/// Outcome of sampling a list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionResult {
    /// Chosen format, `Auto` when undecided
    pub detected_format: ListFormat,
    /// Confidence of the leading format in [0, 100]
    pub confidence: f64,
    pub adblock_confidence: f64,
    pub standard_confidence: f64,
    pub adblock_matches: usize,
    pub standard_matches: usize,
    /// Lines inspected
    pub sampled_lines: usize,
    /// Both shapes present with nearly equal weight
    pub mixed_content: bool,
}

impl DetectionResult {
    /// Resolve the format to parse with.
    ///
    /// A manual format other than `Auto` always wins over detection.
    pub fn resolve(&self, manual: ListFormat) -> ListFormat {
        match manual {
            ListFormat::Auto => self.detected_format,
            pinned => pinned,
        }
    }
}

/// Samples raw list text and guesses its format.
#[derive(Debug, Clone)]
pub struct FormatDetector {
    confidence_threshold: f64,
}

impl Default for FormatDetector {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

impl FormatDetector {
    /// Create a detector with a custom confidence threshold (percent).
    pub fn new(confidence_threshold: f64) -> Self {
        Self {
            confidence_threshold: confidence_threshold.clamp(0.0, 100.0),
        }
    }

    pub fn confidence_threshold(&self) -> f64 {
        self.confidence_threshold
    }

    /// Detect the format of `text`.
    ///
    /// # Example
    /// ```
    /// use hostmerge::converter::{FormatDetector, ListFormat};
    ///
    /// let result = FormatDetector::default().detect("||ads.com^\n||tracker.net^");
    /// assert_eq!(result.detected_format, ListFormat::Adblock);
    /// assert_eq!(result.confidence, 100.0);
    /// ```
    pub fn detect(&self, text: &str) -> DetectionResult {
        let mut adblock_matches = 0usize;
        let mut standard_matches = 0usize;
        let mut sampled_lines = 0usize;

        for line in text.lines().map(str::trim).filter(|l| !is_skippable(l)) {
            if sampled_lines >= MAX_SAMPLE_LINES {
                break;
            }
            sampled_lines += 1;

            if ADBLOCK_SHAPE.is_match(line) {
                adblock_matches += 1;
            } else if STANDARD_SHAPE.is_match(line) {
                standard_matches += 1;
            }
        }

        let total = adblock_matches + standard_matches;
        let (adblock_confidence, standard_confidence) = if total == 0 {
            (0.0, 0.0)
        } else {
            (
                (adblock_matches as f64 * 100.0) / total as f64,
                (standard_matches as f64 * 100.0) / total as f64,
            )
        };

        let mixed_content = adblock_matches > 0
            && standard_matches > 0
            && (adblock_confidence - standard_confidence).abs() < MIXED_CONTENT_THRESHOLD;
        if mixed_content {
            log::warn!(
                "Mixed list content: adblock {:.1}% vs standard {:.1}% over {} lines",
                adblock_confidence,
                standard_confidence,
                sampled_lines
            );
        }

        let (leader, confidence) = if adblock_confidence > standard_confidence {
            (ListFormat::Adblock, adblock_confidence)
        } else if standard_confidence > adblock_confidence {
            (ListFormat::Standard, standard_confidence)
        } else {
            (ListFormat::Auto, adblock_confidence)
        };

        let detected_format = if leader != ListFormat::Auto && confidence < self.confidence_threshold
        {
            log::debug!(
                "Detected {} at {:.1}% is below threshold {:.1}%, using auto",
                leader,
                confidence,
                self.confidence_threshold
            );
            ListFormat::Auto
        } else {
            leader
        };

        DetectionResult {
            detected_format,
            confidence,
            adblock_confidence,
            standard_confidence,
            adblock_matches,
            standard_matches,
            sampled_lines,
            mixed_content,
        }
    }
}

fn is_skippable(line: &str) -> bool {
    line.is_empty() || line.starts_with('#') || line.starts_with('!') || line.starts_with('[')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mixed_text(adblock: usize, standard: usize) -> String {
        let mut lines = Vec::new();
        for i in 0..adblock {
            lines.push(format!("||ads{}.example.com^", i));
        }
        for i in 0..standard {
            lines.push(format!("0.0.0.0 host{}.example.com", i));
        }
        lines.join("\n")
    }

    #[test]
    fn test_threshold_boundary_counts() {
        let detector = FormatDetector::new(60.0);
        let result = detector.detect(&mixed_text(60, 40));
        assert_eq!(result.detected_format, ListFormat::Adblock);
        assert_eq!(result.confidence, 60.0);
        assert_eq!(result.adblock_matches, 60);
        assert_eq!(result.standard_matches, 40);
        assert_eq!(result.resolve(ListFormat::Auto), ListFormat::Adblock);
    }

    #[test]
    fn test_below_threshold_demotes_to_auto() {
        let result = FormatDetector::new(60.0).detect(&mixed_text(21, 19));
        assert_eq!(result.detected_format, ListFormat::Auto);
        assert_eq!(result.confidence, 52.5);
        assert!(result.mixed_content);
    }

    #[test]
    fn test_standard_detection() {
        let text = "# hosts\n127.0.0.1 localhost\n0.0.0.0 ads.com\n0.0.0.0\ttracker.net\n";
        let result = FormatDetector::default().detect(text);
        assert_eq!(result.detected_format, ListFormat::Standard);
        assert_eq!(result.standard_confidence, 100.0);
        assert_eq!(result.adblock_confidence, 0.0);
        assert!(!result.mixed_content);
    }

    #[test]
    fn test_tie_is_auto() {
        let result = FormatDetector::new(0.0).detect(&mixed_text(5, 5));
        assert_eq!(result.detected_format, ListFormat::Auto);
        assert_eq!(result.confidence, 50.0);
        assert!(result.mixed_content);
    }

    #[test]
    fn test_no_matches() {
        let result = FormatDetector::default().detect("example.com\nfoo.bar\n! comment\n");
        assert_eq!(result.detected_format, ListFormat::Auto);
        assert_eq!(result.confidence, 0.0);
        assert_eq!(result.adblock_confidence, 0.0);
        assert_eq!(result.standard_confidence, 0.0);
        assert_eq!(result.sampled_lines, 2);
    }

    #[test]
    fn test_samples_at_most_100_lines() {
        // 100 hosts lines first, then many adblock lines that must be ignored
        let text = format!("{}\n{}", mixed_text(0, 100), mixed_text(500, 0));
        let result = FormatDetector::default().detect(&text);
        assert_eq!(result.sampled_lines, MAX_SAMPLE_LINES);
        assert_eq!(result.detected_format, ListFormat::Standard);
        assert_eq!(result.adblock_matches, 0);
    }

    #[test]
    fn test_manual_override_still_reports_detection() {
        let result = FormatDetector::default().detect(&mixed_text(10, 0));
        assert_eq!(result.detected_format, ListFormat::Adblock);
        assert_eq!(result.resolve(ListFormat::Standard), ListFormat::Standard);
    }

    #[test]
    fn test_allow_rules_count_as_adblock() {
        let result = FormatDetector::default().detect("@@||ok.com^\n||bad.com^$third-party");
        assert_eq!(result.adblock_matches, 2);
    }
}
