//! YAML configuration.
//!
//! ```yaml
//! sources:
//!   - id: stevenblack
//!     url: https://raw.githubusercontent.com/StevenBlack/hosts/master/hosts
//!     format: standard
//!   - id: easylist
//!     url: https://easylist.to/easylist/easylist.txt
//! filter:
//!   timeout: medium
//!   rules:
//!     - pattern: "*.doubleclick.net"
//!       type: wildcard
//!     - pattern: "cdn.example.com"
//!       type: allow
//!       priority: -10
//! detection:
//!   confidence_threshold: 60
//! cache_dir: /var/cache/hostmerge
//! output:
//!   hosts: out/hosts.txt
//!   adblock: out/adblock.txt
//! auto:
//!   settle_delay_ms: 1000
//!   interval_secs: 3600
//! ```

use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::aggregate::{AggregationOutcome, Aggregator};
use crate::converter::render::{render_adblock_document, render_hosts_document, RenderOptions};
use crate::converter::{FormatDetector, DEFAULT_CONFIDENCE_THRESHOLD};
use crate::error::{Error, Result};
use crate::filter::{BoundedExecutor, FilterEngine, NewRule, SafetyAnalyzer, TimeoutTier};
use crate::store::write_atomic;
use crate::Source;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub sources: Vec<Source>,
    pub filter: FilterConfig,
    pub detection: DetectionConfig,
    /// Download cache; disabled when unset
    pub cache_dir: Option<PathBuf>,
    pub output: OutputConfig,
    pub auto: AutoConfig,
}

/// Operator filter rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Regex execution budget
    pub timeout: TimeoutTier,
    pub rules: Vec<NewRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum confidence (percent) to commit to a detected format
    pub confidence_threshold: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

/// Where aggregation results are written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Hosts-format document
    pub hosts: Option<PathBuf>,
    /// Adblock-format document
    pub adblock: Option<PathBuf>,
    /// Latest outcome as JSON
    pub state: Option<PathBuf>,
    /// Emit the comment banner
    pub header: bool,
    pub title: Option<String>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            hosts: None,
            adblock: None,
            state: None,
            header: true,
            title: None,
        }
    }
}

/// Background aggregation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoConfig {
    /// Pause before a queued follow-up run
    pub settle_delay_ms: u64,
    /// Periodic re-aggregation; 0 disables the timer
    pub interval_secs: u64,
}

impl Default for AutoConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: 1000,
            interval_secs: 0,
        }
    }
}

impl OutputConfig {
    fn render_options(&self, outcome: &AggregationOutcome) -> RenderOptions {
        let mut options = RenderOptions {
            header: self.header,
            source_count: outcome.total_sources,
            ..RenderOptions::default()
        };
        if let Some(title) = self.title.as_ref() {
            options.title = title.clone();
        }
        if let Some(completed_at) = outcome.completed_at {
            options.generated_at = completed_at;
        }
        options
    }

    /// Write the configured documents for an outcome.
    ///
    /// Returns the paths written.
    pub fn write_outputs(&self, outcome: &AggregationOutcome) -> Result<Vec<PathBuf>> {
        let options = self.render_options(outcome);
        let mut written = Vec::new();

        if let Some(path) = self.hosts.as_ref() {
            let doc = render_hosts_document(&outcome.blocked_domains, &options);
            write_atomic(path, doc.as_bytes())?;
            written.push(path.clone());
        }
        if let Some(path) = self.adblock.as_ref() {
            let doc = render_adblock_document(
                &outcome.blocked_domains,
                &outcome.allowed_domains,
                &outcome.element_rules,
                &options,
            );
            write_atomic(path, doc.as_bytes())?;
            written.push(path.clone());
        }

        for path in &written {
            log::info!("Wrote {}", path.display());
        }
        Ok(written)
    }
}

impl AutoConfig {
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn interval(&self) -> Option<Duration> {
        (self.interval_secs > 0).then(|| Duration::from_secs(self.interval_secs))
    }
}

impl AppConfig {
    /// Read and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let config = Self::from_yaml(&content)?;
        log::debug!(
            "Loaded config {}: {} sources, {} filter rules",
            path.display(),
            config.sources.len(),
            config.filter.rules.len()
        );
        Ok(config)
    }

    /// Parse and validate configuration text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let mut config: AppConfig = serde_yaml::from_str(content)?;
        for source in &mut config.sources {
            if source.name.is_empty() {
                source.name = source.id.clone();
            }
        }
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let mut seen = AHashSet::new();
        for source in &self.sources {
            if source.id.trim().is_empty() {
                return Err(Error::Config("source with empty id".to_string()));
            }
            if source.url.trim().is_empty() {
                return Err(Error::Config(format!("source {} has no url", source.id)));
            }
            if !seen.insert(source.id.as_str()) {
                return Err(Error::Config(format!("duplicate source id: {}", source.id)));
            }
        }

        let threshold = self.detection.confidence_threshold;
        if !(0.0..=100.0).contains(&threshold) {
            return Err(Error::Config(format!(
                "confidence_threshold must be within 0-100, got {}",
                threshold
            )));
        }

        for rule in &self.filter.rules {
            if let Some(scope) = rule.source_id.as_deref() {
                if !seen.contains(scope) {
                    return Err(Error::Config(format!(
                        "filter rule '{}' scoped to unknown source {}",
                        rule.pattern, scope
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn detector(&self) -> FormatDetector {
        FormatDetector::new(self.detection.confidence_threshold)
    }

    /// Build a filter engine holding every configured rule.
    ///
    /// Fails on the first rule the safety analyzer rejects.
    pub fn build_filter_engine(&self) -> Result<FilterEngine> {
        let engine = FilterEngine::with_components(
            SafetyAnalyzer::default(),
            BoundedExecutor::with_tier(self.filter.timeout),
        );
        for rule in &self.filter.rules {
            engine.add_rule(rule.clone())?;
        }
        Ok(engine)
    }

    /// Aggregator wired with the configured detector and filter rules.
    pub fn build_aggregator(&self) -> Result<Aggregator> {
        let mut aggregator = Aggregator::new().with_detector(self.detector());
        if !self.filter.rules.is_empty() {
            aggregator = aggregator.with_filter(Arc::new(self.build_filter_engine()?));
        }
        Ok(aggregator)
    }
}
