//! Rendering entries and aggregated domain sets back into list text.

use chrono::{DateTime, Utc};
use std::fmt::Write;
use std::time::SystemTime;

use crate::{Entry, EntryKind};

/// Sinkhole address used for hosts output.
pub const SINKHOLE_ADDRESS: &str = "0.0.0.0";

/// Convert entries to adblock lines.
///
/// Block and allow entries are regenerated from the domain, element
/// entries are emitted verbatim from their raw pattern.
pub fn to_adblock_lines(entries: &[Entry]) -> Vec<String> {
    entries
        .iter()
        .filter_map(|entry| match entry.kind() {
            EntryKind::Block => Some(format!("||{}^", entry.domain())),
            EntryKind::Allow => Some(format!("@@||{}^", entry.domain())),
            EntryKind::Element => entry.raw_pattern().map(str::to_string),
        })
        .collect()
}

/// Convert entries to standard hosts lines.
///
/// Element entries have no DNS equivalent and are dropped; allow entries
/// render as the bare domain.
pub fn to_standard_lines(entries: &[Entry]) -> Vec<String> {
    entries
        .iter()
        .filter_map(|entry| match entry.kind() {
            EntryKind::Block => Some(format!("{} {}", SINKHOLE_ADDRESS, entry.domain())),
            EntryKind::Allow => Some(entry.domain().to_string()),
            EntryKind::Element => None,
        })
        .collect()
}

/// Header options for rendered documents.
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Emit the comment banner
    pub header: bool,
    /// Title line inside the banner
    pub title: String,
    /// Number of sources that contributed
    pub source_count: usize,
    /// Generation time shown in the banner
    pub generated_at: SystemTime,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            header: true,
            title: "hostmerge aggregated list".to_string(),
            source_count: 0,
            generated_at: SystemTime::now(),
        }
    }
}

impl RenderOptions {
    /// Options with the banner disabled.
    pub fn bare() -> Self {
        Self {
            header: false,
            ..Self::default()
        }
    }
}

/// Render a hosts document: one `0.0.0.0 <domain>` line per blocked domain.
pub fn render_hosts_document(blocked: &[String], options: &RenderOptions) -> String {
    let mut out = String::with_capacity(blocked.len() * 24 + 256);

    if options.header {
        write_banner(&mut out, "#", options, blocked.len());
    }
    for domain in blocked {
        let _ = writeln!(out, "{} {}", SINKHOLE_ADDRESS, domain);
    }

    out
}

/// Render an adblock document with block, allow and element rules.
pub fn render_adblock_document(
    blocked: &[String],
    allowed: &[String],
    element_rules: &[String],
    options: &RenderOptions,
) -> String {
    let mut out = String::with_capacity((blocked.len() + allowed.len()) * 20 + 256);

    if options.header {
        out.push_str("[Adblock Plus 2.0]\n");
        write_banner(&mut out, "!", options, blocked.len());
    }
    for domain in blocked {
        let _ = writeln!(out, "||{}^", domain);
    }
    for domain in allowed {
        let _ = writeln!(out, "@@||{}^", domain);
    }
    for rule in element_rules {
        let _ = writeln!(out, "{}", rule);
    }

    out
}

fn write_banner(out: &mut String, comment: &str, options: &RenderOptions, domain_count: usize) {
    let _ = writeln!(out, "{} Title: {}", comment, options.title);
    let _ = writeln!(out, "{} Generated: {}", comment, format_utc(options.generated_at));
    let _ = writeln!(out, "{} Domains: {}", comment, domain_count);
    let _ = writeln!(out, "{} Sources: {}", comment, options.source_count);
    let _ = writeln!(out, "{}", comment);
}

/// Format a time as `YYYY-MM-DDTHH:MM:SSZ`.
fn format_utc(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}
