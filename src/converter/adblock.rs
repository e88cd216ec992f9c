//! Adblock Plus pattern parser.
//!
//! Only the DNS-relevant subset is understood:
//! - `domain##selector` element hiding (kept verbatim for output)
//! - `||domain^` block and `@@||domain^` allow network rules
//!
//! Everything else (path rules, `$options`, generic cosmetics) is skipped.

use crate::domain::{is_valid_adblock_domain, is_valid_domain};
use crate::{Entry, EntryKind};

/// Parse adblock text into entries.
pub fn parse_adblock(text: &str, source_id: &str) -> Vec<Entry> {
    text.lines()
        .enumerate()
        .filter_map(|(idx, line)| parse_line(line.trim(), source_id, idx + 1))
        .collect()
}

/// Quick shape check used to route lines in mixed-format lists.
pub(super) fn looks_like_adblock(line: &str) -> bool {
    line.starts_with("||") || line.starts_with("@@") || line.contains("##")
}

/// Parse one trimmed adblock line.
pub(super) fn parse_line(line: &str, source_id: &str, line_number: usize) -> Option<Entry> {
    if line.is_empty() || line.starts_with('!') || line.starts_with('[') {
        return None;
    }

    // Element hiding takes precedence over network rules
    if let Some((domain, _selector)) = line.split_once("##") {
        if !is_valid_domain(domain) {
            return None;
        }
        return Some(Entry::adblock(
            domain,
            source_id,
            EntryKind::Element,
            line_number,
            line,
        ));
    }

    let (kind, rule) = match line.strip_prefix("@@") {
        Some(rest) => (EntryKind::Allow, rest),
        None => (EntryKind::Block, line),
    };

    let body = rule.strip_prefix("||")?;
    if !body.ends_with('^') {
        return None;
    }

    let domain = extract_domain(body);
    if !is_valid_adblock_domain(domain) {
        return None;
    }

    Some(Entry::adblock(domain, source_id, kind, line_number, line))
}

/// Domain portion of a network rule body (text after `||`).
///
/// `*.example.com` collapses to `example.com`: the subdomain wildcard is
/// not representable as a single hosts entry.
fn extract_domain(body: &str) -> &str {
    let end = body.find(|c| c == '/' || c == '^').unwrap_or(body.len());
    let token = &body[..end];

    match token.strip_prefix('*') {
        Some(rest) => rest.strip_prefix('.').unwrap_or(rest),
        None => token,
    }
}
