//! Standard hosts-file parser.

use std::net::IpAddr;

use crate::domain::is_valid_domain;
use crate::Entry;

/// Hostnames every stock hosts file maps to itself; never block them.
const LOCAL_HOSTNAMES: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "local",
    "broadcasthost",
    "ip6-localhost",
    "ip6-loopback",
    "ip6-localnet",
    "ip6-mcastprefix",
    "ip6-allnodes",
    "ip6-allrouters",
    "ip6-allhosts",
];

/// Parse standard hosts text into block entries.
///
/// The first token of each line is the address and is not checked; every
/// following token that is a valid domain becomes one entry, so a
/// multi-domain line yields several entries.
pub fn parse_standard_hosts(text: &str, source_id: &str) -> Vec<Entry> {
    let mut entries = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        parse_line(line.trim(), source_id, idx + 1, &mut entries);
    }
    entries
}

/// Parse one trimmed hosts line, appending any entries it yields.
pub(super) fn parse_line(line: &str, source_id: &str, line_number: usize, out: &mut Vec<Entry>) {
    if line.is_empty() || line.starts_with('#') || line.starts_with('!') || line.starts_with('[') {
        return;
    }

    // Skip the address
    for token in line.split_whitespace().skip(1) {
        // Trailing comment
        if token.starts_with('#') {
            break;
        }
        if is_blockable(token) {
            out.push(Entry::hosts(token, source_id, line_number));
        }
    }
}

fn is_blockable(token: &str) -> bool {
    if !is_valid_domain(token) || token.parse::<IpAddr>().is_ok() {
        return false;
    }
    !LOCAL_HOSTNAMES
        .iter()
        .any(|local| local.eq_ignore_ascii_case(token))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntryKind;

    #[test]
    fn test_parse_basic_hosts() {
        let text = "# StevenBlack style\n\
                    127.0.0.1 localhost\n\
                    0.0.0.0 0.0.0.0\n\
                    \n\
                    0.0.0.0 ads.example.com\n\
                    127.0.0.1\tTracker.Net   # inline comment\n";

        let entries = parse_standard_hosts(text, "src-a");
        assert_eq!(entries.len(), 2);

        assert_eq!(entries[0].domain(), "ads.example.com");
        assert_eq!(entries[0].line_number(), 5);
        assert_eq!(entries[0].kind(), EntryKind::Block);
        assert_eq!(entries[0].source_id(), "src-a");

        // Case is preserved as seen
        assert_eq!(entries[1].domain(), "Tracker.Net");
        assert_eq!(entries[1].line_number(), 6);
    }

    #[test]
    fn test_multi_domain_line() {
        let entries = parse_standard_hosts("0.0.0.0 a.com b.com c.com", "s");
        let domains: Vec<&str> = entries.iter().map(|e| e.domain()).collect();
        assert_eq!(domains, vec!["a.com", "b.com", "c.com"]);
        assert!(entries.iter().all(|e| e.line_number() == 1));
    }

    #[test]
    fn test_skips_comment_styles_and_invalid_tokens() {
        let text = "! adblock comment\n[Adblock Plus 2.0]\n#0.0.0.0 commented.com\n0.0.0.0 bad_domain.com -lead.com good.com";
        let entries = parse_standard_hosts(text, "s");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].domain(), "good.com");
        assert_eq!(entries[0].line_number(), 4);
    }

    #[test]
    fn test_address_only_lines() {
        assert!(parse_standard_hosts("0.0.0.0\n127.0.0.1   \n", "s").is_empty());
    }

    #[test]
    fn test_emitted_domains_are_valid() {
        let text = "0.0.0.0 ok.com ..bad ok-.com x.y\n::1 ip6-localhost\n1.2.3.4 10.0.0.1 host";
        for entry in parse_standard_hosts(text, "s") {
            assert!(is_valid_domain(entry.domain()), "{}", entry.domain());
        }
    }
}
