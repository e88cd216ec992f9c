//! Filter engine behavior across threads and under timeouts.

use hostmerge::filter::{FilterEngine, NewRule, SafetyAnalyzer};
use hostmerge::{FilterError, RuleType};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

#[test]
fn test_nested_quantifier_is_redos_risk() {
    let report = SafetyAnalyzer::default().analyze("(a+)+", RuleType::Regex);
    assert!(report.is_redos_risk);
    assert!(!report.valid);

    let engine = FilterEngine::new();
    assert!(matches!(
        engine.add_rule(NewRule::new("(a+)+", RuleType::Regex)),
        Err(FilterError::PatternRedosRisk { .. })
    ));
}

#[test]
fn test_timeout_is_bounded_and_disables_rule() {
    let engine = FilterEngine::with_timeout(Duration::from_nanos(1));
    let rule = engine
        .add_rule(NewRule::new(r"[a-z0-9]+\.[a-z]+[0-9]", RuleType::Regex))
        .unwrap();

    let input = format!("{}.", "a".repeat(8 * 1024 * 1024));
    let start = Instant::now();
    let result = engine.test_domain(&input);
    let elapsed = start.elapsed();

    assert!(!result.matched);
    assert_eq!(result.disabled_rules, vec![rule.id.clone()]);
    assert!(elapsed < Duration::from_secs(5), "took {:?}", elapsed);
    assert_eq!(engine.get_rule(&rule.id).map(|r| r.enabled), Some(false));

    // Disabled rules are skipped on later evaluations
    let result = engine.test_domain(&input);
    assert!(result.disabled_rules.is_empty());
}

#[test]
fn test_engines_are_isolated() {
    let a = FilterEngine::new();
    let b = FilterEngine::new();
    a.add_rule(NewRule::new("only-a.com", RuleType::Block)).unwrap();

    assert!(a.test_domain("only-a.com").matched);
    assert!(!b.test_domain("only-a.com").matched);
}

#[test]
fn test_concurrent_mutation_and_evaluation() {
    let engine = Arc::new(FilterEngine::new());
    engine
        .add_rule(NewRule::new("*.tracker.net", RuleType::Wildcard))
        .unwrap();

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..50 {
                    let rule = engine
                        .add_rule(NewRule::new(format!("w{}-{}.com", t, i), RuleType::Block))
                        .unwrap();
                    if i % 2 == 0 {
                        engine.remove_rule(&rule.id).unwrap();
                    }
                }
            })
        })
        .collect();

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..200 {
                    assert!(engine.test_domain("x.tracker.net").is_blocked());
                }
            })
        })
        .collect();

    for handle in writers.into_iter().chain(readers) {
        handle.join().unwrap();
    }
    assert_eq!(engine.len(), 1 + 4 * 25);
}
