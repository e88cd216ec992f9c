//! Benchmarks for list parsing, detection and merging.
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use hostmerge::aggregate::merge_entries;
use hostmerge::converter::{parse_content, FormatDetector, ListFormat};
use hostmerge::filter::{FilterEngine, NewRule};
use hostmerge::RuleType;

/// Generate a hosts list with `count` lines, every fourth line a comment.
fn generate_hosts(count: usize) -> String {
    let mut text = String::with_capacity(count * 32);
    for i in 0..count {
        if i % 4 == 0 {
            text.push_str("# section\n");
        } else {
            text.push_str(&format!("0.0.0.0 ads{}.example{}.com\n", i, i % 97));
        }
    }
    text
}

/// Generate an adblock list mixing block, allow and element rules.
fn generate_adblock(count: usize) -> String {
    let mut text = String::with_capacity(count * 32);
    for i in 0..count {
        match i % 10 {
            0 => text.push_str(&format!("@@||cdn{}.example.net^\n", i)),
            1 => text.push_str(&format!("site{}.example.org##.banner\n", i)),
            2 => text.push_str("! comment\n"),
            _ => text.push_str(&format!("||tracker{}.example.net^\n", i)),
        }
    }
    text
}

fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");

    for size in [1_000usize, 10_000, 100_000].iter() {
        let hosts = generate_hosts(*size);
        let adblock = generate_adblock(*size);
        group.throughput(Throughput::Elements(*size as u64));

        group.bench_with_input(BenchmarkId::new("standard", size), &hosts, |b, text| {
            b.iter(|| parse_content(black_box(text), "bench", ListFormat::Standard))
        });
        group.bench_with_input(BenchmarkId::new("adblock", size), &adblock, |b, text| {
            b.iter(|| parse_content(black_box(text), "bench", ListFormat::Adblock))
        });
        group.bench_with_input(BenchmarkId::new("auto", size), &adblock, |b, text| {
            b.iter(|| parse_content(black_box(text), "bench", ListFormat::Auto))
        });
    }

    group.finish();
}

fn bench_detect(c: &mut Criterion) {
    let detector = FormatDetector::default();
    let text = generate_adblock(10_000);

    c.bench_function("detect_sample", |b| b.iter(|| detector.detect(black_box(&text))));
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");

    for size in [10_000usize, 100_000].iter() {
        let mut entries = parse_content(&generate_hosts(*size), "a", ListFormat::Standard);
        entries.extend(parse_content(&generate_adblock(*size), "b", ListFormat::Adblock));
        group.throughput(Throughput::Elements(entries.len() as u64));

        group.bench_with_input(BenchmarkId::new("entries", size), &entries, |b, entries| {
            b.iter(|| merge_entries(black_box(entries)))
        });
    }

    group.finish();
}

fn bench_filter(c: &mut Criterion) {
    let engine = FilterEngine::new();
    engine
        .add_rule(NewRule::new("*.doubleclick.net", RuleType::Wildcard))
        .unwrap();
    engine
        .add_rule(NewRule::new("good.example.com", RuleType::Allow).with_priority(-1))
        .unwrap();
    engine
        .add_rule(NewRule::new(r"^ad[0-9]+\.", RuleType::Regex).with_priority(10))
        .unwrap();

    let mut group = c.benchmark_group("filter");
    group.bench_function("wildcard_hit", |b| {
        b.iter(|| engine.test_domain(black_box("ad.doubleclick.net")))
    });
    group.bench_function("regex_fallthrough", |b| {
        b.iter(|| engine.test_domain(black_box("www.unrelated.org")))
    });
    group.finish();
}

criterion_group!(benches, bench_parse, bench_detect, bench_merge, bench_filter);

criterion_main!(benches);
