//! hostmerge: CLI for aggregating hosts and adblock lists.

use clap::{Parser, Subcommand};
use hostmerge::converter::FormatDetector;
use hostmerge::coordinator::{AutoAggregator, CoordinatorOptions};
use hostmerge::fetch::{DefaultFetcher, HttpFetcher, DEFAULT_HTTP_TIMEOUT};
use hostmerge::filter::SafetyAnalyzer;
use hostmerge::store::{AggregationStore, JsonFileStore};
use hostmerge::{AggregationOutcome, AppConfig, RuleType, SourceStatus};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

#[derive(Parser)]
#[command(name = "hostmerge")]
#[command(author = "Kaitu.io")]
#[command(version)]
#[command(about = "Aggregate hosts and adblock lists into one deduplicated blocklist", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one aggregation and write the configured outputs
    Aggregate {
        /// Configuration file
        #[arg(short, long, default_value = "hostmerge.yaml")]
        config: PathBuf,

        /// Override the hosts output path
        #[arg(long)]
        hosts: Option<PathBuf>,

        /// Override the adblock output path
        #[arg(long)]
        adblock: Option<PathBuf>,

        /// Print per-source details
        #[arg(short, long)]
        verbose: bool,
    },

    /// Re-aggregate whenever the config changes or the interval elapses
    Watch {
        /// Configuration file
        #[arg(short, long, default_value = "hostmerge.yaml")]
        config: PathBuf,

        /// Config polling period in seconds
        #[arg(long, default_value_t = 2)]
        poll_secs: u64,
    },

    /// Detect the format of a list file
    Detect {
        /// List file
        input: PathBuf,

        /// Minimum confidence (percent)
        #[arg(short, long, default_value_t = hostmerge::converter::DEFAULT_CONFIDENCE_THRESHOLD)]
        threshold: f64,
    },

    /// Print the safety report for a pattern
    Analyze {
        pattern: String,

        /// Rule type: block, allow, wildcard or regex
        #[arg(short = 't', long = "type", default_value = "regex")]
        rule_type: String,
    },

    /// Evaluate a domain against the configured filter rules
    Check {
        domain: String,

        /// Configuration file
        #[arg(short, long, default_value = "hostmerge.yaml")]
        config: PathBuf,

        /// Include rules scoped to this source
        #[arg(short, long)]
        source: Option<String>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Aggregate {
            config,
            hosts,
            adblock,
            verbose,
        } => aggregate_once(&config, hosts, adblock, verbose),
        Commands::Watch { config, poll_secs } => watch(&config, Duration::from_secs(poll_secs.max(1))),
        Commands::Detect { input, threshold } => detect(&input, threshold),
        Commands::Analyze { pattern, rule_type } => analyze(&pattern, &rule_type),
        Commands::Check {
            domain,
            config,
            source,
        } => check(&domain, &config, source.as_deref()),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn build_fetcher(config: &AppConfig) -> DefaultFetcher {
    let mut http = HttpFetcher::new(DEFAULT_HTTP_TIMEOUT);
    if let Some(dir) = config.cache_dir.as_ref() {
        http = http.with_cache_dir(dir);
    }
    DefaultFetcher::new(http)
}

/// Load config, aggregate, persist and write outputs.
fn run_pipeline(config: &AppConfig) -> hostmerge::Result<AggregationOutcome> {
    let aggregator = config.build_aggregator()?;
    let fetcher = build_fetcher(config);
    let outcome = aggregator.aggregate(&config.sources, &fetcher);

    config.output.write_outputs(&outcome)?;
    if let Some(path) = config.output.state.as_ref() {
        JsonFileStore::new(path.clone()).record(&outcome)?;
    }
    Ok(outcome)
}

fn aggregate_once(
    config_path: &Path,
    hosts: Option<PathBuf>,
    adblock: Option<PathBuf>,
    verbose: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load(config_path)?;
    if hosts.is_some() {
        config.output.hosts = hosts;
    }
    if adblock.is_some() {
        config.output.adblock = adblock;
    }

    let outcome = run_pipeline(&config)?;

    println!(
        "Sources: {} ok / {} configured",
        outcome.total_sources,
        config.sources.len()
    );
    println!(
        "Entries: {} raw, {} blocked, {} allowed",
        outcome.total_entries,
        outcome.unique_entries,
        outcome.allowed_domains.len()
    );
    println!(
        "Removed: {} duplicates, {} allow-listed, {} by filter rules",
        outcome.duplicates_removed, outcome.allow_excluded, outcome.filtered_by_rules
    );
    println!("Time: {}ms", outcome.processing_time_ms);

    if verbose {
        for source in &outcome.sources {
            let format = source.format.map(|f| f.to_string()).unwrap_or_else(|| "-".to_string());
            print!(
                "  [{}] {} ({}): {} entries, format {}, {}ms",
                source.status,
                source.name,
                source.url,
                source.entry_count,
                format,
                source.fetch_duration_ms
            );
            if let Some(detection) = source.detection.as_ref() {
                print!(", detected {} at {:.1}%", detection.detected_format, detection.confidence);
            }
            if let Some(error) = source.error.as_ref() {
                print!(", error: {}", error);
            }
            println!();
        }
    }

    let failed = outcome.sources_with_status(SourceStatus::Error).count();
    if failed > 0 {
        log::warn!("{} source(s) failed", failed);
    }
    Ok(())
}

fn config_mtime(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn watch(config_path: &Path, poll: Duration) -> Result<(), Box<dyn std::error::Error>> {
    let initial = AppConfig::load(config_path)?;
    let options = CoordinatorOptions {
        settle_delay: initial.auto.settle_delay(),
        store: None,
    };

    let task_path = config_path.to_path_buf();
    let coordinator = AutoAggregator::with_options(
        move || -> hostmerge::Result<AggregationOutcome> {
            let config = AppConfig::load(&task_path)?;
            run_pipeline(&config)
        },
        options,
    );

    log::info!("Watching {} every {:?}", config_path.display(), poll);
    coordinator.trigger()?;

    let mut last_mtime = config_mtime(config_path);
    let mut interval = initial.auto.interval();
    let mut last_run = Instant::now();

    loop {
        thread::sleep(poll);

        let mtime = config_mtime(config_path);
        if mtime != last_mtime {
            last_mtime = mtime;
            log::info!("Config changed, triggering aggregation");
            match AppConfig::load(config_path) {
                Ok(config) => interval = config.auto.interval(),
                Err(e) => log::warn!("Config reload failed: {}", e),
            }
            coordinator.trigger()?;
            last_run = Instant::now();
            continue;
        }

        if let Some(every) = interval {
            if last_run.elapsed() >= every {
                log::info!("Interval elapsed, triggering aggregation");
                coordinator.trigger()?;
                last_run = Instant::now();
            }
        }
    }
}

fn detect(input: &Path, threshold: f64) -> Result<(), Box<dyn std::error::Error>> {
    let text = String::from_utf8_lossy(&fs::read(input)?).into_owned();
    let result = FormatDetector::new(threshold).detect(&text);

    println!("Format: {} ({:.1}%)", result.detected_format, result.confidence);
    println!(
        "Adblock: {} lines ({:.1}%), standard: {} lines ({:.1}%), sampled {}",
        result.adblock_matches,
        result.adblock_confidence,
        result.standard_matches,
        result.standard_confidence,
        result.sampled_lines
    );
    if result.mixed_content {
        println!("Warning: mixed content");
    }
    Ok(())
}

fn analyze(pattern: &str, rule_type: &str) -> Result<(), Box<dyn std::error::Error>> {
    let rule_type: RuleType = rule_type.parse()?;
    let report = SafetyAnalyzer::default().analyze(pattern, rule_type);
    println!("{}", serde_json::to_string_pretty(&report)?);
    if !report.valid {
        std::process::exit(2);
    }
    Ok(())
}

fn check(domain: &str, config_path: &Path, source: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load(config_path)?;
    let engine = config.build_filter_engine()?;

    let result = match source {
        Some(source_id) => engine.test_domain_for_source(domain, source_id),
        None => engine.test_domain(domain),
    };

    match result.rule.as_ref() {
        Some(rule) => println!(
            "{}: matched {} rule {} '{}' (priority {}) in {:?}",
            domain, rule.rule_type, rule.id, rule.pattern, rule.priority, result.elapsed
        ),
        None => println!("{}: no rule matched in {:?}", domain, result.elapsed),
    }
    for id in &result.disabled_rules {
        println!("  rule {} timed out and was disabled", id);
    }
    Ok(())
}
