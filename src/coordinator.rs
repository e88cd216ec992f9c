//! Single-flight background aggregation.
//!
//! [`AutoAggregator`] runs an [`AggregationTask`] on a background thread
//! whenever it is triggered. At most one run is in flight; triggers that
//! arrive while a run is active collapse into a single follow-up run, which
//! starts after a settle delay so bursts of changes coalesce further.

use arc_swap::ArcSwapOption;
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::aggregate::AggregationOutcome;
use crate::error::{Error, Result};
use crate::store::AggregationStore;

/// Default pause before a queued follow-up run.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(1);

/// One aggregation run.
pub trait AggregationTask: Send + Sync + 'static {
    fn run(&self) -> Result<AggregationOutcome>;
}

impl<F> AggregationTask for F
where
    F: Fn() -> Result<AggregationOutcome> + Send + Sync + 'static,
{
    fn run(&self) -> Result<AggregationOutcome> {
        self()
    }
}

/// What a call to [`AutoAggregator::trigger`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Coordinator is disabled; nothing happens
    Disabled,
    /// A background run started
    Started,
    /// A run is in flight; one follow-up is pending
    Queued,
}

/// Coordinator settings.
#[derive(Clone)]
pub struct CoordinatorOptions {
    pub settle_delay: Duration,
    /// Receives every successful outcome
    pub store: Option<Arc<dyn AggregationStore>>,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            store: None,
        }
    }
}

#[derive(Debug, Default)]
struct RunState {
    running: bool,
    pending: bool,
}

struct Inner {
    task: Box<dyn AggregationTask>,
    options: CoordinatorOptions,
    enabled: AtomicBool,
    state: Mutex<RunState>,
    idle: Condvar,
    latest: ArcSwapOption<AggregationOutcome>,
    runs: AtomicU64,
    failures: AtomicU64,
}

/// Triggers aggregation runs with single-flight, at-most-one-pending semantics.
///
/// # Example
/// ```
/// use hostmerge::aggregate::Aggregator;
/// use hostmerge::coordinator::{AutoAggregator, TriggerOutcome};
/// use hostmerge::fetch::StaticFetcher;
/// use hostmerge::Source;
/// use std::time::Duration;
///
/// let fetcher = StaticFetcher::new().with("mem://a", "0.0.0.0 ads.com");
/// let sources = vec![Source::new("a", "mem://a")];
/// let coordinator = AutoAggregator::new(move || -> hostmerge::Result<_> {
///     Ok(Aggregator::new().aggregate(&sources, &fetcher))
/// });
///
/// assert_eq!(coordinator.trigger().unwrap(), TriggerOutcome::Started);
/// assert!(coordinator.wait_idle(Duration::from_secs(5)));
/// assert_eq!(coordinator.latest().unwrap().blocked_domains, vec!["ads.com"]);
/// ```
#[derive(Clone)]
pub struct AutoAggregator {
    inner: Arc<Inner>,
}

impl AutoAggregator {
    /// Create an enabled coordinator with default options.
    pub fn new<T: AggregationTask>(task: T) -> Self {
        Self::with_options(task, CoordinatorOptions::default())
    }

    pub fn with_options<T: AggregationTask>(task: T, options: CoordinatorOptions) -> Self {
        Self {
            inner: Arc::new(Inner {
                task: Box::new(task),
                options,
                enabled: AtomicBool::new(true),
                state: Mutex::new(RunState::default()),
                idle: Condvar::new(),
                latest: ArcSwapOption::empty(),
                runs: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
        }
    }

    /// Request a run.
    ///
    /// Returns immediately; the run happens on a background thread.
    pub fn trigger(&self) -> Result<TriggerOutcome> {
        if !self.is_enabled() {
            log::debug!("Auto-aggregation disabled, ignoring trigger");
            return Ok(TriggerOutcome::Disabled);
        }

        {
            let mut state = self.inner.state.lock();
            if state.running {
                if !state.pending {
                    log::debug!("Aggregation in flight, queued one follow-up run");
                }
                state.pending = true;
                return Ok(TriggerOutcome::Queued);
            }
            state.running = true;
        }

        let inner = Arc::clone(&self.inner);
        let spawned = thread::Builder::new()
            .name("auto-aggregate".to_string())
            .spawn(move || inner.run_loop());

        if let Err(e) = spawned {
            let mut state = self.inner.state.lock();
            state.running = false;
            state.pending = false;
            self.inner.idle.notify_all();
            return Err(Error::Io(e));
        }
        Ok(TriggerOutcome::Started)
    }

    pub fn enable(&self) {
        self.inner.enabled.store(true, Ordering::Release);
    }

    /// Stop accepting triggers. A run in flight finishes; a pending one is dropped.
    pub fn disable(&self) {
        self.inner.enabled.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        self.inner.state.lock().running
    }

    pub fn has_pending(&self) -> bool {
        self.inner.state.lock().pending
    }

    /// Block until no run is in flight or the timeout passes.
    ///
    /// Returns `true` if the coordinator is idle.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.inner.state.lock();
        while state.running {
            if self.inner.idle.wait_until(&mut state, deadline).timed_out() {
                return !state.running;
            }
        }
        true
    }

    /// Outcome of the last successful run.
    pub fn latest(&self) -> Option<Arc<AggregationOutcome>> {
        self.inner.latest.load_full()
    }

    /// Completed runs, successful or not.
    pub fn run_count(&self) -> u64 {
        self.inner.runs.load(Ordering::Acquire)
    }

    pub fn failure_count(&self) -> u64 {
        self.inner.failures.load(Ordering::Acquire)
    }
}

impl Inner {
    fn run_loop(&self) {
        loop {
            self.run_once();

            {
                let mut state = self.state.lock();
                let follow_up = state.pending && self.enabled.load(Ordering::Acquire);
                state.pending = false;
                if !follow_up {
                    state.running = false;
                    self.idle.notify_all();
                    return;
                }
            }

            log::debug!(
                "Running queued aggregation after {:?} settle delay",
                self.options.settle_delay
            );
            thread::sleep(self.options.settle_delay);
        }
    }

    fn run_once(&self) {
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.task.run()))
            .unwrap_or_else(|_| Err(Error::Aggregation("aggregation task panicked".to_string())));

        match result {
            Ok(outcome) => {
                if let Some(store) = self.options.store.as_ref() {
                    if let Err(e) = store.record(&outcome) {
                        log::warn!("Failed to persist aggregation outcome: {}", e);
                    }
                }
                self.latest.store(Some(Arc::new(outcome)));
            }
            Err(e) => {
                self.failures.fetch_add(1, Ordering::AcqRel);
                log::error!("Aggregation run failed: {}", e);
            }
        }
        self.runs.fetch_add(1, Ordering::AcqRel);
    }
}
