//! Pattern execution under a wall-clock timeout.
//!
//! Regex engines cannot be interrupted mid-match, so each execution runs on
//! its own worker thread and the caller waits on a channel with a deadline.
//! On timeout the worker is abandoned: it keeps running until the match
//! finishes on its own. The leak is bounded by the filter engine, which
//! disables a rule after its first timeout, so at most one abandoned worker
//! exists per disabled rule.
//!
//! The price is one thread start per execution, which dominates the cost
//! of matching a short domain. Callers evaluating large domain sets should
//! skip passes whose result cannot matter.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::error::ExecError;

const STATE_RUNNING: u8 = 0;
const STATE_DONE: u8 = 1;
const STATE_ABANDONED: u8 = 2;

/// Something that can test a domain.
pub trait PatternMatcher: Send + Sync + 'static {
    fn is_match(&self, haystack: &str) -> bool;
}

impl PatternMatcher for Regex {
    fn is_match(&self, haystack: &str) -> bool {
        Regex::is_match(self, haystack)
    }
}

/// Preset execution budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeoutTier {
    /// 250 ms
    Short,
    /// 1 s
    #[default]
    Medium,
    /// 2.5 s
    Long,
    /// 5 s, the hard ceiling
    Maximum,
}

impl TimeoutTier {
    pub fn duration(&self) -> Duration {
        match self {
            TimeoutTier::Short => Duration::from_millis(250),
            TimeoutTier::Medium => Duration::from_millis(1000),
            TimeoutTier::Long => Duration::from_millis(2500),
            TimeoutTier::Maximum => Duration::from_millis(5000),
        }
    }
}

/// Worker-side end of the handshake with the waiting caller.
///
/// Dropping it, including while unwinding from a panicking matcher,
/// releases the abandoned count if the caller already gave up.
struct WorkerExit {
    state: Arc<AtomicU8>,
    abandoned: Arc<AtomicUsize>,
}

impl WorkerExit {
    /// Mark the match finished. Returns `false` if the caller gave up.
    fn finish(&self) -> bool {
        self.state
            .compare_exchange(STATE_RUNNING, STATE_DONE, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Drop for WorkerExit {
    fn drop(&mut self) {
        let swapped = self.state.compare_exchange(
            STATE_RUNNING,
            STATE_DONE,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if swapped == Err(STATE_ABANDONED) {
            self.abandoned.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

/// Runs matchers on abandonable worker threads.
#[derive(Debug, Clone)]
pub struct BoundedExecutor {
    timeout: Duration,
    /// Workers that timed out and are still running
    abandoned: Arc<AtomicUsize>,
}

impl Default for BoundedExecutor {
    fn default() -> Self {
        Self::with_tier(TimeoutTier::default())
    }
}

impl BoundedExecutor {
    /// Create an executor with a custom timeout, capped at [`TimeoutTier::Maximum`].
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout: timeout.min(TimeoutTier::Maximum.duration()),
            abandoned: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create an executor with a preset timeout.
    pub fn with_tier(tier: TimeoutTier) -> Self {
        Self::new(tier.duration())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Number of timed-out workers that have not finished yet.
    pub fn abandoned_workers(&self) -> usize {
        self.abandoned.load(Ordering::Acquire)
    }

    /// Match `input` against `matcher`, giving up after the timeout.
    ///
    /// Returns [`ExecError::Timeout`] when the deadline passes; the caller
    /// is never blocked longer than the timeout plus thread start-up.
    pub fn execute(
        &self,
        matcher: Arc<dyn PatternMatcher>,
        input: &str,
    ) -> Result<bool, ExecError> {
        let (tx, rx) = mpsc::sync_channel(1);
        let state = Arc::new(AtomicU8::new(STATE_RUNNING));
        let input = input.to_string();

        let exit = WorkerExit {
            state: Arc::clone(&state),
            abandoned: Arc::clone(&self.abandoned),
        };
        thread::Builder::new()
            .name("pattern-exec".to_string())
            .spawn(move || {
                let matched = matcher.is_match(&input);
                if exit.finish() {
                    let _ = tx.send(matched);
                }
            })
            .map_err(|e| ExecError::Worker(e.to_string()))?;

        match rx.recv_timeout(self.timeout) {
            Ok(matched) => Ok(matched),
            Err(RecvTimeoutError::Timeout) => {
                // Count first so the worker's decrement can never underflow
                self.abandoned.fetch_add(1, Ordering::AcqRel);
                let gave_up = state
                    .compare_exchange(
                        STATE_RUNNING,
                        STATE_ABANDONED,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    )
                    .is_ok();
                if gave_up {
                    return Err(ExecError::Timeout(self.timeout));
                }

                // Finished right at the deadline; the result is on its way
                self.abandoned.fetch_sub(1, Ordering::AcqRel);
                rx.recv()
                    .map_err(|_| ExecError::Worker("worker exited without a result".to_string()))
            }
            Err(RecvTimeoutError::Disconnected) => Err(ExecError::Worker(
                "worker exited without a result".to_string(),
            )),
        }
    }
}
