//! Persistence of aggregation outcomes.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::aggregate::AggregationOutcome;
use crate::error::Result;

/// Receives every completed outcome.
pub trait AggregationStore: Send + Sync {
    fn record(&self, outcome: &AggregationOutcome) -> Result<()>;

    /// Most recently recorded outcome.
    fn latest(&self) -> Result<Option<AggregationOutcome>>;
}

/// In-memory store keeping the last `capacity` outcomes.
pub struct MemoryStore {
    capacity: usize,
    history: Mutex<VecDeque<AggregationOutcome>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(16)
    }
}

impl MemoryStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            history: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    /// Recorded outcomes, oldest first.
    pub fn history(&self) -> Vec<AggregationOutcome> {
        self.history.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.history.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.lock().is_empty()
    }
}

impl AggregationStore for MemoryStore {
    fn record(&self, outcome: &AggregationOutcome) -> Result<()> {
        let mut history = self.history.lock();
        if history.len() == self.capacity {
            history.pop_front();
        }
        history.push_back(outcome.clone());
        Ok(())
    }

    fn latest(&self) -> Result<Option<AggregationOutcome>> {
        Ok(self.history.lock().back().cloned())
    }
}

/// Keeps the latest outcome as pretty JSON on disk.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AggregationStore for JsonFileStore {
    fn record(&self, outcome: &AggregationOutcome) -> Result<()> {
        let json = serde_json::to_vec_pretty(outcome)?;
        write_atomic(&self.path, &json)?;
        log::debug!("Stored outcome at {}", self.path.display());
        Ok(())
    }

    fn latest(&self) -> Result<Option<AggregationOutcome>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read(&self.path)?;
        Ok(Some(serde_json::from_slice(&data)?))
    }
}

/// Write via a sibling temp file and rename over the target.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut temp_name = path.as_os_str().to_owned();
    temp_name.push(".tmp");
    let temp_path = PathBuf::from(temp_name);

    let mut file = fs::File::create(&temp_path)?;
    file.write_all(data)?;
    file.sync_all()?;
    drop(file);

    fs::rename(&temp_path, path)
}
