//! Per-source cache metadata.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime};

use crate::error::Result;

/// What we know about a cached source body.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct CacheMetadata {
    /// URL the body was fetched from
    pub url: String,
    /// ETag returned by the server, for conditional requests
    pub etag: Option<String>,
    #[serde(default, with = "system_time_serde")]
    pub fetched_at: Option<SystemTime>,
    /// Size of the cached body in bytes
    pub content_length: u64,
}

pub(crate) mod system_time_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &Option<SystemTime>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        time.map(|t| t.duration_since(UNIX_EPOCH).unwrap_or_default().as_secs())
            .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<SystemTime>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs: Option<u64> = Option::deserialize(deserializer)?;
        Ok(secs.map(|s| UNIX_EPOCH + Duration::from_secs(s)))
    }
}

impl CacheMetadata {
    /// Metadata for a body fetched just now.
    pub fn fetched_now(url: &str, etag: Option<String>, content_length: u64) -> Self {
        Self {
            url: url.to_string(),
            etag,
            fetched_at: Some(SystemTime::now()),
            content_length,
        }
    }

    /// Load metadata from a file.
    ///
    /// Returns default metadata if the file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save metadata to a file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Time since the body was fetched, `None` if never fetched.
    pub fn age(&self) -> Option<Duration> {
        self.fetched_at
            .map(|t| SystemTime::now().duration_since(t).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_metadata_save_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("list.meta");
        let meta = CacheMetadata::fetched_now("https://x.test/hosts", Some("\"abc\"".into()), 42);
        meta.save(&path).unwrap();

        let loaded = CacheMetadata::load(&path).unwrap();
        assert_eq!(loaded.url, "https://x.test/hosts");
        assert_eq!(loaded.etag.as_deref(), Some("\"abc\""));
        assert_eq!(loaded.content_length, 42);
        assert!(loaded.fetched_at.is_some());
    }

    #[test]
    fn test_metadata_missing_file() {
        let loaded = CacheMetadata::load("/nonexistent/path.meta").unwrap();
        assert!(loaded.fetched_at.is_none());
        assert!(loaded.age().is_none());
    }

    #[test]
    fn test_metadata_age() {
        let meta = CacheMetadata {
            fetched_at: Some(SystemTime::now() - Duration::from_secs(120)),
            ..CacheMetadata::default()
        };
        assert!(meta.age().unwrap() >= Duration::from_secs(120));
    }
}
