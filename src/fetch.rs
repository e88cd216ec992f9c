//! Source retrieval.
//!
//! The aggregation core only sees raw text; this module provides the
//! fetchers that produce it:
//! - [`HttpFetcher`]: downloads with an on-disk cache, ETag conditional
//!   requests (304 Not Modified) and stale-cache fallback
//! - [`FileFetcher`]: local paths and `file://` URLs
//! - [`DefaultFetcher`]: dispatches on the URL scheme
//! - [`StaticFetcher`]: in-memory content keyed by URL

use ahash::AHashMap;
use flate2::read::GzDecoder;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::FetchError;
use crate::metadata::CacheMetadata;
use crate::Source;

/// Default HTTP timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

/// Largest body accepted from a source.
const MAX_BODY_BYTES: u64 = 256 * 1024 * 1024;

/// Raw text of a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedContent {
    pub text: String,
    /// Served from a local cache instead of a fresh download
    pub from_cache: bool,
}

impl FetchedContent {
    pub fn fresh(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            from_cache: false,
        }
    }

    pub fn cached(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            from_cache: true,
        }
    }
}

/// Retrieves the raw text of a source.
///
/// Implementations make no retry guarantee.
pub trait SourceFetcher: Send + Sync {
    fn fetch(&self, source: &Source) -> Result<FetchedContent, FetchError>;
}

impl<F> SourceFetcher for F
where
    F: Fn(&Source) -> Result<FetchedContent, FetchError> + Send + Sync,
{
    fn fetch(&self, source: &Source) -> Result<FetchedContent, FetchError> {
        self(source)
    }
}

/// In-memory fetcher keyed by source URL.
#[derive(Debug, Clone, Default)]
pub struct StaticFetcher {
    contents: AHashMap<String, String>,
}

impl StaticFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register content for a URL.
    pub fn with(mut self, url: impl Into<String>, text: impl Into<String>) -> Self {
        self.contents.insert(url.into(), text.into());
        self
    }
}

impl SourceFetcher for StaticFetcher {
    fn fetch(&self, source: &Source) -> Result<FetchedContent, FetchError> {
        self.contents
            .get(&source.url)
            .map(|text| FetchedContent::fresh(text.clone()))
            .ok_or_else(|| FetchError::Missing(source.id.clone()))
    }
}

/// Reads local files (plain paths or `file://` URLs).
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFetcher;

impl FileFetcher {
    fn path_of(url: &str) -> &Path {
        Path::new(url.strip_prefix("file://").unwrap_or(url))
    }
}

impl SourceFetcher for FileFetcher {
    fn fetch(&self, source: &Source) -> Result<FetchedContent, FetchError> {
        let path = Self::path_of(&source.url);
        let data = fs::read(path).map_err(|e| FetchError::Io {
            location: path.display().to_string(),
            source: e,
        })?;
        Ok(FetchedContent::fresh(decode_body(&source.url, data)?))
    }
}

/// HTTP(S) fetcher with an optional on-disk cache.
///
/// Cached bodies live in `cache_dir` under the SHA-256 of the URL:
/// `<hash>.txt` for the body and `<hash>.meta` for [`CacheMetadata`].
pub struct HttpFetcher {
    agent: ureq::Agent,
    cache_dir: Option<PathBuf>,
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_HTTP_TIMEOUT)
    }
}

impl HttpFetcher {
    /// Create an uncached fetcher.
    pub fn new(timeout: Duration) -> Self {
        let agent = ureq::AgentBuilder::new()
            .timeout(timeout)
            .user_agent(concat!("hostmerge/", env!("CARGO_PKG_VERSION")))
            .build();
        Self {
            agent,
            cache_dir: None,
        }
    }

    /// Enable the on-disk cache.
    pub fn with_cache_dir(mut self, cache_dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = Some(cache_dir.into());
        self
    }

    pub fn cache_dir(&self) -> Option<&Path> {
        self.cache_dir.as_deref()
    }

    /// Cache key for a URL.
    fn cache_key(url: &str) -> String {
        hex::encode(Sha256::digest(url.as_bytes()))
    }

    fn body_path(dir: &Path, key: &str) -> PathBuf {
        dir.join(format!("{}.txt", key))
    }

    fn meta_path(dir: &Path, key: &str) -> PathBuf {
        dir.join(format!("{}.meta", key))
    }

    fn temp_path(dir: &Path, key: &str) -> PathBuf {
        dir.join(format!("{}.tmp", key))
    }

    fn read_cached(&self, url: &str) -> Option<String> {
        let dir = self.cache_dir.as_deref()?;
        fs::read_to_string(Self::body_path(dir, &Self::cache_key(url))).ok()
    }

    /// Atomically replace the cached body and its metadata.
    fn store_cached(&self, url: &str, text: &str, etag: Option<String>) -> std::io::Result<()> {
        let Some(dir) = self.cache_dir.as_deref() else {
            return Ok(());
        };
        fs::create_dir_all(dir)?;
        let key = Self::cache_key(url);

        let temp_path = Self::temp_path(dir, &key);
        let mut temp_file = fs::File::create(&temp_path)?;
        temp_file.write_all(text.as_bytes())?;
        temp_file.sync_all()?;
        drop(temp_file);
        fs::rename(&temp_path, Self::body_path(dir, &key))?;

        let meta = CacheMetadata::fetched_now(url, etag, text.len() as u64);
        meta.save(Self::meta_path(dir, &key))
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }

    fn cached_etag(&self, url: &str) -> Option<String> {
        let dir = self.cache_dir.as_deref()?;
        let key = Self::cache_key(url);
        if !Self::body_path(dir, &key).exists() {
            return None;
        }
        CacheMetadata::load(Self::meta_path(dir, &key))
            .ok()
            .and_then(|meta| meta.etag)
    }

    /// Serve the cache after a failed download, if there is one.
    fn fall_back_to_cache(&self, url: &str, err: FetchError) -> Result<FetchedContent, FetchError> {
        match self.read_cached(url) {
            Some(text) => {
                log::warn!("Download failed, serving cached copy of {}: {}", url, err);
                Ok(FetchedContent::cached(text))
            }
            None => Err(err),
        }
    }
}

impl SourceFetcher for HttpFetcher {
    fn fetch(&self, source: &Source) -> Result<FetchedContent, FetchError> {
        let url = source.url.as_str();
        let mut request = self.agent.get(url);
        if let Some(ref etag) = self.cached_etag(url) {
            request = request.set("If-None-Match", etag);
        }

        let response = match request.call() {
            Ok(response) => response,
            Err(ureq::Error::Status(304, _)) => {
                log::debug!("Source {} not modified (304)", source.id);
                return match self.read_cached(url) {
                    Some(text) => Ok(FetchedContent::cached(text)),
                    None => Err(FetchError::Status {
                        url: url.to_string(),
                        status: 304,
                    }),
                };
            }
            Err(ureq::Error::Status(status, _)) => {
                return self.fall_back_to_cache(
                    url,
                    FetchError::Status {
                        url: url.to_string(),
                        status,
                    },
                );
            }
            Err(ureq::Error::Transport(t)) => {
                return self.fall_back_to_cache(
                    url,
                    FetchError::Transport {
                        url: url.to_string(),
                        message: t.to_string(),
                    },
                );
            }
        };

        let etag = response.header("ETag").map(str::to_string);
        let mut raw = Vec::new();
        response
            .into_reader()
            .take(MAX_BODY_BYTES)
            .read_to_end(&mut raw)
            .map_err(|e| FetchError::Transport {
                url: url.to_string(),
                message: format!("failed to read body: {}", e),
            })?;

        let raw_len = raw.len();
        let text = decode_body(url, raw)?;
        log::info!(
            "Downloaded {}: {} bytes ({} on the wire)",
            source.display_name(),
            text.len(),
            raw_len
        );

        if let Err(e) = self.store_cached(url, &text, etag) {
            log::warn!("Failed to cache {}: {}", url, e);
        }

        Ok(FetchedContent::fresh(text))
    }
}

/// Fetcher that picks HTTP or file access from the URL scheme.
#[derive(Default)]
pub struct DefaultFetcher {
    http: HttpFetcher,
    file: FileFetcher,
}

impl DefaultFetcher {
    pub fn new(http: HttpFetcher) -> Self {
        Self {
            http,
            file: FileFetcher,
        }
    }
}

impl SourceFetcher for DefaultFetcher {
    fn fetch(&self, source: &Source) -> Result<FetchedContent, FetchError> {
        let url = source.url.as_str();
        if url.starts_with("http://") || url.starts_with("https://") {
            self.http.fetch(source)
        } else if url.starts_with("file://") || !url.contains("://") {
            self.file.fetch(source)
        } else {
            Err(FetchError::Unsupported(url.to_string()))
        }
    }
}

/// Check if data is gzip compressed.
fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x1f && data[1] == 0x8b
}

/// Gunzip if needed and decode as UTF-8, replacing invalid sequences.
fn decode_body(location: &str, data: Vec<u8>) -> Result<String, FetchError> {
    let data = if is_gzip(&data) {
        let mut decoded = Vec::new();
        GzDecoder::new(&data[..])
            .take(MAX_BODY_BYTES)
            .read_to_end(&mut decoded)
            .map_err(|e| {
                FetchError::Decode(location.to_string(), format!("gzip: {}", e))
            })?;
        decoded
    } else {
        data
    };

    Ok(match String::from_utf8(data) {
        Ok(text) => text,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    })
}
