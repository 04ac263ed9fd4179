//! Cache engine configuration
//!
//! Tuning that is fixed for the lifetime of a [`CacheManager`](super::CacheManager).
//! The hot-reloadable budget and rate live in `core_runtime::CacheSettings`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the cache manager.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding `{song_id}.mp3` files
    pub cache_dir: PathBuf,

    /// Bytes written per chunk (default: 64 KiB)
    pub chunk_size: usize,

    /// Minimum spacing of forwarded progress updates (default: 250ms)
    pub progress_interval: Duration,

    /// Number of downloads writing at the same time (default: 2)
    pub max_concurrent_downloads: usize,

    /// Delay after the first failure with no prior backoff (default: 1s)
    pub initial_backoff: Duration,

    /// Ceiling of the doubling backoff (default: 60s)
    pub max_backoff: Duration,

    /// When a partially cached song may start playing
    pub readiness: ReadinessPolicy,

    /// Capacity of the handle → worker command queue (default: 64)
    pub command_capacity: usize,

    /// How long `clear()` and `quit()` wait for aborted tasks (default: 5s)
    pub drain_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("song_cache"),
            chunk_size: 64 * 1024,
            progress_interval: Duration::from_millis(250),
            max_concurrent_downloads: 2,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            readiness: ReadinessPolicy::default(),
            command_capacity: 64,
            drain_timeout: Duration::from_secs(5),
        }
    }
}

impl CacheConfig {
    /// Create a configuration for the given cache directory with default tuning.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes;
        self
    }

    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval;
        self
    }

    /// Set maximum concurrent downloads.
    pub fn with_max_concurrent_downloads(mut self, count: usize) -> Self {
        self.max_concurrent_downloads = count;
        self
    }

    /// Set the initial and maximum retry backoff.
    pub fn with_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.initial_backoff = initial;
        self.max_backoff = max;
        self
    }

    pub fn with_readiness(mut self, policy: ReadinessPolicy) -> Self {
        self.readiness = policy;
        self
    }

    pub fn with_command_capacity(mut self, capacity: usize) -> Self {
        self.command_capacity = capacity;
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err("cache_dir cannot be empty".to_string());
        }

        if self.chunk_size == 0 {
            return Err("chunk_size must be greater than 0".to_string());
        }

        if self.max_concurrent_downloads == 0 {
            return Err("max_concurrent_downloads must be at least 1".to_string());
        }

        if self.initial_backoff.is_zero() {
            return Err("initial_backoff must be greater than 0".to_string());
        }

        if self.max_backoff < self.initial_backoff {
            return Err("max_backoff cannot be shorter than initial_backoff".to_string());
        }

        if self.command_capacity == 0 {
            return Err("command_capacity must be at least 1".to_string());
        }

        Ok(())
    }
}

/// Thresholds for starting playback of a song that is still downloading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadinessPolicy {
    /// Bytes that must already be on disk (default: 128 KiB)
    pub min_buffer_bytes: u64,

    /// Projected completion must land this far before the song ends (default: 10s)
    pub safety_margin: Duration,
}

impl Default for ReadinessPolicy {
    fn default() -> Self {
        Self {
            min_buffer_bytes: 128 * 1024,
            safety_margin: Duration::from_secs(10),
        }
    }
}
