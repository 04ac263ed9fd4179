//! # Core Configuration Module
//!
//! Provides configuration management for the song cache core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds all dependencies and settings the core needs. It
//! enforces fail-fast validation so a missing bridge is reported at startup
//! instead of on the first download.
//!
//! ## Required Dependencies
//!
//! - `Downloader` - Streaming HTTP fetch (desktop default: reqwest, behind the
//!   `desktop-shims` feature)
//!
//! ## Optional Dependencies
//!
//! - `Clock` - Time source for access-time bookkeeping (default: system clock)
//!
//! ## Hot-reloadable settings
//!
//! The cache budget and the download rate limit live in [`CacheSettings`] and
//! are published through a [`CacheSettingsHandle`]. Every space check and
//! every chunk write reads the latest value, so changes apply without a
//! restart.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::{CacheSettings, CoreConfig};
//!
//! let config = CoreConfig::builder()
//!     .database_path("/path/to/cache.db")
//!     .cache_dir("/path/to/songs")
//!     .settings(CacheSettings::new(512 * 1024 * 1024))
//!     .build()?;
//!
//! config.settings.set_max_download_rate(Some(256 * 1024))?;
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{Clock, Downloader, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;

/// Default cache budget: 1 GiB.
pub const DEFAULT_MAX_CACHE_BYTES: u64 = 1024 * 1024 * 1024;

// ============================================================================
// Hot-reloadable settings
// ============================================================================

/// Settings the host may change while the cache is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    /// Disk budget for all cached song files.
    pub max_cache_bytes: u64,
    /// Maximum download rate in bytes per second, `None` for unlimited.
    pub max_download_rate: Option<u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            max_cache_bytes: DEFAULT_MAX_CACHE_BYTES,
            max_download_rate: None,
        }
    }
}

impl CacheSettings {
    pub fn new(max_cache_bytes: u64) -> Self {
        Self {
            max_cache_bytes,
            max_download_rate: None,
        }
    }

    pub fn with_max_download_rate(mut self, bytes_per_sec: Option<u64>) -> Self {
        self.max_download_rate = bytes_per_sec;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_cache_bytes == 0 {
            return Err(Error::Config(
                "Cache budget must be greater than 0 bytes".to_string(),
            ));
        }

        if self.max_download_rate == Some(0) {
            return Err(Error::Config(
                "Download rate limit must be greater than 0; use None for unlimited".to_string(),
            ));
        }

        Ok(())
    }
}

/// Publishes [`CacheSettings`] changes to the running cache.
///
/// Clones share the same channel.
#[derive(Debug, Clone)]
pub struct CacheSettingsHandle {
    sender: Arc<watch::Sender<CacheSettings>>,
}

impl CacheSettingsHandle {
    pub fn new(settings: CacheSettings) -> Result<Self> {
        settings.validate()?;
        let (sender, _) = watch::channel(settings);
        Ok(Self {
            sender: Arc::new(sender),
        })
    }

    /// Latest published settings.
    pub fn current(&self) -> CacheSettings {
        *self.sender.borrow()
    }

    /// Receiver that always observes the latest value.
    pub fn subscribe(&self) -> watch::Receiver<CacheSettings> {
        self.sender.subscribe()
    }

    /// Apply `f` to a copy of the current settings and publish the result if
    /// it validates. Invalid updates leave the current value untouched.
    pub fn update<F>(&self, f: F) -> Result<CacheSettings>
    where
        F: FnOnce(&mut CacheSettings),
    {
        let mut next = self.current();
        f(&mut next);
        next.validate()?;
        self.sender.send_replace(next);
        Ok(next)
    }

    pub fn set_max_cache_bytes(&self, bytes: u64) -> Result<CacheSettings> {
        self.update(|s| s.max_cache_bytes = bytes)
    }

    pub fn set_max_download_rate(&self, bytes_per_sec: Option<u64>) -> Result<CacheSettings> {
        self.update(|s| s.max_download_rate = bytes_per_sec)
    }
}

// ============================================================================
// Core configuration
// ============================================================================

/// Where the entry database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseLocation {
    File(PathBuf),
    /// Volatile database, useful for tests and previews.
    InMemory,
}

/// Core configuration for the song cache.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    pub database: DatabaseLocation,

    /// Directory holding `{song_id}.mp3` files
    pub cache_dir: PathBuf,

    pub settings: CacheSettingsHandle,

    pub downloader: Arc<dyn Downloader>,

    pub clock: Arc<dyn Clock>,

    /// Broadcast buffer for cache events
    pub event_buffer_size: usize,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("database", &self.database)
            .field("cache_dir", &self.cache_dir)
            .field("settings", &self.settings.current())
            .field("downloader", &"Downloader { ... }")
            .field("clock", &"Clock { ... }")
            .field("event_buffer_size", &self.event_buffer_size)
            .finish()
    }
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration and returns an error if invalid.
    ///
    /// This checks:
    /// - Database path is not empty
    /// - Cache directory is not empty
    /// - Settings are valid
    /// - Event buffer is not empty
    pub fn validate(&self) -> Result<()> {
        if let DatabaseLocation::File(path) = &self.database {
            if path.as_os_str().is_empty() {
                return Err(Error::Config("Database path cannot be empty".to_string()));
            }
        }

        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("Cache directory cannot be empty".to_string()));
        }

        self.settings.current().validate()?;

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(not(feature = "desktop-shims"))]
fn downloader_missing_error() -> Error {
    Error::CapabilityMissing {
        capability: "Downloader".to_string(),
        message: "Downloader implementation is required to fetch song files. \
                 Desktop: enable the 'desktop-shims' feature to use the default ReqwestDownloader. \
                 Mobile: inject a Downloader backed by the platform HTTP stack."
            .to_string(),
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_downloader() -> Result<Arc<dyn Downloader>> {
    use bridge_desktop::ReqwestDownloader;

    let downloader = ReqwestDownloader::new().map_err(|e| Error::CapabilityMissing {
        capability: "Downloader".to_string(),
        message: format!("Failed to create default ReqwestDownloader: {}", e),
    })?;
    Ok(Arc::new(downloader))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_downloader() -> Result<Arc<dyn Downloader>> {
    Err(downloader_missing_error())
}

/// Builder for constructing [`CoreConfig`] instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    database: Option<DatabaseLocation>,
    cache_dir: Option<PathBuf>,
    settings: Option<CacheSettings>,
    downloader: Option<Arc<dyn Downloader>>,
    clock: Option<Arc<dyn Clock>>,
    event_buffer_size: Option<usize>,
}

impl CoreConfigBuilder {
    /// Sets the SQLite database file.
    ///
    /// ```
    /// use core_runtime::config::CoreConfig;
    ///
    /// let builder = CoreConfig::builder().database_path("/path/to/cache.db");
    /// ```
    pub fn database_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.database = Some(DatabaseLocation::File(path.into()));
        self
    }

    /// Keeps entries in an in-memory database. Nothing survives a restart.
    pub fn in_memory_database(mut self) -> Self {
        self.database = Some(DatabaseLocation::InMemory);
        self
    }

    /// Sets the directory song files are written to.
    pub fn cache_dir<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.cache_dir = Some(path.into());
        self
    }

    /// Initial hot-reloadable settings.
    ///
    /// Default: 1 GiB budget, unlimited rate.
    pub fn settings(mut self, settings: CacheSettings) -> Self {
        self.settings = Some(settings);
        self
    }

    pub fn max_cache_bytes(mut self, bytes: u64) -> Self {
        let settings = self.settings.unwrap_or_default();
        self.settings = Some(CacheSettings {
            max_cache_bytes: bytes,
            ..settings
        });
        self
    }

    /// Sets the downloader implementation.
    ///
    /// If not provided, the desktop default (reqwest-based) is used when the
    /// `desktop-shims` feature is enabled.
    pub fn downloader(mut self, downloader: Arc<dyn Downloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    /// Sets the clock. Defaults to [`SystemClock`].
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// - `Error::Config` if the database location or cache directory is missing,
    ///   or a value is invalid
    /// - `Error::CapabilityMissing` if no `Downloader` was provided and no
    ///   platform default is available
    pub fn build(self) -> Result<CoreConfig> {
        let database = self.database.ok_or_else(|| {
            Error::Config(
                "Database location is required. Use .database_path() or .in_memory_database()."
                    .to_string(),
            )
        })?;

        let cache_dir = self.cache_dir.ok_or_else(|| {
            Error::Config("Cache directory is required. Use .cache_dir() to set it.".to_string())
        })?;

        let downloader = match self.downloader {
            Some(downloader) => downloader,
            None => provide_default_downloader()?,
        };

        let config = CoreConfig {
            database,
            cache_dir,
            settings: CacheSettingsHandle::new(self.settings.unwrap_or_default())?,
            downloader,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::{BridgeError, HttpRequest, StreamingResponse};

    struct NullDownloader;

    #[async_trait]
    impl Downloader for NullDownloader {
        async fn fetch(
            &self,
            _request: HttpRequest,
        ) -> std::result::Result<StreamingResponse, BridgeError> {
            Err(BridgeError::NotAvailable("offline".to_string()))
        }
    }

    fn base_builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .database_path("/db/cache.db")
            .cache_dir("/cache")
            .downloader(Arc::new(NullDownloader))
    }

    #[test]
    fn test_builder_requires_database() {
        let result = CoreConfig::builder()
            .cache_dir("/cache")
            .downloader(Arc::new(NullDownloader))
            .build();

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Database location is required"));
    }

    #[test]
    fn test_builder_requires_cache_dir() {
        let result = CoreConfig::builder()
            .database_path("/db/cache.db")
            .downloader(Arc::new(NullDownloader))
            .build();

        assert!(result
            .unwrap_err()
            .to_string()
            .contains("Cache directory is required"));
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_downloader() {
        let result = CoreConfig::builder()
            .database_path("/db/cache.db")
            .cache_dir("/cache")
            .build();

        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "Downloader")
            }
            other => panic!("expected CapabilityMissing, got {:?}", other),
        }
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_build_with_desktop_downloader() {
        let config = CoreConfig::builder()
            .in_memory_database()
            .cache_dir("/cache")
            .build()
            .expect("desktop defaults should succeed");
        assert_eq!(config.database, DatabaseLocation::InMemory);
    }

    #[test]
    fn test_builder_defaults() {
        let config = base_builder().build().unwrap();

        assert_eq!(
            config.database,
            DatabaseLocation::File(PathBuf::from("/db/cache.db"))
        );
        assert_eq!(config.cache_dir, PathBuf::from("/cache"));
        assert_eq!(config.settings.current(), CacheSettings::default());
        assert_eq!(config.event_buffer_size, DEFAULT_EVENT_BUFFER_SIZE);
    }

    #[test]
    fn test_builder_rejects_zero_budget() {
        let result = base_builder().max_cache_bytes(0).build();
        assert!(result
            .unwrap_err()
            .to_string()
            .contains("must be greater than 0"));
    }

    #[test]
    fn test_builder_rejects_empty_event_buffer() {
        assert!(base_builder().event_buffer_size(0).build().is_err());
    }

    #[test]
    fn test_settings_handle_publishes_updates() {
        let handle = CacheSettingsHandle::new(CacheSettings::new(100)).unwrap();
        let receiver = handle.subscribe();

        handle.set_max_cache_bytes(200).unwrap();
        handle.set_max_download_rate(Some(1024)).unwrap();

        let seen = *receiver.borrow();
        assert_eq!(seen.max_cache_bytes, 200);
        assert_eq!(seen.max_download_rate, Some(1024));

        let clone = handle.clone();
        clone.set_max_download_rate(None).unwrap();
        assert_eq!(handle.current().max_download_rate, None);
    }

    #[test]
    fn test_settings_handle_rejects_invalid_update() {
        let handle = CacheSettingsHandle::new(CacheSettings::new(100)).unwrap();

        assert!(handle.set_max_cache_bytes(0).is_err());
        assert!(handle.set_max_download_rate(Some(0)).is_err());
        assert_eq!(handle.current(), CacheSettings::new(100));
    }

    #[test]
    fn test_config_debug_hides_bridges() {
        let config = base_builder().build().unwrap();
        let debug = format!("{:?}", config);
        assert!(debug.contains("Downloader { ... }"));
        assert!(debug.contains("/cache"));
    }
}
