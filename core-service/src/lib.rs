//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (the `Downloader`
//! and `Clock`) and the `CoreConfig` into the song cache. The service is
//! constructed once at process start and its [`CacheManager`] handle is passed
//! to every consumer that needs it; there is no global instance.
//!
//! Desktop apps typically enable the `desktop-shims` feature, which supplies
//! a `reqwest`-backed downloader when none is injected.

pub mod error;

pub use error::{CoreError, Result};

pub use core_library::{CacheEntry, Song, SongId};
pub use core_playback::{CacheConfig, CacheManager, CacheStats, ReadinessPolicy};
pub use core_runtime::{CacheEvent, CacheSettings, CacheSettingsHandle, CoreConfig, EventStream};

#[cfg(all(feature = "desktop-shims", not(target_arch = "wasm32")))]
pub use bridge_desktop::ReqwestDownloader;

use core_library::db::{create_pool, DatabaseConfig};
use core_library::SqliteCacheEntryRepository;
use core_playback::{CacheDependencies, PlaybackError};
use core_runtime::{DatabaseLocation, EventBus};
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::{info, instrument};

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    cache: CacheManager,
    settings: CacheSettingsHandle,
    pool: SqlitePool,
}

impl CoreService {
    /// Open the database, start the cache worker and wait for its entries
    /// to load.
    ///
    /// ```rust,ignore
    /// let config = CoreConfig::builder()
    ///     .database_path("/data/song-cache.db")
    ///     .cache_dir("/data/songs")
    ///     .build()?;
    /// let core = CoreService::bootstrap(config).await?;
    /// core.cache().download_song(song).await?;
    /// ```
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        let tuning = CacheConfig::new(&config.cache_dir);
        Self::bootstrap_with(config, tuning).await
    }

    /// Like [`CoreService::bootstrap`], with custom cache engine tuning.
    ///
    /// Chunk size, download concurrency, backoff and the readiness policy are
    /// taken from `tuning`. Its `cache_dir` is replaced by the one in `config`.
    ///
    /// ```rust,ignore
    /// let tuning = CacheConfig::default()
    ///     .with_max_concurrent_downloads(4)
    ///     .with_backoff(Duration::from_millis(500), Duration::from_secs(30));
    /// let core = CoreService::bootstrap_with(config, tuning).await?;
    /// ```
    #[instrument(skip(config, tuning), fields(cache_dir = ?config.cache_dir))]
    pub async fn bootstrap_with(config: CoreConfig, tuning: CacheConfig) -> Result<Self> {
        config.validate()?;
        let tuning = CacheConfig {
            cache_dir: config.cache_dir.clone(),
            ..tuning
        };
        tuning.validate().map_err(PlaybackError::InvalidConfig)?;

        let database = match &config.database {
            DatabaseLocation::File(path) => DatabaseConfig::new(path),
            DatabaseLocation::InMemory => DatabaseConfig::in_memory(),
        };
        let pool = create_pool(database).await?;

        let deps = CacheDependencies {
            repository: Arc::new(SqliteCacheEntryRepository::new(pool.clone())),
            downloader: config.downloader.clone(),
            clock: config.clock.clone(),
            settings: config.settings.subscribe(),
            events: EventBus::new(config.event_buffer_size),
        };

        let cache = CacheManager::spawn(tuning, deps)?;
        if let Err(e) = cache.wait_until_loaded().await {
            cache.quit().await;
            pool.close().await;
            return Err(CoreError::InitializationFailed(e.to_string()));
        }

        info!("Core service ready");
        Ok(Self {
            cache,
            settings: config.settings,
            pool,
        })
    }

    /// Handle to the song cache.
    pub fn cache(&self) -> &CacheManager {
        &self.cache
    }

    /// Hot-reloadable cache budget and download rate.
    pub fn settings(&self) -> &CacheSettingsHandle {
        &self.settings
    }

    pub fn subscribe(&self) -> EventStream {
        self.cache.subscribe()
    }

    /// Stop the cache worker and close the database.
    pub async fn shutdown(&self) {
        self.cache.quit().await;
        self.pool.close().await;
        info!("Core service stopped");
    }
}

impl std::fmt::Debug for CoreService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreService")
            .field("cache", &self.cache)
            .field("settings", &self.settings.current())
            .finish_non_exhaustive()
    }
}
