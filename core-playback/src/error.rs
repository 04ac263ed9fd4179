//! # Cache Error Types
//!
//! Error types for the song file cache.

use thiserror::Error;

/// Errors that can occur during cache operations.
#[derive(Error, Debug)]
pub enum PlaybackError {
    // ========================================================================
    // Cache Errors
    // ========================================================================
    /// Cache operation failed.
    #[error("Cache error: {0}")]
    CacheError(String),

    /// Song has no cache entry.
    #[error("Song not cached: {0}")]
    NotCached(String),

    /// Eviction could not free enough space.
    #[error("Cache storage full: {needed} bytes needed")]
    CacheFull { needed: u64 },

    /// The cache worker has shut down.
    #[error("Cache worker stopped")]
    WorkerStopped,

    /// Engine configuration rejected at startup.
    #[error("Invalid cache configuration: {0}")]
    InvalidConfig(String),

    // ========================================================================
    // Generic Errors
    // ========================================================================
    /// I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error from a host capability such as the downloader.
    #[error("Bridge error: {0}")]
    Bridge(#[from] bridge_traits::BridgeError),

    /// Persistence error from core-library.
    #[error("Library error: {0}")]
    LibraryError(#[from] core_library::LibraryError),

    /// Runtime configuration error.
    #[error("Runtime error: {0}")]
    Runtime(#[from] core_runtime::Error),
}

impl PlaybackError {
    /// Returns `true` if this error is transient and the operation can be retried.
    pub fn is_transient(&self) -> bool {
        match self {
            PlaybackError::IoError(_) => true,
            PlaybackError::Bridge(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Result type for cache operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
