//! # Song File Cache
//!
//! Local, persistent cache of remotely hosted song files.
//!
//! ## Overview
//!
//! The cache streams a song to disk so playback can start before the file is
//! complete, prefetches upcoming songs, and keeps the directory within a
//! disk budget by evicting least-recently-used entries.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────┐
//! │     CacheManager (handle)              │
//! │  - download_song()                     │
//! │  - abort_download()                    │
//! │  - clear() / quit()                    │
//! └────────┬───────────────────────────────┘
//!          │ commands
//! ┌────────▼───────────────────────────────┐
//! │     Cache worker                       │
//! │  - in-flight / pinned sets             │
//! └────────┬───────────────────────────────┘
//!          │
//!          ├──> EntryStore (mirror + SQLite writer)
//!          ├──> SpaceReclaimer (LRU eviction)
//!          └──> DownloadTask × N (Downloader, progress, backoff)
//! ```
//!
//! Listeners receive [`core_runtime::CacheEvent`]s through
//! [`CacheManager::subscribe`].

pub mod config;
pub mod download_task;
pub mod entry_store;
pub mod manager;
pub mod progress;
pub mod readiness;
pub mod reclaimer;
pub mod stats;

pub use config::{CacheConfig, ReadinessPolicy};
pub use download_task::Backoff;
pub use entry_store::EntryStore;
pub use manager::{CacheDependencies, CacheManager};
pub use progress::ProgressReporter;
pub use readiness::can_start_playback;
pub use reclaimer::SpaceReclaimer;
pub use stats::{format_bytes, CacheStats};
