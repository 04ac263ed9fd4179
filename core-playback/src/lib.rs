//! # Song Cache Engine
//!
//! Downloads song files into a local cache and exposes them to a playback
//! consumer.
//!
//! ## Overview
//!
//! This crate handles:
//! - Resumable, rate-limited downloads with unbounded retry
//! - Disk budget enforcement through LRU eviction
//! - Playback readiness for partially downloaded songs
//! - Typed cache events for the player and UI

pub mod cache;
pub mod error;

pub use cache::{CacheConfig, CacheDependencies, CacheManager, CacheStats, ReadinessPolicy};
pub use error::{PlaybackError, Result};
