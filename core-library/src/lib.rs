//! # Cache Library Module
//!
//! Owns the cache bookkeeping database and the song/entry data model.
//!
//! ## Overview
//!
//! This module manages:
//! - SQLite pool creation with embedded migrations
//! - The `Song`, `SongId` and `CacheEntry` models
//! - `CacheEntryRepository` for persisting entry rows

pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use error::{LibraryError, Result};
pub use models::{CacheEntry, CacheEntryRecord, Song, SongId};
pub use repositories::{CacheEntryRepository, SqliteCacheEntryRepository};
