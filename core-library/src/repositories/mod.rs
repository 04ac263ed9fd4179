//! # Repository Pattern Implementation
//!
//! Repository traits and SQLite implementations for data access.
//!
//! ## Architecture
//!
//! - Traits define the interface so the cache engine can be tested with
//!   doubles
//! - SQLite implementations use sqlx for async database access
//! - All operations return `Result<T>` for error handling
//!
//! ## Available Repositories
//!
//! - `CacheEntryRepository` - Bookkeeping rows for cached song files

pub mod cache_entry;

pub use cache_entry::{CacheEntryRepository, SqliteCacheEntryRepository};
