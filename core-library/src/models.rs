//! Domain models for the song cache
//!
//! This module contains the song descriptor consumed from the host library and
//! the cache bookkeeping records with their database mapping.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::path::{Path, PathBuf};

/// Extension of every cached song file.
pub const CACHE_FILE_EXTENSION: &str = "mp3";

// =============================================================================
// ID Types
// =============================================================================

/// Stable identifier of a song, shared with the host's metadata store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(transparent)]
pub struct SongId(pub i64);

impl SongId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    /// File name of the cached copy, e.g. `42.mp3`.
    ///
    /// Derived from the numeric id only, so it never contains separators or
    /// characters that need escaping.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.0, CACHE_FILE_EXTENSION)
    }

    /// Parses a file name produced by [`SongId::file_name`].
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(CACHE_FILE_EXTENSION)?.strip_suffix('.')?;
        stem.parse().ok().map(Self)
    }
}

impl From<i64> for SongId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SongId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// Song
// =============================================================================

/// Song descriptor handed to the cache by the host library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    pub id: SongId,
    /// Content URL the file is fetched from
    pub url: String,
    /// Nominal duration in seconds
    pub length_sec: u32,
}

impl Song {
    pub fn new(id: impl Into<SongId>, url: impl Into<String>, length_sec: u32) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            length_sec,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        u64::from(self.length_sec) * 1000
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err(format!("Song {} has an empty content URL", self.id));
        }
        Ok(())
    }
}

// =============================================================================
// Cache Entry
// =============================================================================

/// Bookkeeping for one song's cached file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub song_id: SongId,
    /// Authoritative size, 0 until the first successful response
    pub total_bytes: u64,
    /// Bytes durably on disk
    pub cached_bytes: u64,
    /// Unix epoch milliseconds of the last playback read or creation
    pub last_access_time: i64,
}

impl CacheEntry {
    /// Fresh entry for a song that has never been requested.
    pub fn new(song_id: SongId, now_ms: i64) -> Self {
        Self {
            song_id,
            total_bytes: 0,
            cached_bytes: 0,
            last_access_time: now_ms,
        }
    }

    pub fn is_fully_cached(&self) -> bool {
        self.total_bytes > 0 && self.cached_bytes == self.total_bytes
    }

    /// Bytes still missing, 0 while the total is unknown.
    pub fn remaining_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.cached_bytes)
    }

    pub fn local_path(&self, cache_dir: &Path) -> PathBuf {
        cache_dir.join(self.song_id.file_name())
    }

    /// Checks `cached_bytes <= total_bytes` once the total is known.
    pub fn validate(&self) -> Result<(), String> {
        if self.total_bytes > 0 && self.cached_bytes > self.total_bytes {
            return Err(format!(
                "Entry {} has {} cached bytes but only {} total",
                self.song_id, self.cached_bytes, self.total_bytes
            ));
        }
        Ok(())
    }
}

/// Persisted columns of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRow)]
pub struct CacheEntryRecord {
    pub song_id: SongId,
    pub total_bytes: i64,
    pub last_access_time: i64,
}

impl CacheEntryRecord {
    /// Combine the persisted row with the size measured on disk.
    ///
    /// The byte count is clamped to a known total. An oversized file itself
    /// is left alone here and repaired by the next download.
    pub fn into_entry(self, bytes_on_disk: u64) -> CacheEntry {
        let total_bytes = u64::try_from(self.total_bytes).unwrap_or(0);
        let cached_bytes = if total_bytes > 0 {
            bytes_on_disk.min(total_bytes)
        } else {
            bytes_on_disk
        };
        CacheEntry {
            song_id: self.song_id,
            total_bytes,
            cached_bytes,
            last_access_time: self.last_access_time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_song_id_file_name_round_trip() {
        let id = SongId::new(42);
        assert_eq!(id.file_name(), "42.mp3");
        assert_eq!(SongId::from_file_name("42.mp3"), Some(id));
        assert_eq!(SongId::from_file_name("-7.mp3"), Some(SongId(-7)));
        assert_eq!(SongId::from_file_name("42.mp3.tmp"), None);
        assert_eq!(SongId::from_file_name("notes.txt"), None);
        assert_eq!(SongId::from_file_name("abc.mp3"), None);
    }

    #[test]
    fn test_song_validation() {
        let song = Song::new(1, "https://example.com/1.mp3", 180);
        assert!(song.validate().is_ok());
        assert_eq!(song.duration_ms(), 180_000);

        let empty = Song::new(2, "  ", 10);
        assert!(empty.validate().unwrap_err().contains("empty content URL"));
    }

    #[test]
    fn test_entry_fully_cached() {
        let mut entry = CacheEntry::new(SongId(1), 1_000);
        assert!(!entry.is_fully_cached());
        assert_eq!(entry.remaining_bytes(), 0);

        entry.total_bytes = 100;
        entry.cached_bytes = 40;
        assert!(!entry.is_fully_cached());
        assert_eq!(entry.remaining_bytes(), 60);

        entry.cached_bytes = 100;
        assert!(entry.is_fully_cached());
    }

    #[test]
    fn test_entry_validation() {
        let mut entry = CacheEntry::new(SongId(1), 0);
        entry.cached_bytes = 10;
        // Unknown total accepts any byte count.
        assert!(entry.validate().is_ok());

        entry.total_bytes = 5;
        assert!(entry.validate().is_err());
    }

    #[test]
    fn test_local_path_is_derived_from_id() {
        let entry = CacheEntry::new(SongId(9), 0);
        assert_eq!(
            entry.local_path(Path::new("/cache")),
            PathBuf::from("/cache/9.mp3")
        );
    }

    #[test]
    fn test_record_into_entry() {
        let record = CacheEntryRecord {
            song_id: SongId(3),
            total_bytes: 100,
            last_access_time: 55,
        };
        let entry = record.into_entry(60);
        assert_eq!(entry.total_bytes, 100);
        assert_eq!(entry.cached_bytes, 60);
        assert_eq!(entry.last_access_time, 55);

        assert_eq!(record.into_entry(150).cached_bytes, 100);

        let unknown_total = CacheEntryRecord {
            total_bytes: 0,
            ..record
        };
        assert_eq!(unknown_total.into_entry(150).cached_bytes, 150);
    }
}
