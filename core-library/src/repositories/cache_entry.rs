//! Cache entry repository trait and implementation

use crate::error::{LibraryError, Result};
use crate::models::{CacheEntry, CacheEntryRecord, SongId};
use async_trait::async_trait;
use sqlx::{query_as, SqlitePool};
use tracing::{debug, instrument};

/// Persistence for cache bookkeeping rows.
///
/// Bytes on disk are not persisted; callers measure the song file instead.
#[async_trait]
pub trait CacheEntryRepository: Send + Sync {
    /// All persisted rows, in no particular order.
    async fn load_all(&self) -> Result<Vec<CacheEntryRecord>>;

    /// Find a single row.
    async fn find_by_id(&self, song_id: SongId) -> Result<Option<CacheEntryRecord>>;

    /// Insert the entry or overwrite the existing row for its song.
    async fn upsert(&self, entry: &CacheEntry) -> Result<()>;

    /// Delete a row.
    ///
    /// # Returns
    /// - `Ok(true)` if a row was removed
    /// - `Ok(false)` if none existed
    async fn delete(&self, song_id: SongId) -> Result<bool>;

    /// Delete every row, returning how many were removed.
    async fn delete_all(&self) -> Result<u64>;

    /// Record the authoritative size. Returns `false` if the row is missing.
    async fn set_total_bytes(&self, song_id: SongId, total_bytes: u64) -> Result<bool>;

    /// Record a playback read or creation time. Returns `false` if the row is missing.
    async fn touch(&self, song_id: SongId, access_time_ms: i64) -> Result<bool>;
}

/// SQLite implementation of CacheEntryRepository
#[derive(Clone)]
pub struct SqliteCacheEntryRepository {
    pool: SqlitePool,
}

impl SqliteCacheEntryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn to_db_bytes(song_id: SongId, bytes: u64) -> Result<i64> {
    i64::try_from(bytes).map_err(|_| LibraryError::InvalidInput {
        field: "total_bytes".to_string(),
        message: format!("{} bytes for song {} exceeds the storable range", bytes, song_id),
    })
}

#[async_trait]
impl CacheEntryRepository for SqliteCacheEntryRepository {
    #[instrument(skip(self))]
    async fn load_all(&self) -> Result<Vec<CacheEntryRecord>> {
        let rows = query_as::<_, CacheEntryRecord>(
            "SELECT song_id, total_bytes, last_access_time FROM cache_entries",
        )
        .fetch_all(&self.pool)
        .await?;

        debug!(count = rows.len(), "Loaded cache entries");
        Ok(rows)
    }

    async fn find_by_id(&self, song_id: SongId) -> Result<Option<CacheEntryRecord>> {
        let row = query_as::<_, CacheEntryRecord>(
            "SELECT song_id, total_bytes, last_access_time FROM cache_entries WHERE song_id = ?",
        )
        .bind(song_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn upsert(&self, entry: &CacheEntry) -> Result<()> {
        entry.validate().map_err(|msg| LibraryError::InvalidInput {
            field: "cache_entry".to_string(),
            message: msg,
        })?;

        sqlx::query(
            r#"
            INSERT INTO cache_entries (song_id, total_bytes, last_access_time)
            VALUES (?, ?, ?)
            ON CONFLICT(song_id) DO UPDATE SET
                total_bytes = excluded.total_bytes,
                last_access_time = excluded.last_access_time
            "#,
        )
        .bind(entry.song_id)
        .bind(to_db_bytes(entry.song_id, entry.total_bytes)?)
        .bind(entry.last_access_time)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, song_id: SongId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM cache_entries WHERE song_id = ?")
            .bind(song_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn delete_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM cache_entries")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn set_total_bytes(&self, song_id: SongId, total_bytes: u64) -> Result<bool> {
        let result = sqlx::query("UPDATE cache_entries SET total_bytes = ? WHERE song_id = ?")
            .bind(to_db_bytes(song_id, total_bytes)?)
            .bind(song_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn touch(&self, song_id: SongId, access_time_ms: i64) -> Result<bool> {
        let result =
            sqlx::query("UPDATE cache_entries SET last_access_time = ? WHERE song_id = ?")
                .bind(access_time_ms)
                .bind(song_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;

    fn entry(id: i64, total: u64, access: i64) -> CacheEntry {
        CacheEntry {
            song_id: SongId(id),
            total_bytes: total,
            cached_bytes: 0,
            last_access_time: access,
        }
    }

    #[tokio::test]
    async fn test_upsert_and_find() {
        let repo = SqliteCacheEntryRepository::new(create_test_pool().await.unwrap());

        repo.upsert(&entry(1, 0, 10)).await.unwrap();
        repo.upsert(&entry(1, 500, 20)).await.unwrap();

        let found = repo.find_by_id(SongId(1)).await.unwrap().unwrap();
        assert_eq!(found.total_bytes, 500);
        assert_eq!(found.last_access_time, 20);
        assert_eq!(repo.load_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upsert_rejects_inconsistent_entry() {
        let repo = SqliteCacheEntryRepository::new(create_test_pool().await.unwrap());
        let mut bad = entry(2, 10, 0);
        bad.cached_bytes = 11;

        let err = repo.upsert(&bad).await.unwrap_err();
        assert!(matches!(err, LibraryError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_set_total_bytes_and_touch() {
        let repo = SqliteCacheEntryRepository::new(create_test_pool().await.unwrap());
        repo.upsert(&entry(3, 0, 1)).await.unwrap();

        assert!(repo.set_total_bytes(SongId(3), 4096).await.unwrap());
        assert!(repo.touch(SongId(3), 99).await.unwrap());
        assert!(!repo.touch(SongId(404), 99).await.unwrap());

        let found = repo.find_by_id(SongId(3)).await.unwrap().unwrap();
        assert_eq!(found.total_bytes, 4096);
        assert_eq!(found.last_access_time, 99);
    }

    #[tokio::test]
    async fn test_delete() {
        let repo = SqliteCacheEntryRepository::new(create_test_pool().await.unwrap());
        repo.upsert(&entry(4, 0, 1)).await.unwrap();

        assert!(repo.delete(SongId(4)).await.unwrap());
        assert!(!repo.delete(SongId(4)).await.unwrap());
        assert!(repo.find_by_id(SongId(4)).await.unwrap().is_none());
    }
}
