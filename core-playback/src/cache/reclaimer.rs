//! Space reclamation
//!
//! Evicts least-recently-used entries until a pending write fits under the
//! cache budget.

use super::entry_store::EntryStore;
use core_library::{CacheEntry, SongId};
use core_runtime::{CacheEvent, EventBus};
use std::io::ErrorKind;
use tracing::{debug, info, warn};

pub struct SpaceReclaimer {
    events: EventBus,
}

impl SpaceReclaimer {
    pub fn new(events: EventBus) -> Self {
        Self { events }
    }

    /// Bytes still free under `budget_bytes`.
    pub fn available(store: &EntryStore, budget_bytes: u64) -> u64 {
        budget_bytes.saturating_sub(store.total_cached_bytes())
    }

    /// Free space until `needed_bytes` fit under `budget_bytes`.
    ///
    /// Entries are visited oldest access first; those for which
    /// `is_protected` returns `true` are skipped. Equal access times are
    /// visited in no particular order.
    ///
    /// # Returns
    /// - `true` if `needed_bytes` are now available
    /// - `false` if eviction ran out of candidates
    pub async fn reclaim<F>(
        &self,
        store: &mut EntryStore,
        budget_bytes: u64,
        needed_bytes: u64,
        is_protected: F,
    ) -> bool
    where
        F: Fn(SongId) -> bool,
    {
        let mut available = Self::available(store, budget_bytes);
        if available >= needed_bytes {
            return true;
        }

        info!(
            "Reclaiming space: {} bytes needed, {} available",
            needed_bytes, available
        );

        let mut candidates: Vec<CacheEntry> = store
            .entries()
            .filter(|e| !is_protected(e.song_id))
            .copied()
            .collect();
        candidates.sort_by_key(|e| e.last_access_time);

        for candidate in candidates {
            if available >= needed_bytes {
                break;
            }

            if let Some(freed) = self.evict(store, candidate.song_id).await {
                available = available.saturating_add(freed);
            }
        }

        let reached = available >= needed_bytes;
        if !reached {
            warn!(
                "Eviction exhausted: {} bytes needed, only {} available",
                needed_bytes, available
            );
        }
        reached
    }

    /// Delete one entry and its file regardless of protection.
    ///
    /// Returns the bytes freed, or `None` if the entry is unknown or its file
    /// could not be deleted.
    pub async fn evict(&self, store: &mut EntryStore, song_id: SongId) -> Option<u64> {
        let entry = store.get(song_id)?;
        let path = entry.local_path(store.cache_dir());

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                warn!(song_id = %song_id, error = %e, "Failed to delete cached file");
                return None;
            }
        }

        store.remove(song_id);
        debug!(song_id = %song_id, freed = entry.cached_bytes, "Evicted cache entry");

        let _ = self.events.emit(CacheEvent::Evicted {
            song_id: song_id.as_i64(),
            freed_bytes: entry.cached_bytes,
        });

        Some(entry.cached_bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::db::create_test_pool;
    use core_library::{CacheEntryRepository, SqliteCacheEntryRepository};
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::Arc;

    async fn seeded_store(dir: &Path, entries: &[(i64, u64, i64)]) -> EntryStore {
        let repo: Arc<dyn CacheEntryRepository> = Arc::new(SqliteCacheEntryRepository::new(
            create_test_pool().await.unwrap(),
        ));
        for &(id, size, access) in entries {
            let entry = CacheEntry {
                song_id: SongId(id),
                total_bytes: size,
                cached_bytes: size,
                last_access_time: access,
            };
            repo.upsert(&entry).await.unwrap();
            std::fs::write(dir.join(SongId(id).file_name()), vec![1u8; size as usize]).unwrap();
        }
        EntryStore::open(repo, dir).await.unwrap()
    }

    #[tokio::test]
    async fn test_noop_when_space_available() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = seeded_store(dir.path(), &[(1, 4, 1)]).await;
        let reclaimer = SpaceReclaimer::new(EventBus::new(16));

        assert!(reclaimer.reclaim(&mut store, 10, 6, |_| false).await);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_evicts_least_recently_used_first() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = seeded_store(dir.path(), &[(1, 4, 1), (2, 3, 2), (3, 3, 3)]).await;
        let bus = EventBus::new(16);
        let mut events = bus.subscribe();
        let reclaimer = SpaceReclaimer::new(bus);

        assert!(reclaimer.reclaim(&mut store, 10, 5, |_| false).await);

        assert!(!store.contains(SongId(1)));
        assert!(!store.contains(SongId(2)));
        assert!(store.contains(SongId(3)));
        assert!(!dir.path().join("1.mp3").exists());
        assert!(dir.path().join("3.mp3").exists());

        let first = events.try_recv().unwrap();
        assert_eq!(
            first,
            CacheEvent::Evicted {
                song_id: 1,
                freed_bytes: 4
            }
        );
    }

    #[tokio::test]
    async fn test_protected_entries_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = seeded_store(dir.path(), &[(1, 4, 1), (2, 3, 2), (3, 3, 3)]).await;
        let reclaimer = SpaceReclaimer::new(EventBus::new(16));
        let protected: HashSet<SongId> = [SongId(1)].into_iter().collect();

        assert!(
            reclaimer
                .reclaim(&mut store, 10, 5, |id| protected.contains(&id))
                .await
        );
        assert!(store.contains(SongId(1)));
        assert!(!store.contains(SongId(2)));
        assert!(!store.contains(SongId(3)));
    }

    #[tokio::test]
    async fn test_fails_when_only_protected_entries_remain() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = seeded_store(dir.path(), &[(1, 6, 1), (2, 3, 2)]).await;
        let reclaimer = SpaceReclaimer::new(EventBus::new(16));

        assert!(
            !reclaimer
                .reclaim(&mut store, 10, 5, |id| id == SongId(1))
                .await
        );
        assert!(store.contains(SongId(1)));
    }

    #[tokio::test]
    async fn test_evict_missing_file_still_removes_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = seeded_store(dir.path(), &[(1, 4, 1)]).await;
        std::fs::remove_file(dir.path().join("1.mp3")).unwrap();
        let reclaimer = SpaceReclaimer::new(EventBus::new(16));

        // Measured at open, so the entry still reports its size.
        assert_eq!(reclaimer.evict(&mut store, SongId(1)).await, Some(4));
        assert!(store.is_empty());
        assert_eq!(reclaimer.evict(&mut store, SongId(1)).await, None);
    }
}
