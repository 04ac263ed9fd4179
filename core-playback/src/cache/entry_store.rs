//! Entry store
//!
//! In-memory mirror of the `cache_entries` table, owned by the cache worker.
//! Reads are served from the mirror. Every mutation is applied to the mirror
//! immediately and queued for a single background writer, so persisted
//! changes land in submission order and never race each other.
//!
//! Persistence failures are logged and otherwise ignored; the mirror stays
//! authoritative for the running process.

use core_library::{CacheEntry, CacheEntryRepository, SongId};
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;

/// Change queued for the background writer.
#[derive(Debug)]
enum StoreOp {
    Upsert(CacheEntry),
    Remove(SongId),
    SetTotalBytes(SongId, u64),
    Touch(SongId, i64),
    Clear,
}

pub struct EntryStore {
    cache_dir: PathBuf,
    entries: HashMap<SongId, CacheEntry>,
    ops: mpsc::UnboundedSender<StoreOp>,
    writer: JoinHandle<()>,
}

impl EntryStore {
    /// Load every persisted row and start the background writer.
    ///
    /// Bytes on disk are measured from each song's file; a missing file
    /// counts as zero bytes.
    #[instrument(skip(repository))]
    pub async fn open(
        repository: Arc<dyn CacheEntryRepository>,
        cache_dir: &Path,
    ) -> Result<Self> {
        let records = repository.load_all().await?;
        let mut entries = HashMap::with_capacity(records.len());

        for record in records {
            let path = cache_dir.join(record.song_id.file_name());
            let on_disk = file_len(&path).await?;
            entries.insert(record.song_id, record.into_entry(on_disk));
        }

        info!(entries = entries.len(), "Loaded cache entries");

        let (ops, rx) = mpsc::unbounded_channel();
        let writer = tokio::spawn(run_writer(repository, rx));

        Ok(Self {
            cache_dir: cache_dir.to_path_buf(),
            entries,
            ops,
            writer,
        })
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn get(&self, song_id: SongId) -> Option<CacheEntry> {
        self.entries.get(&song_id).copied()
    }

    pub fn contains(&self, song_id: SongId) -> bool {
        self.entries.contains_key(&song_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Copy of the mirror.
    pub fn snapshot(&self) -> HashMap<SongId, CacheEntry> {
        self.entries.clone()
    }

    pub fn entries(&self) -> impl Iterator<Item = &CacheEntry> {
        self.entries.values()
    }

    pub fn total_cached_bytes(&self) -> u64 {
        self.entries.values().map(|e| e.cached_bytes).sum()
    }

    pub fn upsert(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.song_id, entry);
        self.submit(StoreOp::Upsert(entry));
    }

    pub fn remove(&mut self, song_id: SongId) -> Option<CacheEntry> {
        let removed = self.entries.remove(&song_id);
        if removed.is_some() {
            self.submit(StoreOp::Remove(song_id));
        }
        removed
    }

    /// Record the authoritative size. Bytes on disk are clamped to it.
    pub fn set_total_bytes(&mut self, song_id: SongId, total_bytes: u64) -> Option<CacheEntry> {
        let entry = self.entries.get_mut(&song_id)?;
        if entry.total_bytes == total_bytes {
            return Some(*entry);
        }
        entry.total_bytes = total_bytes;
        entry.cached_bytes = entry.cached_bytes.min(total_bytes);
        let updated = *entry;
        self.submit(StoreOp::SetTotalBytes(song_id, total_bytes));
        Some(updated)
    }

    /// Update the byte count on disk. Mirror only; the file is the durable copy.
    pub fn set_cached_bytes(&mut self, song_id: SongId, cached_bytes: u64) -> Option<CacheEntry> {
        let entry = self.entries.get_mut(&song_id)?;
        entry.cached_bytes = if entry.total_bytes > 0 {
            cached_bytes.min(entry.total_bytes)
        } else {
            cached_bytes
        };
        Some(*entry)
    }

    pub fn touch(&mut self, song_id: SongId, now_ms: i64) -> Option<CacheEntry> {
        let entry = self.entries.get_mut(&song_id)?;
        entry.last_access_time = now_ms;
        let updated = *entry;
        self.submit(StoreOp::Touch(song_id, now_ms));
        Some(updated)
    }

    /// Remove every entry, returning what was removed.
    pub fn clear(&mut self) -> Vec<CacheEntry> {
        let removed: Vec<CacheEntry> = self.entries.drain().map(|(_, e)| e).collect();
        self.submit(StoreOp::Clear);
        removed
    }

    /// Stop accepting changes and wait until queued ones are written.
    pub async fn close(self) {
        drop(self.ops);
        if let Err(e) = self.writer.await {
            warn!(error = %e, "Cache entry writer ended abnormally");
        }
    }

    fn submit(&self, op: StoreOp) {
        if self.ops.send(op).is_err() {
            warn!("Cache entry writer is gone; change kept in memory only");
        }
    }
}

async fn run_writer(
    repository: Arc<dyn CacheEntryRepository>,
    mut rx: mpsc::UnboundedReceiver<StoreOp>,
) {
    while let Some(op) = rx.recv().await {
        let result = match &op {
            StoreOp::Upsert(entry) => repository.upsert(entry).await,
            StoreOp::Remove(id) => repository.delete(*id).await.map(|_| ()),
            StoreOp::SetTotalBytes(id, total) => {
                repository.set_total_bytes(*id, *total).await.map(|_| ())
            }
            StoreOp::Touch(id, at) => repository.touch(*id, *at).await.map(|_| ()),
            StoreOp::Clear => repository.delete_all().await.map(|_| ()),
        };

        if let Err(e) = result {
            warn!(error = %e, op = ?op, "Failed to persist cache entry change");
        }
    }

    debug!("Cache entry writer drained");
}

/// Size of the file at `path`, 0 if it does not exist.
pub(crate) async fn file_len(path: &Path) -> std::io::Result<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(0),
        Err(e) => Err(e),
    }
}
