//! # Cache Manager
//!
//! Public handle and worker of the song cache.
//!
//! A single worker task owns the entry store, the in-flight map and the
//! pinned set. [`CacheManager`] handles are cheap clones that enqueue
//! commands and await the worker's reply, so no cache state is ever shared
//! behind a lock. Download tasks run on their own and report back to the
//! worker over a separate channel.
//!
//! Every dispatch carries a generation number. Once a download is aborted its
//! generation is retired and anything the task still reports is dropped, so
//! listeners never see progress or completion after an abort.

use super::config::{CacheConfig, ReadinessPolicy};
use super::download_task::{DownloadTask, TaskEvent, TaskMessage, TaskOutcome};
use super::entry_store::EntryStore;
use super::readiness;
use super::reclaimer::SpaceReclaimer;
use super::stats::{format_bytes, CacheStats};
use crate::error::{PlaybackError, Result};
use bridge_traits::{Clock, Downloader};
use core_library::{CacheEntry, CacheEntryRepository, Song, SongId};
use core_runtime::logging::strip_path;
use core_runtime::{CacheEvent, CacheSettings, EventBus, EventStream};
use futures::future::join_all;
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Initial load state of the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
enum LoadState {
    Loading,
    Ready,
    Failed(String),
}

enum CacheCommand {
    Download {
        song: Song,
        reply: oneshot::Sender<Result<Option<CacheEntry>>>,
    },
    Abort {
        song_id: SongId,
        reply: oneshot::Sender<bool>,
    },
    Pin {
        song_id: SongId,
        reply: oneshot::Sender<()>,
    },
    ClearPinned {
        reply: oneshot::Sender<()>,
    },
    ReplacePinned {
        song_ids: Vec<SongId>,
        reply: oneshot::Sender<()>,
    },
    GetEntry {
        song_id: SongId,
        reply: oneshot::Sender<Option<CacheEntry>>,
    },
    FullyCached {
        reply: oneshot::Sender<Vec<CacheEntry>>,
    },
    TotalCachedBytes {
        reply: oneshot::Sender<u64>,
    },
    MarkAccessed {
        song_id: SongId,
        reply: oneshot::Sender<Option<CacheEntry>>,
    },
    IsInFlight {
        song_id: SongId,
        reply: oneshot::Sender<bool>,
    },
    InFlight {
        reply: oneshot::Sender<Vec<SongId>>,
    },
    Stats {
        reply: oneshot::Sender<CacheStats>,
    },
    Clear {
        reply: oneshot::Sender<usize>,
    },
    Quit {
        reply: oneshot::Sender<()>,
    },
}

/// Collaborators the cache worker needs.
pub struct CacheDependencies {
    pub repository: Arc<dyn CacheEntryRepository>,
    pub downloader: Arc<dyn Downloader>,
    pub clock: Arc<dyn Clock>,
    pub settings: watch::Receiver<CacheSettings>,
    pub events: EventBus,
}

// ============================================================================
// Handle
// ============================================================================

/// Handle to the song cache.
///
/// # Example
///
/// ```rust,ignore
/// let cache = CacheManager::spawn(CacheConfig::new(dir), deps)?;
/// cache.wait_until_loaded().await?;
///
/// let mut events = cache.subscribe();
/// if let Some(entry) = cache.download_song(song).await? {
///     println!("Downloading song {}", entry.song_id);
/// }
/// ```
#[derive(Clone)]
pub struct CacheManager {
    commands: mpsc::Sender<CacheCommand>,
    events: EventBus,
    loaded: watch::Receiver<LoadState>,
    load_cancel: CancellationToken,
    cache_dir: PathBuf,
    readiness: ReadinessPolicy,
}

impl CacheManager {
    /// Validate `config`, create the cache directory and start the worker.
    ///
    /// Returns immediately; the entry store loads in the background. Use
    /// [`CacheManager::wait_until_loaded`] to block until it is ready.
    pub fn spawn(config: CacheConfig, deps: CacheDependencies) -> Result<Self> {
        config.validate().map_err(PlaybackError::InvalidConfig)?;
        std::fs::create_dir_all(&config.cache_dir)?;

        let (commands, command_rx) = mpsc::channel(config.command_capacity);
        let (loaded_tx, loaded) = watch::channel(LoadState::Loading);
        let load_cancel = CancellationToken::new();

        let handle = Self {
            commands,
            events: deps.events.clone(),
            loaded,
            load_cancel: load_cancel.clone(),
            cache_dir: config.cache_dir.clone(),
            readiness: config.readiness,
        };

        info!(
            "Starting song cache at {:?}",
            strip_path(&config.cache_dir.to_string_lossy())
        );
        tokio::spawn(run_worker(
            Arc::new(config),
            deps,
            command_rx,
            loaded_tx,
            load_cancel,
        ));

        Ok(handle)
    }

    /// Wait until the entry store finished its initial load.
    pub async fn wait_until_loaded(&self) -> Result<()> {
        let mut loaded = self.loaded.clone();
        let state = loaded
            .wait_for(|state| *state != LoadState::Loading)
            .await
            .map_err(|_| PlaybackError::WorkerStopped)?
            .clone();

        match state {
            LoadState::Failed(reason) => Err(PlaybackError::CacheError(reason)),
            _ => Ok(()),
        }
    }

    /// Subscribe to cache events.
    pub fn subscribe(&self) -> EventStream {
        self.events.stream()
    }

    /// Start downloading `song`.
    ///
    /// Returns `None` if a download for the song is already in flight.
    #[instrument(skip(self, song), fields(song_id = %song.id))]
    pub async fn download_song(&self, song: Song) -> Result<Option<CacheEntry>> {
        self.request(|reply| CacheCommand::Download { song, reply })
            .await?
    }

    /// Stop the song's download. Returns `false` if none was in flight.
    #[instrument(skip(self))]
    pub async fn abort_download(&self, song_id: SongId) -> Result<bool> {
        self.request(|reply| CacheCommand::Abort { song_id, reply })
            .await
    }

    pub async fn pin_song_id(&self, song_id: SongId) -> Result<()> {
        self.request(|reply| CacheCommand::Pin { song_id, reply })
            .await
    }

    pub async fn clear_pinned_song_ids(&self) -> Result<()> {
        self.request(|reply| CacheCommand::ClearPinned { reply })
            .await
    }

    /// Replace all pins at once, e.g. the current song plus lookahead after
    /// the playlist position changed.
    pub async fn replace_pinned_song_ids(&self, song_ids: Vec<SongId>) -> Result<()> {
        self.request(|reply| CacheCommand::ReplacePinned { song_ids, reply })
            .await
    }

    pub async fn get_entry(&self, song_id: SongId) -> Result<Option<CacheEntry>> {
        self.request(|reply| CacheCommand::GetEntry { song_id, reply })
            .await
    }

    pub async fn all_fully_cached_entries(&self) -> Result<Vec<CacheEntry>> {
        self.request(|reply| CacheCommand::FullyCached { reply })
            .await
    }

    pub async fn total_cached_bytes(&self) -> Result<u64> {
        self.request(|reply| CacheCommand::TotalCachedBytes { reply })
            .await
    }

    /// Record a playback read, refreshing the entry's access time.
    pub async fn mark_accessed(&self, song_id: SongId) -> Result<Option<CacheEntry>> {
        self.request(|reply| CacheCommand::MarkAccessed { song_id, reply })
            .await
    }

    pub async fn is_in_flight(&self, song_id: SongId) -> Result<bool> {
        self.request(|reply| CacheCommand::IsInFlight { song_id, reply })
            .await
    }

    pub async fn in_flight_song_ids(&self) -> Result<Vec<SongId>> {
        self.request(|reply| CacheCommand::InFlight { reply })
            .await
    }

    pub async fn stats(&self) -> Result<CacheStats> {
        self.request(|reply| CacheCommand::Stats { reply }).await
    }

    /// Remove every entry and file, aborting all downloads and pins.
    ///
    /// Returns the number of entries removed.
    #[instrument(skip(self))]
    pub async fn clear(&self) -> Result<usize> {
        self.request(|reply| CacheCommand::Clear { reply }).await
    }

    /// Stop the worker after draining downloads and pending writes.
    ///
    /// Safe to call while the initial load is still running, and more than
    /// once.
    #[instrument(skip(self))]
    pub async fn quit(&self) {
        self.load_cancel.cancel();
        let (reply, done) = oneshot::channel();
        if self.commands.send(CacheCommand::Quit { reply }).await.is_ok() {
            let _ = done.await;
        }
    }

    /// Path of the song's cached file.
    pub fn local_path(&self, song_id: SongId) -> PathBuf {
        self.cache_dir.join(song_id.file_name())
    }

    /// Whether playback of `entry` can start while it is downloading.
    pub fn can_start_playback(
        &self,
        entry: &CacheEntry,
        downloaded_bytes: u64,
        elapsed_ms: u64,
        duration_sec: u32,
    ) -> bool {
        readiness::can_start_playback(
            &self.readiness,
            entry,
            downloaded_bytes,
            elapsed_ms,
            duration_sec,
        )
    }

    async fn request<T, F>(&self, make: F) -> Result<T>
    where
        F: FnOnce(oneshot::Sender<T>) -> CacheCommand,
    {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(make(reply))
            .await
            .map_err(|_| PlaybackError::WorkerStopped)?;
        response.await.map_err(|_| PlaybackError::WorkerStopped)
    }
}

impl std::fmt::Debug for CacheManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheManager")
            .field("cache_dir", &self.cache_dir)
            .field("loaded", &*self.loaded.borrow())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Worker
// ============================================================================

struct InFlight {
    generation: u64,
    cancel: CancellationToken,
    done: oneshot::Receiver<()>,
}

/// Aborted task that may still hold the song's file.
struct Draining {
    generation: u64,
    done: oneshot::Receiver<()>,
}

struct CacheWorker {
    config: Arc<CacheConfig>,
    store: EntryStore,
    reclaimer: SpaceReclaimer,
    downloader: Arc<dyn Downloader>,
    clock: Arc<dyn Clock>,
    settings: watch::Receiver<CacheSettings>,
    events: EventBus,
    permits: Arc<Semaphore>,
    task_tx: mpsc::UnboundedSender<TaskMessage>,
    in_flight: HashMap<SongId, InFlight>,
    draining: HashMap<SongId, Draining>,
    pinned: HashSet<SongId>,
    next_generation: u64,
}

async fn run_worker(
    config: Arc<CacheConfig>,
    deps: CacheDependencies,
    mut commands: mpsc::Receiver<CacheCommand>,
    loaded: watch::Sender<LoadState>,
    load_cancel: CancellationToken,
) {
    let opened = tokio::select! {
        _ = load_cancel.cancelled() => {
            info!("Song cache stopped before the entry store loaded");
            return;
        }
        opened = EntryStore::open(deps.repository.clone(), &config.cache_dir) => opened,
    };

    let store = match opened {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to load cache entries: {}", e);
            loaded.send_replace(LoadState::Failed(e.to_string()));
            return;
        }
    };

    let (task_tx, mut task_rx) = mpsc::unbounded_channel();
    let mut worker = CacheWorker {
        permits: Arc::new(Semaphore::new(config.max_concurrent_downloads)),
        reclaimer: SpaceReclaimer::new(deps.events.clone()),
        store,
        config,
        downloader: deps.downloader,
        clock: deps.clock,
        settings: deps.settings,
        events: deps.events,
        task_tx,
        in_flight: HashMap::new(),
        draining: HashMap::new(),
        pinned: HashSet::new(),
        next_generation: 0,
    };
    loaded.send_replace(LoadState::Ready);

    loop {
        let command = tokio::select! {
            command = commands.recv() => command,
            Some(message) = task_rx.recv() => {
                worker.handle_task_message(message).await;
                continue;
            }
        };

        match command {
            Some(CacheCommand::Quit { reply }) => {
                worker.shutdown().await;
                let _ = reply.send(());
                break;
            }
            Some(command) => worker.handle_command(command).await,
            // Every handle is gone.
            None => {
                worker.shutdown().await;
                break;
            }
        }
    }

    info!("Song cache stopped");
}

impl CacheWorker {
    async fn handle_command(&mut self, command: CacheCommand) {
        match command {
            CacheCommand::Download { song, reply } => {
                let _ = reply.send(self.download_song(song));
            }
            CacheCommand::Abort { song_id, reply } => {
                let _ = reply.send(self.abort_download(song_id));
            }
            CacheCommand::Pin { song_id, reply } => {
                self.pinned.insert(song_id);
                let _ = reply.send(());
            }
            CacheCommand::ClearPinned { reply } => {
                self.pinned.clear();
                let _ = reply.send(());
            }
            CacheCommand::ReplacePinned { song_ids, reply } => {
                self.pinned.clear();
                self.pinned.extend(song_ids);
                debug!(pinned = self.pinned.len(), "Replaced pinned songs");
                let _ = reply.send(());
            }
            CacheCommand::GetEntry { song_id, reply } => {
                let _ = reply.send(self.store.get(song_id));
            }
            CacheCommand::FullyCached { reply } => {
                let entries = self
                    .store
                    .entries()
                    .filter(|e| e.is_fully_cached())
                    .copied()
                    .collect();
                let _ = reply.send(entries);
            }
            CacheCommand::TotalCachedBytes { reply } => {
                let _ = reply.send(self.store.total_cached_bytes());
            }
            CacheCommand::MarkAccessed { song_id, reply } => {
                let now = self.clock.unix_timestamp_millis();
                let _ = reply.send(self.store.touch(song_id, now));
            }
            CacheCommand::IsInFlight { song_id, reply } => {
                let _ = reply.send(self.in_flight.contains_key(&song_id));
            }
            CacheCommand::InFlight { reply } => {
                let _ = reply.send(self.in_flight.keys().copied().collect());
            }
            CacheCommand::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            CacheCommand::Clear { reply } => {
                let removed = self.clear().await;
                let _ = reply.send(removed);
            }
            // Intercepted by the worker loop.
            CacheCommand::Quit { .. } => {}
        }
    }

    fn download_song(&mut self, song: Song) -> Result<Option<CacheEntry>> {
        song.validate().map_err(PlaybackError::CacheError)?;

        if self.in_flight.contains_key(&song.id) {
            debug!(song_id = %song.id, "Download already in flight");
            return Ok(None);
        }

        let now = self.clock.unix_timestamp_millis();
        let entry = match self.store.touch(song.id, now) {
            Some(entry) => entry,
            None => {
                let entry = CacheEntry::new(song.id, now);
                self.store.upsert(entry);
                entry
            }
        };

        self.next_generation += 1;
        let generation = self.next_generation;
        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = oneshot::channel();
        let predecessor = self.draining.remove(&song.id).map(|d| d.done);

        let song_id = song.id;
        let task = DownloadTask {
            path: entry.local_path(self.store.cache_dir()),
            known_total: entry.total_bytes,
            song,
            generation,
            downloader: self.downloader.clone(),
            settings: self.settings.clone(),
            config: self.config.clone(),
            permits: self.permits.clone(),
            cancel: cancel.clone(),
            messages: self.task_tx.clone(),
            predecessor,
            _done: done_tx,
        };
        tokio::spawn(task.run());

        self.in_flight.insert(
            song_id,
            InFlight {
                generation,
                cancel,
                done: done_rx,
            },
        );
        info!(
            "Downloading song {} ({} of {} bytes cached)",
            song_id, entry.cached_bytes, entry.total_bytes
        );

        Ok(Some(entry))
    }

    fn abort_download(&mut self, song_id: SongId) -> bool {
        let Some(flight) = self.in_flight.remove(&song_id) else {
            warn!("Abort requested for song {} with no download in flight", song_id);
            return false;
        };

        flight.cancel.cancel();
        self.draining.insert(
            song_id,
            Draining {
                generation: flight.generation,
                done: flight.done,
            },
        );
        info!("Aborted download of song {}", song_id);
        true
    }

    async fn handle_task_message(&mut self, message: TaskMessage) {
        let TaskMessage {
            song_id,
            generation,
            kind,
        } = message;

        let current = self
            .in_flight
            .get(&song_id)
            .is_some_and(|flight| flight.generation == generation);

        if !current {
            if let TaskEvent::Finished(_) = kind {
                if self
                    .draining
                    .get(&song_id)
                    .is_some_and(|d| d.generation == generation)
                {
                    self.draining.remove(&song_id);
                }
            }
            // Stale dispatch; a dropped reclaim reply tells the task to stop.
            return;
        }

        match kind {
            TaskEvent::Accepted {
                total_bytes,
                offset,
            } => {
                self.store.set_total_bytes(song_id, total_bytes);
                self.store.set_cached_bytes(song_id, offset);
            }
            TaskEvent::Truncated => {
                self.store.set_cached_bytes(song_id, 0);
            }
            TaskEvent::Progress {
                cached_bytes,
                bytes_written,
                elapsed_ms,
                report,
            } => {
                let Some(entry) = self.store.set_cached_bytes(song_id, cached_bytes) else {
                    return;
                };
                if report {
                    self.emit(CacheEvent::Progress {
                        song_id: song_id.as_i64(),
                        cached_bytes: entry.cached_bytes,
                        total_bytes: entry.total_bytes,
                        bytes_written,
                        elapsed_ms,
                    });
                }
            }
            TaskEvent::Reclaim {
                needed_bytes,
                reply,
            } => {
                let granted = self.reclaim(needed_bytes).await;
                let _ = reply.send(granted);
            }
            TaskEvent::Failed { reason, retry_in } => {
                self.emit(CacheEvent::Failed {
                    song_id: song_id.as_i64(),
                    reason,
                    retry_in_ms: retry_in.as_millis() as u64,
                });
            }
            TaskEvent::Finished(outcome) => {
                self.in_flight.remove(&song_id);
                self.finish(song_id, outcome);
            }
        }
    }

    fn finish(&mut self, song_id: SongId, outcome: TaskOutcome) {
        match outcome {
            TaskOutcome::Completed { total_bytes } => {
                self.store.set_total_bytes(song_id, total_bytes);
                self.store.set_cached_bytes(song_id, total_bytes);
                info!(
                    "Song {} fully cached ({})",
                    song_id,
                    format_bytes(total_bytes)
                );
                self.emit(CacheEvent::Completed {
                    song_id: song_id.as_i64(),
                    total_bytes,
                });
            }
            TaskOutcome::Fatal(reason) => {
                error!("Download of song {} failed: {}", song_id, reason);
                self.emit(CacheEvent::Fatal {
                    song_id: song_id.as_i64(),
                    reason,
                });
            }
            TaskOutcome::Aborted => {
                debug!(song_id = %song_id, "Download ended without result");
            }
        }
    }

    async fn reclaim(&mut self, needed_bytes: u64) -> bool {
        let budget_bytes = self.settings.borrow().max_cache_bytes;
        let in_flight = &self.in_flight;
        let draining = &self.draining;
        let pinned = &self.pinned;

        self.reclaimer
            .reclaim(&mut self.store, budget_bytes, needed_bytes, |id| {
                in_flight.contains_key(&id) || draining.contains_key(&id) || pinned.contains(&id)
            })
            .await
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.store.len(),
            fully_cached: self.store.entries().filter(|e| e.is_fully_cached()).count(),
            in_flight: self.in_flight.len(),
            pinned: self.pinned.len(),
            cached_bytes: self.store.total_cached_bytes(),
            budget_bytes: self.settings.borrow().max_cache_bytes,
        }
    }

    /// Cancel every download and wait, bounded, for the tasks to end.
    async fn abort_all(&mut self) {
        let song_ids: Vec<SongId> = self.in_flight.keys().copied().collect();
        for song_id in song_ids {
            self.abort_download(song_id);
        }

        if self.draining.is_empty() {
            return;
        }

        let waiting: Vec<_> = self.draining.drain().map(|(_, d)| d.done).collect();
        let count = waiting.len();
        if tokio::time::timeout(self.config.drain_timeout, join_all(waiting))
            .await
            .is_err()
        {
            warn!(
                "{} aborted downloads did not finish within {:?}",
                count, self.config.drain_timeout
            );
        }
    }

    async fn clear(&mut self) -> usize {
        info!("Clearing song cache");
        self.abort_all().await;
        self.pinned.clear();

        let song_ids: Vec<SongId> = self.store.entries().map(|e| e.song_id).collect();
        let removed = song_ids.len();
        for song_id in song_ids {
            self.reclaimer.evict(&mut self.store, song_id).await;
        }
        // Entries whose file could not be deleted are dropped anyway.
        let undeleted = self.store.clear();
        if !undeleted.is_empty() {
            warn!("{} cache entries dropped with their files left on disk", undeleted.len());
        }

        let strays = remove_stray_files(self.store.cache_dir()).await;
        info!("Cleared {} entries and {} stray files", removed, strays);
        removed
    }

    async fn shutdown(mut self) {
        info!("Stopping song cache");
        self.abort_all().await;
        self.store.close().await;
    }

    fn emit(&self, event: CacheEvent) {
        // No subscribers is fine.
        let _ = self.events.emit(event);
    }
}

/// Delete song files in `cache_dir` that no entry tracks.
///
/// Only names of the form `{song_id}.mp3` are considered, so unrelated files
/// sharing the directory are left alone.
async fn remove_stray_files(cache_dir: &Path) -> usize {
    let mut dir = match tokio::fs::read_dir(cache_dir).await {
        Ok(dir) => dir,
        Err(e) => {
            warn!(error = %e, "Failed to list cache directory");
            return 0;
        }
    };

    let mut removed = 0;
    loop {
        let item = match dir.next_entry().await {
            Ok(Some(item)) => item,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "Failed to list cache directory");
                break;
            }
        };

        let name = item.file_name();
        let Some(song_id) = name.to_str().and_then(SongId::from_file_name) else {
            continue;
        };

        match tokio::fs::remove_file(item.path()).await {
            Ok(()) => {
                debug!(song_id = %song_id, "Removed stray file");
                removed += 1;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!(song_id = %song_id, error = %e, "Failed to remove stray file"),
        }
    }
    removed
}
