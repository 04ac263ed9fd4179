//! # Download Task
//!
//! One task per in-flight song. The task streams the song's content URL into
//! `{cache_dir}/{song_id}.mp3` and reports to the cache worker over a
//! message channel; it never touches the entry store itself.
//!
//! ## Attempt lifecycle
//!
//! ```text
//! START ──> REQUESTING ──> WRITING ──> SUCCESS
//!   │           │             │
//!   │           ├──> FATAL <──┤
//!   │           │             │
//!   │           └──> RETRY <──┘ ── backoff ──> REQUESTING
//!   │
//!   └──> SUCCESS (file already complete)
//! ```
//!
//! Cancellation is cooperative: the token is checked before each request,
//! at every chunk boundary and around every sleep. An aborted task ends
//! silently.
//!
//! Retries are unbounded. The backoff starts at zero, jumps to the initial
//! delay on the first failure and doubles up to the maximum; an attempt that
//! wrote at least one byte resets it.

use super::config::CacheConfig;
use super::entry_store::file_len;
use super::progress::ProgressReporter;
use bridge_traits::{ByteStream, Downloader, HttpRequest, StreamingResponse};
use bytes::BytesMut;
use core_library::{Song, SongId};
use core_runtime::logging::redact_url;
use core_runtime::CacheSettings;
use futures::StreamExt;
use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace, warn};

// ============================================================================
// Worker Messages
// ============================================================================

/// Report from a download task, tagged with the dispatch it belongs to.
#[derive(Debug)]
pub(crate) struct TaskMessage {
    pub song_id: SongId,
    pub generation: u64,
    pub kind: TaskEvent,
}

#[derive(Debug)]
pub(crate) enum TaskEvent {
    /// A response was accepted; writing resumes at `offset`.
    Accepted { total_bytes: u64, offset: u64 },
    /// The local file was truncated to zero.
    Truncated,
    /// A chunk reached the file.
    Progress {
        cached_bytes: u64,
        bytes_written: u64,
        elapsed_ms: u64,
        /// Whether listeners should hear about it
        report: bool,
    },
    /// Ask for `needed_bytes` of budget before writing.
    Reclaim {
        needed_bytes: u64,
        reply: oneshot::Sender<bool>,
    },
    /// An attempt failed and will be retried after `retry_in`.
    Failed { reason: String, retry_in: Duration },
    Finished(TaskOutcome),
}

/// Terminal state of a download task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum TaskOutcome {
    Completed { total_bytes: u64 },
    Fatal(String),
    Aborted,
}

/// Result of a single request/write attempt.
#[derive(Debug, PartialEq, Eq)]
enum Attempt {
    Success(u64),
    Retry { reason: String, progressed: bool },
    Fatal(String),
    Aborted,
}

// ============================================================================
// Backoff
// ============================================================================

/// Exponential retry delay with reset on forward progress.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max,
            current: Duration::ZERO,
        }
    }

    /// Delay before the next attempt; zero until the first failure.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Record a failed attempt and return the delay before the next one.
    pub fn next_delay(&mut self, progressed: bool) -> Duration {
        if progressed {
            self.current = Duration::ZERO;
        }

        self.current = if self.current.is_zero() {
            self.initial
        } else {
            self.current.saturating_mul(2).min(self.max)
        };
        self.current
    }
}

// ============================================================================
// Response Handling
// ============================================================================

#[derive(Debug, PartialEq, Eq)]
enum ResponsePlan {
    /// Write `total_bytes - offset` bytes starting at `offset`.
    Write { total_bytes: u64, offset: u64 },
    /// The partial range cannot be trusted; restart the file.
    RangeMismatch(String),
    Fatal(String),
}

fn plan_response(
    response: &StreamingResponse,
    requested_offset: u64,
    known_total: u64,
) -> ResponsePlan {
    match response.status {
        200 => match response.content_length() {
            Some(len) if len > 0 => ResponsePlan::Write {
                total_bytes: len,
                offset: 0,
            },
            _ => ResponsePlan::Fatal("Response 200 without a valid Content-Length".to_string()),
        },
        206 => {
            let Some(range) = response.content_range() else {
                return ResponsePlan::RangeMismatch(
                    "Response 206 without a valid Content-Range".to_string(),
                );
            };

            if range.start != requested_offset {
                return ResponsePlan::RangeMismatch(format!(
                    "Range starts at {} instead of {}",
                    range.start, requested_offset
                ));
            }

            let total_bytes = match (range.total, known_total) {
                (Some(total), 0) => total,
                (Some(total), known) if total == known => total,
                (Some(total), known) => {
                    return ResponsePlan::RangeMismatch(format!(
                        "Range total {} differs from known size {}",
                        total, known
                    ))
                }
                (None, known) if known > 0 => known,
                (None, _) => {
                    return ResponsePlan::RangeMismatch("Range total is unknown".to_string())
                }
            };

            if range.start >= total_bytes {
                return ResponsePlan::RangeMismatch(format!(
                    "Range start {} is past the end of {} bytes",
                    range.start, total_bytes
                ));
            }

            if let Some(len) = response.content_length() {
                if len != total_bytes - range.start {
                    return ResponsePlan::RangeMismatch(format!(
                        "Content-Length {} does not match range {}-{}",
                        len,
                        range.start,
                        total_bytes - 1
                    ));
                }
            }

            ResponsePlan::Write {
                total_bytes,
                offset: range.start,
            }
        }
        status => ResponsePlan::Fatal(format!("Unexpected HTTP status {}", status)),
    }
}

// ============================================================================
// Task
// ============================================================================

/// Bookkeeping for the bytes of one attempt.
struct Transfer {
    started: Instant,
    cached: u64,
    written: u64,
    progress: ProgressReporter,
}

impl Transfer {
    fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

pub(crate) struct DownloadTask {
    pub song: Song,
    pub generation: u64,
    pub path: PathBuf,
    /// Authoritative size if known, 0 otherwise
    pub known_total: u64,
    pub downloader: Arc<dyn Downloader>,
    pub settings: watch::Receiver<CacheSettings>,
    pub config: Arc<CacheConfig>,
    pub permits: Arc<Semaphore>,
    pub cancel: CancellationToken,
    pub messages: mpsc::UnboundedSender<TaskMessage>,
    /// Completion signal of an aborted task for the same song
    pub predecessor: Option<oneshot::Receiver<()>>,
    /// Held only for its drop, which tells a successor the file is free
    pub _done: oneshot::Sender<()>,
}

impl DownloadTask {
    #[instrument(skip_all, fields(song_id = %self.song.id, generation = self.generation))]
    pub(crate) async fn run(mut self) {
        let outcome = self.execute().await;
        debug!(outcome = ?outcome, "Download task finished");
        self.send(TaskEvent::Finished(outcome));
    }

    async fn execute(&mut self) -> TaskOutcome {
        // Single writer per file.
        if let Some(previous) = self.predecessor.take() {
            tokio::select! {
                _ = self.cancel.cancelled() => return TaskOutcome::Aborted,
                _ = previous => {}
            }
        }

        let mut backoff = Backoff::new(self.config.initial_backoff, self.config.max_backoff);

        loop {
            let delay = backoff.current();
            if !delay.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => return TaskOutcome::Aborted,
                    _ = tokio::time::sleep(delay) => {}
                }
            }

            let permit = tokio::select! {
                _ = self.cancel.cancelled() => return TaskOutcome::Aborted,
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return TaskOutcome::Aborted,
                },
            };

            let attempt = self.attempt().await;
            drop(permit);

            match attempt {
                Attempt::Success(total_bytes) => return TaskOutcome::Completed { total_bytes },
                Attempt::Fatal(reason) => return TaskOutcome::Fatal(reason),
                Attempt::Aborted => return TaskOutcome::Aborted,
                Attempt::Retry { reason, progressed } => {
                    let retry_in = backoff.next_delay(progressed);
                    warn!(
                        "Download of song {} failed, retrying in {:?}: {}",
                        self.song.id, retry_in, reason
                    );
                    self.send(TaskEvent::Failed { reason, retry_in });
                }
            }
        }
    }

    async fn attempt(&mut self) -> Attempt {
        if self.cancel.is_cancelled() {
            return Attempt::Aborted;
        }

        // The file, not the entry, decides where to resume.
        let mut offset = match file_len(&self.path).await {
            Ok(len) => len,
            Err(e) => {
                return Attempt::Retry {
                    reason: format!("Failed to inspect local file: {}", e),
                    progressed: false,
                }
            }
        };

        if self.known_total > 0 {
            if offset == self.known_total {
                debug!(bytes = offset, "File already complete");
                return Attempt::Success(offset);
            }

            if offset > self.known_total {
                warn!(
                    "Local file for song {} has {} bytes but only {} expected, restarting",
                    self.song.id, offset, self.known_total
                );
                if let Err(reason) = self.truncate().await {
                    return Attempt::Retry {
                        reason,
                        progressed: false,
                    };
                }
                offset = 0;
            }
        }

        let mut request = HttpRequest::get(self.song.url.clone());
        if offset > 0 {
            request = request.range_from(offset);
        }
        debug!(url = %redact_url(&self.song.url), offset, "Requesting song");

        let response = tokio::select! {
            _ = self.cancel.cancelled() => return Attempt::Aborted,
            response = self.downloader.fetch(request) => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(e) if e.is_transient() => {
                return Attempt::Retry {
                    reason: e.to_string(),
                    progressed: false,
                }
            }
            Err(e) => return Attempt::Fatal(e.to_string()),
        };

        let (total_bytes, offset) = match plan_response(&response, offset, self.known_total) {
            ResponsePlan::Write {
                total_bytes,
                offset,
            } => (total_bytes, offset),
            ResponsePlan::RangeMismatch(reason) => {
                if let Err(e) = self.truncate().await {
                    warn!(song_id = %self.song.id, error = %e, "Failed to reset local file");
                }
                return Attempt::Retry {
                    reason,
                    progressed: false,
                };
            }
            ResponsePlan::Fatal(reason) => return Attempt::Fatal(reason),
        };

        debug!(
            status = response.status,
            total_bytes, offset, "Response accepted"
        );
        self.known_total = total_bytes;
        self.send(TaskEvent::Accepted {
            total_bytes,
            offset,
        });

        let needed_bytes = total_bytes - offset;
        let (reply, granted) = oneshot::channel();
        self.send(TaskEvent::Reclaim {
            needed_bytes,
            reply,
        });

        let granted = tokio::select! {
            _ = self.cancel.cancelled() => return Attempt::Aborted,
            granted = granted => granted,
        };
        match granted {
            Ok(true) => {}
            Ok(false) => {
                return Attempt::Fatal(format!(
                    "Unable to free {} bytes of cache space",
                    needed_bytes
                ))
            }
            // Worker dropped the request: this dispatch is stale.
            Err(_) => return Attempt::Aborted,
        }

        let mut file = match self.open_at(offset).await {
            Ok(file) => file,
            Err(e) => {
                return Attempt::Fatal(format!(
                    "Unable to open local file {}: {}",
                    self.song.id.file_name(),
                    e
                ))
            }
        };

        self.write_body(response.body, &mut file, total_bytes, offset)
            .await
    }

    async fn write_body(
        &mut self,
        mut body: ByteStream,
        file: &mut File,
        total_bytes: u64,
        offset: u64,
    ) -> Attempt {
        let chunk_size = self.config.chunk_size;
        let mut pending = BytesMut::with_capacity(chunk_size);
        let mut transfer = Transfer {
            started: Instant::now(),
            cached: offset,
            written: 0,
            progress: ProgressReporter::new(self.config.progress_interval),
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Attempt::Aborted,
                next = body.next() => next,
            };

            match next {
                None => break,
                Some(Ok(bytes)) => {
                    let received = transfer.cached + pending.len() as u64 + bytes.len() as u64;
                    if received > total_bytes {
                        return Attempt::Fatal(format!(
                            "Server sent more than the declared {} bytes",
                            total_bytes
                        ));
                    }

                    pending.extend_from_slice(&bytes);
                    while pending.len() >= chunk_size {
                        let chunk = pending.split_to(chunk_size);
                        if let Err(attempt) = self.write_chunk(file, &chunk, &mut transfer).await {
                            return attempt;
                        }
                    }
                }
                Some(Err(e)) => {
                    // Keep what already arrived.
                    if !pending.is_empty() {
                        let chunk = pending.split();
                        if let Err(attempt) = self.write_chunk(file, &chunk, &mut transfer).await {
                            return attempt;
                        }
                    }
                    self.report_final(&mut transfer);
                    return Attempt::Retry {
                        reason: format!("Stream interrupted: {}", e),
                        progressed: transfer.written > 0,
                    };
                }
            }
        }

        if !pending.is_empty() {
            let chunk = pending.split();
            if let Err(attempt) = self.write_chunk(file, &chunk, &mut transfer).await {
                return attempt;
            }
        }
        self.report_final(&mut transfer);

        if transfer.cached < total_bytes {
            return Attempt::Retry {
                reason: format!(
                    "Stream ended after {} of {} bytes",
                    transfer.cached, total_bytes
                ),
                progressed: transfer.written > 0,
            };
        }

        if let Err(e) = file.sync_data().await {
            return Attempt::Retry {
                reason: format!("Failed to sync local file: {}", e),
                progressed: transfer.written > 0,
            };
        }

        Attempt::Success(total_bytes)
    }

    async fn write_chunk(
        &self,
        file: &mut File,
        chunk: &[u8],
        transfer: &mut Transfer,
    ) -> Result<(), Attempt> {
        if self.cancel.is_cancelled() {
            return Err(Attempt::Aborted);
        }

        let written = async {
            file.write_all(chunk).await?;
            file.flush().await
        }
        .await;

        if let Err(e) = written {
            return Err(Attempt::Retry {
                reason: format!("Failed to write local file: {}", e),
                progressed: transfer.written > 0,
            });
        }

        transfer.cached += chunk.len() as u64;
        transfer.written += chunk.len() as u64;
        trace!(
            cached = transfer.cached,
            chunk = chunk.len(),
            "Chunk written"
        );

        let report = transfer.progress.update(transfer.written);
        self.send(TaskEvent::Progress {
            cached_bytes: transfer.cached,
            bytes_written: transfer.written,
            elapsed_ms: transfer.elapsed_ms(),
            report,
        });

        self.throttle(transfer).await
    }

    /// Sleep until the attempt's average rate is within the configured maximum.
    async fn throttle(&self, transfer: &Transfer) -> Result<(), Attempt> {
        let max_rate = self.settings.borrow().max_download_rate;
        let Some(rate) = max_rate.filter(|rate| *rate > 0) else {
            return Ok(());
        };

        let target = Duration::from_secs_f64(transfer.written as f64 / rate as f64);
        let elapsed = transfer.started.elapsed();
        if target > elapsed {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(Attempt::Aborted),
                _ = tokio::time::sleep(target - elapsed) => {}
            }
        }
        Ok(())
    }

    fn report_final(&self, transfer: &mut Transfer) {
        if transfer.written > 0 && transfer.progress.finish(transfer.written) {
            self.send(TaskEvent::Progress {
                cached_bytes: transfer.cached,
                bytes_written: transfer.written,
                elapsed_ms: transfer.elapsed_ms(),
                report: true,
            });
        }
    }

    async fn open_at(&self, offset: u64) -> std::io::Result<File> {
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&self.path)
            .await?;
        file.set_len(offset).await?;
        file.seek(SeekFrom::Start(offset)).await?;
        Ok(file)
    }

    async fn truncate(&self) -> Result<(), String> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .await
            .map_err(|e| format!("Failed to truncate local file: {}", e))?;
        drop(file);

        self.send(TaskEvent::Truncated);
        Ok(())
    }

    fn send(&self, kind: TaskEvent) {
        let message = TaskMessage {
            song_id: self.song.id,
            generation: self.generation,
            kind,
        };
        // A closed channel means the worker is gone; nothing left to tell.
        let _ = self.messages.send(message);
    }
}
