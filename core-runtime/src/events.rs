//! # Event Bus System
//!
//! Delivers cache lifecycle events to playback and UI consumers over a single
//! `tokio::sync::broadcast` channel.
//!
//! ## Overview
//!
//! - **CacheEvent**: One tagged enum for every notification the cache produces
//! - **EventBus**: Central broadcast channel for publishing events
//! - **EventStream**: Receiver wrapper with optional filtering
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────┐   emit   ┌───────────┐   subscribe   ┌─────────────────┐
//! │ Cache worker  ├─────────>│ EventBus  ├──────────────>│ Player          │
//! └───────────────┘          │ (broadcast│               └─────────────────┘
//!                            │  channel) │   subscribe   ┌─────────────────┐
//!                            │           ├──────────────>│ UI / telemetry  │
//!                            └───────────┘               └─────────────────┘
//! ```
//!
//! Only the cache worker emits, so events for one song arrive in the order
//! the underlying bytes were written.
//!
//! ## Usage
//!
//! ```rust
//! use core_runtime::events::{CacheEvent, EventBus};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let bus = EventBus::new(100);
//! let mut stream = bus.stream().filter(|event| event.song_id() == 42);
//!
//! bus.emit(CacheEvent::Completed { song_id: 42, total_bytes: 1024 }).ok();
//!
//! let event = stream.recv().await.unwrap();
//! assert!(event.is_terminal());
//! # }
//! ```
//!
//! ## Error Handling
//!
//! - **`RecvError::Lagged(n)`**: Subscriber was too slow and missed `n` events.
//!   This is non-fatal; the subscriber can continue receiving new events.
//! - **`RecvError::Closed`**: All senders have been dropped. This indicates shutdown.

use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

pub use tokio::sync::broadcast::error::{RecvError, SendError};
pub use tokio::sync::broadcast::Receiver;

/// Default buffer size for the event bus channel.
///
/// Progress is coalesced upstream, so bursts stay small. Subscribers that
/// can't keep up will receive `RecvError::Lagged`.
pub const DEFAULT_EVENT_BUFFER_SIZE: usize = 256;

// ============================================================================
// Cache Events
// ============================================================================

/// Notifications produced by the song cache.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event")]
pub enum CacheEvent {
    /// Bytes were written for an in-flight download.
    Progress {
        song_id: i64,
        /// Bytes durably on disk for this song.
        cached_bytes: u64,
        /// Declared size, 0 while unknown.
        total_bytes: u64,
        /// Bytes written by the current attempt.
        bytes_written: u64,
        /// Milliseconds since the current attempt started writing.
        elapsed_ms: u64,
    },
    /// The song is fully cached.
    Completed { song_id: i64, total_bytes: u64 },
    /// A retryable error occurred; the download keeps going.
    Failed {
        song_id: i64,
        reason: String,
        /// Backoff before the next attempt.
        retry_in_ms: u64,
    },
    /// The download terminated and will not be retried.
    Fatal { song_id: i64, reason: String },
    /// The song's file and entry were removed to free space.
    Evicted { song_id: i64, freed_bytes: u64 },
}

impl CacheEvent {
    /// Song the event refers to.
    pub fn song_id(&self) -> i64 {
        match self {
            CacheEvent::Progress { song_id, .. }
            | CacheEvent::Completed { song_id, .. }
            | CacheEvent::Failed { song_id, .. }
            | CacheEvent::Fatal { song_id, .. }
            | CacheEvent::Evicted { song_id, .. } => *song_id,
        }
    }

    /// Returns a human-readable description of the event.
    pub fn description(&self) -> &str {
        match self {
            CacheEvent::Progress { .. } => "Download in progress",
            CacheEvent::Completed { .. } => "Download completed",
            CacheEvent::Failed { .. } => "Download failed, retrying",
            CacheEvent::Fatal { .. } => "Download failed permanently",
            CacheEvent::Evicted { .. } => "Cache entry evicted",
        }
    }

    /// Returns the severity level of the event.
    pub fn severity(&self) -> EventSeverity {
        match self {
            CacheEvent::Progress { .. } => EventSeverity::Debug,
            CacheEvent::Completed { .. } | CacheEvent::Evicted { .. } => EventSeverity::Info,
            CacheEvent::Failed { .. } => EventSeverity::Warning,
            CacheEvent::Fatal { .. } => EventSeverity::Error,
        }
    }

    /// Whether no further download events follow for this attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CacheEvent::Completed { .. } | CacheEvent::Fatal { .. }
        )
    }
}

impl fmt::Display for CacheEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (song {})", self.description(), self.song_id())
    }
}

/// Event severity levels for filtering and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventSeverity {
    Debug,
    Info,
    Warning,
    Error,
}

// ============================================================================
// Event Bus
// ============================================================================

/// Broadcast channel for [`CacheEvent`]s.
///
/// Cloning is cheap; every clone publishes to the same subscribers.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CacheEvent>,
}

impl EventBus {
    /// Creates a new event bus with the specified buffer size.
    ///
    /// When a subscriber falls behind by more than `capacity` events it
    /// receives `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns the number of subscribers that received the event, or an error
    /// if there are none. Publishers normally ignore that error.
    pub fn emit(&self, event: CacheEvent) -> Result<usize, SendError<CacheEvent>> {
        self.sender.send(event)
    }

    /// Creates a new raw subscriber. Past events are not replayed.
    pub fn subscribe(&self) -> Receiver<CacheEvent> {
        self.sender.subscribe()
    }

    /// Creates a new subscriber wrapped in an [`EventStream`].
    pub fn stream(&self) -> EventStream {
        EventStream::new(self.subscribe())
    }

    /// Returns the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER_SIZE)
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ============================================================================
// Event Stream Wrapper
// ============================================================================

type EventFilter = Box<dyn Fn(&CacheEvent) -> bool + Send + Sync>;

/// A wrapper around `broadcast::Receiver` with optional filtering.
///
/// ```rust
/// use core_runtime::events::{CacheEvent, EventBus, EventSeverity};
///
/// let bus = EventBus::new(16);
/// let _errors = bus
///     .stream()
///     .filter(|event| event.severity() >= EventSeverity::Warning);
/// ```
pub struct EventStream {
    receiver: Receiver<CacheEvent>,
    filter: Option<EventFilter>,
}

impl EventStream {
    /// Creates a new event stream from a receiver.
    pub fn new(receiver: Receiver<CacheEvent>) -> Self {
        Self {
            receiver,
            filter: None,
        }
    }

    /// Only events that match `predicate` will be returned.
    pub fn filter<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&CacheEvent) -> bool + Send + Sync + 'static,
    {
        self.filter = Some(Box::new(predicate));
        self
    }

    fn accepts(&self, event: &CacheEvent) -> bool {
        self.filter.as_ref().map_or(true, |filter| filter(event))
    }

    /// Receives the next event that passes the filter.
    ///
    /// # Errors
    ///
    /// Returns `RecvError::Lagged(n)` if the subscriber fell behind by `n` events.
    /// Returns `RecvError::Closed` if all senders have been dropped.
    pub async fn recv(&mut self) -> Result<CacheEvent, RecvError> {
        loop {
            let event = self.receiver.recv().await?;
            if self.accepts(&event) {
                return Ok(event);
            }
        }
    }

    /// Attempts to receive an event without blocking.
    ///
    /// Returns `None` if no matching events are currently available.
    pub fn try_recv(&mut self) -> Option<Result<CacheEvent, RecvError>> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.accepts(&event) {
                        return Some(Ok(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => return None,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Err(RecvError::Lagged(n)))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Some(Err(RecvError::Closed)),
            }
        }
    }
}

impl fmt::Debug for EventStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("has_filter", &self.filter.is_some())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn progress(song_id: i64, cached: u64) -> CacheEvent {
        CacheEvent::Progress {
            song_id,
            cached_bytes: cached,
            total_bytes: 100,
            bytes_written: cached,
            elapsed_ms: 10,
        }
    }

    #[tokio::test]
    async fn test_event_bus_subscription() {
        let bus = EventBus::new(10);
        assert_eq!(bus.subscriber_count(), 0);
        let _sub1 = bus.subscribe();
        let _sub2 = bus.stream();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_event_emission_no_subscribers() {
        let bus = EventBus::new(10);
        assert!(bus.emit(progress(1, 10)).is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers_receive_same_event() {
        let bus = EventBus::new(10);
        let mut sub1 = bus.subscribe();
        let mut sub2 = bus.subscribe();

        let event = CacheEvent::Completed {
            song_id: 7,
            total_bytes: 100,
        };
        assert_eq!(bus.emit(event.clone()).unwrap(), 2);

        assert_eq!(sub1.recv().await.unwrap(), event);
        assert_eq!(sub2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_event_stream_filter_skips_other_songs() {
        let bus = EventBus::new(10);
        let mut stream = bus.stream().filter(|e| e.song_id() == 2);

        bus.emit(progress(1, 10)).ok();
        bus.emit(progress(2, 20)).ok();
        bus.emit(progress(1, 30)).ok();

        assert_eq!(stream.recv().await.unwrap(), progress(2, 20));
        assert!(stream.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagged_subscriber_recovers() {
        let bus = EventBus::new(2);
        let mut stream = bus.stream();

        for i in 0..5 {
            bus.emit(progress(1, i)).ok();
        }

        assert!(matches!(stream.recv().await, Err(RecvError::Lagged(_))));
        // Continues with the retained tail.
        assert_eq!(stream.recv().await.unwrap(), progress(1, 3));
    }

    #[tokio::test]
    async fn test_closed_when_bus_dropped() {
        let bus = EventBus::new(4);
        let mut stream = bus.stream();
        drop(bus);
        assert!(matches!(stream.recv().await, Err(RecvError::Closed)));
    }

    #[test]
    fn test_severity_and_terminal_flags() {
        let fatal = CacheEvent::Fatal {
            song_id: 3,
            reason: "HTTP 404".to_string(),
        };
        assert_eq!(fatal.severity(), EventSeverity::Error);
        assert!(fatal.is_terminal());

        let failed = CacheEvent::Failed {
            song_id: 3,
            reason: "reset".to_string(),
            retry_in_ms: 1000,
        };
        assert_eq!(failed.severity(), EventSeverity::Warning);
        assert!(!failed.is_terminal());
        assert!(!progress(3, 1).is_terminal());

        let evicted = CacheEvent::Evicted {
            song_id: 4,
            freed_bytes: 10,
        };
        assert_eq!(evicted.severity(), EventSeverity::Info);
        assert_eq!(evicted.to_string(), "Cache entry evicted (song 4)");
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = CacheEvent::Evicted {
            song_id: 9,
            freed_bytes: 512,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"event\":\"Evicted\""));
        let back: CacheEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
