//! # Host Bridge Traits
//!
//! Capability traits the cache core consumes but does not implement.
//!
//! ## Traits
//!
//! - [`Downloader`](http::Downloader) - Streaming HTTP fetch with range support
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! ## Platform Requirements
//!
//! | Platform | Implementation Crate | Status |
//! |----------|---------------------|--------|
//! | Desktop  | `bridge-desktop`    | ✅ Available |
//! | Mobile   | host-provided       | 📋 Planned |
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Transport
//! failures that may succeed on a later attempt are reported as
//! `BridgeError::Network` or `BridgeError::Io`; callers check
//! [`BridgeError::is_transient`](error::BridgeError::is_transient) instead of
//! matching on message text.
//!
//! ## Thread Safety
//!
//! All bridge traits require `Send + Sync` so one instance can be shared by
//! every download task.

pub mod error;
pub mod http;
pub mod time;

pub use error::BridgeError;

pub use http::{ByteStream, ContentRange, Downloader, HttpMethod, HttpRequest, StreamingResponse};
pub use time::{Clock, LogLevel, SystemClock};
