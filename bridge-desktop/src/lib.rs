//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `Downloader` using `reqwest` with streamed response bodies
//! - `Clock` is covered by [`bridge_traits::SystemClock`]
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::ReqwestDownloader;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let downloader = Arc::new(ReqwestDownloader::new()?);
//!     // Hand to CoreConfig::builder().downloader(downloader)
//!     Ok(())
//! }
//! ```

mod http;

pub use http::ReqwestDownloader;
