//! Workspace placeholder crate.
//!
//! This crate exposes the feature flags that map onto the individual
//! workspace crates. Host applications can depend on `songcache-workspace`
//! and enable `desktop-shims` to get the service façade with the default
//! reqwest downloader, without wiring each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service::*;
