//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the song cache core:
//! - Logging and tracing infrastructure
//! - Configuration management, including hot-reloadable cache settings
//! - Event bus for cache notifications
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that the other modules depend
//! on. It establishes the logging conventions, the configuration surface and
//! the event broadcasting used throughout the system.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::{CacheSettings, CacheSettingsHandle, CoreConfig, DatabaseLocation};
pub use error::{Error, Result};
pub use events::{CacheEvent, EventBus, EventSeverity, EventStream};
