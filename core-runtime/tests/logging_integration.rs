//! Integration tests for logging system

use bridge_traits::time::LogLevel;
use core_runtime::logging::{init_logging, redact_url, strip_path, LogFormat, LoggingConfig};
use core_runtime::Error;

#[test]
fn test_second_initialization_is_rejected() {
    // Only this test installs a global subscriber in this binary.
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Debug);

    init_logging(config.clone()).expect("first initialization succeeds");
    tracing::info!(song_id = 1, "logging initialized");

    match init_logging(config) {
        Err(Error::Config(message)) => assert!(message.contains("Failed to initialize logging")),
        other => panic!("expected Config error, got {:?}", other),
    }
}

#[test]
fn test_invalid_custom_filter() {
    let config = LoggingConfig::default().with_filter("core_playback=loud");
    assert!(matches!(init_logging(config), Err(Error::Config(_))));
}

#[test]
fn test_path_stripping() {
    assert_eq!(strip_path("/home/user/.cache/songs/17.mp3"), "17.mp3");
    assert_eq!(strip_path("C:\\Users\\John\\Cache\\17.mp3"), "17.mp3");
    assert_eq!(strip_path("17.mp3"), "17.mp3");
    assert_eq!(strip_path(""), "");
}

#[test]
fn test_url_redaction() {
    let url = "https://cdn.example.com/audio/17.mp3?Expires=1&Signature=abc#t=10";
    let redacted = redact_url(url);
    assert_eq!(redacted, "https://cdn.example.com/audio/17.mp3");
    assert!(!redacted.contains("Signature"));
}

#[test]
fn test_config_chaining() {
    let config = LoggingConfig::default()
        .with_format(LogFormat::Compact)
        .with_level(LogLevel::Warn)
        .with_spans(false)
        .with_target(false)
        .with_thread_info(true);

    assert_eq!(config.format, LogFormat::Compact);
    assert_eq!(config.level, LogLevel::Warn);
    assert!(!config.enable_spans);
    assert!(!config.display_target);
    assert!(config.display_thread_info);
}
