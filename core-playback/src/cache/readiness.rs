//! Playback readiness
//!
//! Decides whether a song that is still downloading can start playing
//! without stalling before the download catches up.

use super::config::ReadinessPolicy;
use core_library::CacheEntry;

/// Returns `true` when playback of `entry` may start.
///
/// A fully cached entry is always ready. Otherwise the throughput observed so
/// far (`downloaded_bytes / elapsed_ms`) projects when the remaining bytes
/// arrive; playback may start once at least `min_buffer_bytes` are on disk
/// and that projection lands `safety_margin` before the song ends.
///
/// Meant to be re-evaluated on every progress update.
pub fn can_start_playback(
    policy: &ReadinessPolicy,
    entry: &CacheEntry,
    downloaded_bytes: u64,
    elapsed_ms: u64,
    duration_sec: u32,
) -> bool {
    if entry.is_fully_cached() {
        return true;
    }

    if entry.cached_bytes < policy.min_buffer_bytes {
        return false;
    }

    // No throughput sample yet, or no idea how much is left.
    if entry.total_bytes == 0 || downloaded_bytes == 0 || elapsed_ms == 0 {
        return false;
    }

    let remaining_bytes = entry.remaining_bytes() as f64;
    let bytes_per_ms = downloaded_bytes as f64 / elapsed_ms as f64;
    let remaining_ms = remaining_bytes / bytes_per_ms;

    let margin_ms = policy.safety_margin.as_millis() as f64;
    let duration_ms = f64::from(duration_sec) * 1000.0;

    remaining_ms + margin_ms <= duration_ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_library::SongId;
    use std::time::Duration;

    fn policy() -> ReadinessPolicy {
        ReadinessPolicy {
            min_buffer_bytes: 100,
            safety_margin: Duration::from_secs(10),
        }
    }

    fn entry(total: u64, cached: u64) -> CacheEntry {
        CacheEntry {
            song_id: SongId(1),
            total_bytes: total,
            cached_bytes: cached,
            last_access_time: 0,
        }
    }

    #[test]
    fn test_fully_cached_is_ready() {
        assert!(can_start_playback(&policy(), &entry(500, 500), 0, 0, 1));
    }

    #[test]
    fn test_minimum_buffer_required() {
        // Plenty of throughput but too little on disk.
        assert!(!can_start_playback(
            &policy(),
            &entry(1_000, 99),
            99,
            1,
            600
        ));
    }

    #[test]
    fn test_no_sample_is_not_ready() {
        assert!(!can_start_playback(&policy(), &entry(1_000, 200), 0, 100, 600));
        assert!(!can_start_playback(&policy(), &entry(1_000, 200), 200, 0, 600));
        assert!(!can_start_playback(&policy(), &entry(0, 200), 200, 100, 600));
    }

    #[test]
    fn test_projection_against_margin() {
        // 1 byte/ms, 10_000 bytes left -> 10s; plus 10s margin = 20s.
        let e = entry(10_200, 200);
        assert!(can_start_playback(&policy(), &e, 1_000, 1_000, 20));
        assert!(!can_start_playback(&policy(), &e, 1_000, 1_000, 19));
    }

    #[test]
    fn test_slow_download_is_not_ready() {
        // 0.01 bytes/ms leaves 1_000_000ms to go for a three minute song.
        let e = entry(10_200, 200);
        assert!(!can_start_playback(&policy(), &e, 10, 1_000, 180));
    }
}
