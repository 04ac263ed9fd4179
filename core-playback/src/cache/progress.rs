//! Rate-limited progress reporting

use std::time::{Duration, Instant};

/// Coalesces frequent byte-count updates into bounded-frequency reports.
///
/// The first update is always forwarded, then at most one per `interval`.
/// [`ProgressReporter::finish`] forwards the final count unless it was the
/// last one forwarded.
#[derive(Debug)]
pub struct ProgressReporter {
    interval: Duration,
    last_emit: Option<Instant>,
    last_reported: Option<u64>,
}

impl ProgressReporter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
            last_reported: None,
        }
    }

    /// Offer an update; returns `true` if it should be forwarded.
    pub fn update(&mut self, bytes_written: u64) -> bool {
        self.update_at(bytes_written, Instant::now())
    }

    /// Final update of an attempt; returns `true` if it should be forwarded.
    pub fn finish(&mut self, bytes_written: u64) -> bool {
        if self.last_reported == Some(bytes_written) {
            return false;
        }
        self.record(bytes_written, Instant::now());
        true
    }

    fn update_at(&mut self, bytes_written: u64, now: Instant) -> bool {
        let due = match self.last_emit {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        };

        if due {
            self.record(bytes_written, now);
        }
        due
    }

    fn record(&mut self, bytes_written: u64, now: Instant) {
        self.last_emit = Some(now);
        self.last_reported = Some(bytes_written);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_update_forwarded() {
        let mut reporter = ProgressReporter::new(Duration::from_secs(60));
        assert!(reporter.update(10));
        assert!(!reporter.update(20));
        assert!(!reporter.update(30));
    }

    #[test]
    fn test_interval_bounds_frequency() {
        let mut reporter = ProgressReporter::new(Duration::from_millis(100));
        let start = Instant::now();

        assert!(reporter.update_at(1, start));
        assert!(!reporter.update_at(2, start + Duration::from_millis(50)));
        assert!(reporter.update_at(3, start + Duration::from_millis(100)));
        assert!(!reporter.update_at(4, start + Duration::from_millis(199)));
        assert!(reporter.update_at(5, start + Duration::from_millis(200)));
    }

    #[test]
    fn test_finish_forwards_final_count_once() {
        let mut reporter = ProgressReporter::new(Duration::from_secs(60));
        assert!(reporter.update(10));
        assert!(!reporter.update(50));

        assert!(reporter.finish(50));
        assert!(!reporter.finish(50));
    }

    #[test]
    fn test_finish_skips_already_reported_count() {
        let mut reporter = ProgressReporter::new(Duration::ZERO);
        assert!(reporter.update(70));
        assert!(!reporter.finish(70));
    }
}
