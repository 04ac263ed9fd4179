//! Cache statistics and monitoring

use serde::{Deserialize, Serialize};
use std::fmt;

/// Point-in-time statistics about the song cache.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    /// Number of entries in the store
    pub entries: usize,

    /// Entries whose file is complete
    pub fully_cached: usize,

    /// Songs currently downloading
    pub in_flight: usize,

    /// Songs protected from eviction
    pub pinned: usize,

    /// Sum of bytes on disk over all entries
    pub cached_bytes: u64,

    /// Disk budget in effect when the stats were taken
    pub budget_bytes: u64,
}

impl CacheStats {
    /// Cache usage as a percentage of the budget.
    pub fn usage_percentage(&self) -> f64 {
        if self.budget_bytes == 0 {
            return 0.0;
        }

        (self.cached_bytes as f64 / self.budget_bytes as f64) * 100.0
    }

    /// Returns true if the cache is near capacity (>90%).
    pub fn is_near_capacity(&self) -> bool {
        self.usage_percentage() > 90.0
    }

    /// Returns true if the cache is full (>=100%).
    pub fn is_full(&self) -> bool {
        self.cached_bytes >= self.budget_bytes
    }

    /// Bytes still available under the budget.
    pub fn available_bytes(&self) -> u64 {
        self.budget_bytes.saturating_sub(self.cached_bytes)
    }

    /// Bytes above the budget, e.g. after the budget was lowered.
    pub fn space_needed(&self) -> u64 {
        self.cached_bytes.saturating_sub(self.budget_bytes)
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} entries ({} complete, {} downloading, {} pinned), {} of {} used ({:.1}%)",
            self.entries,
            self.fully_cached,
            self.in_flight,
            self.pinned,
            format_bytes(self.cached_bytes),
            format_bytes(self.budget_bytes),
            self.usage_percentage()
        )
    }
}

/// Format a byte count as a human-readable string.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_stats_percentages() {
        let stats = CacheStats {
            entries: 10,
            fully_cached: 8,
            cached_bytes: 850,
            budget_bytes: 1000,
            ..Default::default()
        };

        assert_eq!(stats.usage_percentage(), 85.0);
        assert!(!stats.is_near_capacity());
        assert!(!stats.is_full());
        assert_eq!(stats.available_bytes(), 150);

        let busy = CacheStats {
            cached_bytes: 950,
            ..stats.clone()
        };
        assert!(busy.is_near_capacity());

        let zero_budget = CacheStats::default();
        assert_eq!(zero_budget.usage_percentage(), 0.0);
    }

    #[test]
    fn test_space_needed_after_budget_shrink() {
        let stats = CacheStats {
            cached_bytes: 6 * 1024,
            budget_bytes: 5 * 1024,
            ..Default::default()
        };
        assert!(stats.is_full());
        assert_eq!(stats.space_needed(), 1024);
        assert_eq!(stats.available_bytes(), 0);
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(500), "500 B");
        assert_eq!(format_bytes(1024), "1.0 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.0 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.0 GB");
    }

    #[test]
    fn test_display() {
        let stats = CacheStats {
            entries: 3,
            fully_cached: 2,
            in_flight: 1,
            pinned: 1,
            cached_bytes: 512,
            budget_bytes: 1024,
        };
        assert_eq!(
            stats.to_string(),
            "3 entries (2 complete, 1 downloading, 1 pinned), 512 B of 1.0 KB used (50.0%)"
        );
    }
}
