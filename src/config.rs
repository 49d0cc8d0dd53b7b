//! Runtime configuration.
//!
//! Capacity and daemon timings are ordinary fields rather than `const`
//! generics or a process-wide static, so a test can stand up several small,
//! independent caches (e.g. `capacity: 4` to exercise eviction without
//! allocating 64 slots) without any global initialization step.

use std::time::Duration;

/// Tunables for a [`crate::cache::Cache`].
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Number of resident slots.
    pub capacity: usize,
    /// How often the flush daemon walks the table writing back dirty slots.
    pub flush_interval: Duration,
    /// How long `lock()` backs off before retrying the eviction sweep when
    /// every slot is pinned.
    pub eviction_backoff: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: 64,
            flush_interval: Duration::from_secs(30),
            eviction_backoff: Duration::from_secs(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_constants() {
        let cfg = CacheConfig::default();
        assert_eq!(cfg.capacity, 64);
        assert_eq!(cfg.flush_interval, Duration::from_secs(30));
        assert_eq!(cfg.eviction_backoff, Duration::from_secs(1));
    }
}
