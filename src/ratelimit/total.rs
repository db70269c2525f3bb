//! Process-wide limiter store with a single shared bucket.

use std::sync::Arc;
use tracing::{debug, trace};

use super::bucket::TokenBucket;
use super::store::LimiterStore;
use crate::clock::{Clock, SystemClock};
use crate::error::{AdmissionError, Result};

/// Configuration for a [`TotalStore`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TotalStoreConfig {
    /// Admissions allowed per second
    pub rate: f64,
    /// Admissions allowed at once; zero means `rate` rounded
    pub burst: u32,
}

/// A store with one bucket for the whole process.
///
/// The identifier is ignored; there is no partitioning and nothing to expire.
#[derive(Debug)]
pub struct TotalStore {
    bucket: TokenBucket,
}

impl TotalStore {
    /// Create a store admitting `rate` calls per second, with a burst of `rate`.
    pub fn new(rate: f64) -> Self {
        Self::with_config(TotalStoreConfig { rate, burst: 0 })
    }

    /// Create a store from configuration.
    pub fn with_config(config: TotalStoreConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a store driven by an explicit clock.
    pub fn with_clock(config: TotalStoreConfig, clock: Arc<dyn Clock>) -> Self {
        let bucket = TokenBucket::with_clock(config.rate, config.burst, clock);
        debug!(
            rate = bucket.rate(),
            burst = bucket.burst(),
            "Creating total limiter store"
        );
        Self { bucket }
    }

    /// The shared bucket.
    pub fn bucket(&self) -> &TokenBucket {
        &self.bucket
    }
}

impl LimiterStore for TotalStore {
    fn allow(&self, identifier: &str) -> Result<()> {
        trace!(identifier = %identifier, "Checking total limit");

        if self.bucket.allow() {
            Ok(())
        } else {
            debug!(identifier = %identifier, "Total rate limit exceeded");
            Err(AdmissionError::TotalLimiterDenied)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use std::time::Duration;

    fn store(rate: f64, burst: u32) -> (TotalStore, MockClock) {
        let clock = MockClock::new();
        let store = TotalStore::with_clock(TotalStoreConfig { rate, burst }, Arc::new(clock.clone()));
        (store, clock)
    }

    #[test]
    fn test_allows_exactly_burst() {
        let (store, _clock) = store(5.0, 5);

        for i in 1..=5 {
            assert!(store.allow("total").is_ok(), "Request {} should be OK", i);
        }

        let err = store.allow("total").unwrap_err();
        assert!(matches!(err, AdmissionError::TotalLimiterDenied));
    }

    #[test]
    fn test_identifiers_share_one_bucket() {
        let (store, _clock) = store(2.0, 2);

        assert!(store.allow("a").is_ok());
        assert!(store.allow("b").is_ok());
        assert!(store.allow("c").is_err());
    }

    #[test]
    fn test_admissions_bounded_by_burst_plus_rate_times_window() {
        let (store, clock) = store(4.0, 3);
        let mut admitted = 0;

        // 2 seconds in 100ms steps, 5 attempts per step
        for _ in 0..20 {
            for _ in 0..5 {
                if store.allow("total").is_ok() {
                    admitted += 1;
                }
            }
            clock.advance(Duration::from_millis(100));
        }

        // Window covers 1.9s of refill after the initial burst
        assert!(admitted <= 3 + (4.0_f64 * 1.9).ceil() as usize);
        assert!(admitted >= 3 + 7);
    }

    #[test]
    fn test_new_uses_rate_as_burst() {
        let store = TotalStore::new(3.0);
        assert_eq!(store.bucket().burst(), 3);
    }
}
