//! Per-identifier limiter store with idle expiry.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, trace};

use super::bucket::{default_burst, TokenBucket};
use super::store::LimiterStore;
use crate::clock::{Clock, SystemClock};
use crate::error::{AdmissionError, Result};

/// Idle time after which an identifier's bucket is dropped, when unset.
pub const DEFAULT_EXPIRES_IN: Duration = Duration::from_secs(3);

/// Configuration for an [`IndividualStore`].
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct IndividualStoreConfig {
    /// Admissions allowed per second, per identifier
    pub rate: f64,
    /// Admissions allowed at once, per identifier; zero means `rate` rounded
    pub burst: u32,
    /// Idle time after which an identifier is forgotten; zero means [`DEFAULT_EXPIRES_IN`]
    pub expires_in: Duration,
}

/// A store with one lazily created bucket per identifier.
///
/// Buckets unseen for longer than `expires_in` are removed by a sweep that
/// runs on the admission path of whichever call finds the last sweep older
/// than `expires_in`. There is no background task.
pub struct IndividualStore {
    rate: f64,
    burst: u32,
    expires_in: Duration,
    clock: Arc<dyn Clock>,
    state: Mutex<StoreState>,
}

struct StoreState {
    receivers: HashMap<String, Receiver>,
    last_cleanup: Instant,
}

/// One identifier's bucket and the last time it was checked.
struct Receiver {
    bucket: TokenBucket,
    last_seen: Instant,
}

impl IndividualStore {
    /// Create a store admitting `rate` calls per second per identifier.
    pub fn new(rate: f64) -> Self {
        Self::with_config(IndividualStoreConfig {
            rate,
            ..Default::default()
        })
    }

    /// Create a store from configuration.
    pub fn with_config(config: IndividualStoreConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a store driven by an explicit clock.
    pub fn with_clock(config: IndividualStoreConfig, clock: Arc<dyn Clock>) -> Self {
        let expires_in = if config.expires_in.is_zero() {
            DEFAULT_EXPIRES_IN
        } else {
            config.expires_in
        };
        let burst = if config.burst == 0 {
            default_burst(config.rate)
        } else {
            config.burst
        };
        let now = clock.now();

        Self {
            rate: config.rate,
            burst,
            expires_in,
            clock,
            state: Mutex::new(StoreState {
                receivers: HashMap::new(),
                last_cleanup: now,
            }),
        }
    }

    /// Idle time after which an identifier is forgotten.
    pub fn expires_in(&self) -> Duration {
        self.expires_in
    }

    /// Per-identifier burst.
    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Number of identifiers currently tracked.
    pub fn len(&self) -> usize {
        self.state.lock().receivers.len()
    }

    /// Whether no identifier is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `identifier` currently has a bucket.
    pub fn contains(&self, identifier: &str) -> bool {
        self.state.lock().receivers.contains_key(identifier)
    }

    /// Forget every identifier.
    pub fn clear(&self) {
        self.state.lock().receivers.clear();
    }
}

impl StoreState {
    /// Remove every receiver idle for longer than `expires_in`.
    fn sweep(&mut self, now: Instant, expires_in: Duration) {
        let before = self.receivers.len();
        self.receivers
            .retain(|_, receiver| now.saturating_duration_since(receiver.last_seen) <= expires_in);
        self.last_cleanup = now;

        let removed = before - self.receivers.len();
        if removed > 0 {
            debug!(
                removed = removed,
                remaining = self.receivers.len(),
                "Swept stale limiter buckets"
            );
        }
    }
}

impl LimiterStore for IndividualStore {
    fn allow(&self, identifier: &str) -> Result<()> {
        let now = self.clock.now();

        trace!(identifier = %identifier, "Checking individual limit");

        // Lookup, sweep and decision share one critical section; the
        // receiver for `identifier` is marked seen before any sweep, so it
        // cannot be evicted while its decision is made.
        let allowed = {
            let mut state = self.state.lock();

            match state.receivers.get_mut(identifier) {
                Some(receiver) => receiver.last_seen = now,
                None => {
                    debug!(
                        identifier = %identifier,
                        rate = self.rate,
                        burst = self.burst,
                        "Creating new limiter bucket"
                    );
                    let bucket = TokenBucket::with_clock(self.rate, self.burst, self.clock.clone());
                    state.receivers.insert(
                        identifier.to_string(),
                        Receiver {
                            bucket,
                            last_seen: now,
                        },
                    );
                }
            }

            if now.saturating_duration_since(state.last_cleanup) > self.expires_in {
                state.sweep(now, self.expires_in);
            }

            state
                .receivers
                .get(identifier)
                .map(|receiver| receiver.bucket.allow())
                .unwrap_or(false)
        };

        if allowed {
            Ok(())
        } else {
            debug!(identifier = %identifier, "Individual rate limit exceeded");
            Err(AdmissionError::IndividualLimiterDenied {
                identifier: identifier.to_string(),
            })
        }
    }
}

impl std::fmt::Debug for IndividualStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndividualStore")
            .field("rate", &self.rate)
            .field("burst", &self.burst)
            .field("expires_in", &self.expires_in)
            .field("tracked", &self.len())
            .finish()
    }
}
