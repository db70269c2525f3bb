//! Token bucket primitive.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

use crate::clock::{Clock, SystemClock};
use crate::context::Context;
use crate::error::{AdmissionError, Result};

/// Upper bound on a single sleep inside [`TokenBucket::wait`], so a bucket
/// with a tiny rate still re-checks the context regularly.
const MAX_WAIT_SLICE: Duration = Duration::from_secs(1);

/// A single-identifier token bucket.
///
/// The bucket starts full with `burst` tokens and refills lazily at `rate`
/// tokens per second, never holding more than `burst`. Each admission
/// consumes exactly one token.
///
/// This type is thread-safe and can be shared across tasks.
pub struct TokenBucket {
    /// Refill rate in tokens per second
    rate: f64,
    /// Maximum number of tokens held
    burst: u32,
    clock: Arc<dyn Clock>,
    state: Mutex<BucketState>,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a bucket using the system clock.
    ///
    /// A `burst` of zero defaults to `rate` rounded to an integer, allowing
    /// one second's worth of admissions at once.
    pub fn new(rate: f64, burst: u32) -> Self {
        Self::with_clock(rate, burst, Arc::new(SystemClock))
    }

    /// Create a bucket driven by an explicit clock.
    pub fn with_clock(rate: f64, burst: u32, clock: Arc<dyn Clock>) -> Self {
        let rate = if rate.is_nan() || rate < 0.0 { 0.0 } else { rate };
        let burst = if burst == 0 { default_burst(rate) } else { burst };
        let now = clock.now();

        Self {
            rate,
            burst,
            clock,
            state: Mutex::new(BucketState {
                tokens: burst as f64,
                last_refill: now,
            }),
        }
    }

    /// Refill rate in tokens per second.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Maximum number of tokens the bucket can hold.
    pub fn burst(&self) -> u32 {
        self.burst
    }

    /// Try to consume one token right now.
    ///
    /// Returns `true` if a token was available. A denial has no side effect
    /// beyond the refill bookkeeping.
    pub fn allow(&self) -> bool {
        if self.rate.is_infinite() {
            return true;
        }

        let now = self.clock.now();
        let mut state = self.state.lock();
        self.refill(&mut state, now);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            trace!(tokens = state.tokens, "Token bucket empty");
            false
        }
    }

    /// Tokens currently available, after refill.
    pub fn available(&self) -> f64 {
        if self.rate.is_infinite() {
            return self.burst as f64;
        }

        let now = self.clock.now();
        let mut state = self.state.lock();
        self.refill(&mut state, now);
        state.tokens
    }

    /// How long until at least one token is available.
    ///
    /// Returns `None` if the bucket can never admit anything (zero rate and
    /// no tokens left).
    pub fn time_to_next_token(&self) -> Option<Duration> {
        let tokens = self.available();
        if tokens >= 1.0 {
            return Some(Duration::ZERO);
        }
        if self.rate <= 0.0 || self.burst == 0 {
            return None;
        }

        Some(Duration::from_secs_f64((1.0 - tokens) / self.rate))
    }

    /// Wait until a token can be consumed.
    ///
    /// Fails with [`AdmissionError::ContextCancelled`] if the context is
    /// cancelled first.
    pub async fn wait(&self, ctx: &Context) -> Result<()> {
        loop {
            if ctx.is_cancelled() {
                return Err(AdmissionError::ContextCancelled);
            }
            if self.allow() {
                return Ok(());
            }

            let delay = self
                .time_to_next_token()
                .unwrap_or(MAX_WAIT_SLICE)
                .min(MAX_WAIT_SLICE);

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = ctx.cancelled() => return Err(AdmissionError::ContextCancelled),
            }
        }
    }

    fn refill(&self, state: &mut BucketState, now: Instant) {
        let elapsed = now.saturating_duration_since(state.last_refill);
        state.last_refill = now;

        if elapsed.is_zero() || self.rate == 0.0 {
            return;
        }
        state.tokens = (state.tokens + elapsed.as_secs_f64() * self.rate).min(self.burst as f64);
    }
}

/// Burst used when none is configured: one second's worth of tokens.
pub(super) fn default_burst(rate: f64) -> u32 {
    if rate.is_nan() || rate <= 0.0 {
        0
    } else if rate.is_infinite() {
        u32::MAX
    } else {
        rate.round().min(u32::MAX as f64) as u32
    }
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("rate", &self.rate)
            .field("burst", &self.burst)
            .finish()
    }
}
