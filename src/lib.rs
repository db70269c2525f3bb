//! Admission - composable rate-limiting middleware for asynchronous work
//!
//! Callers hand a unit of [`Work`](runner::Work) to a [`Runner`](runner::Runner)
//! together with an execution [`Context`]. Admission middlewares consult a
//! limiter store before letting the work through: a [`TotalStore`] shares one
//! token bucket across the whole process, an [`IndividualStore`] keeps one per
//! caller identifier and forgets idle callers.

pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod ratelimit;
pub mod runner;
pub mod sms;

pub use clock::{Clock, MockClock, SystemClock};
pub use context::{CancelHandle, Context};
pub use error::{AdmissionError, BoxError, Result};
pub use ratelimit::{IndividualStore, LimiterConfig, LimiterStore, TokenBucket, TotalStore};
pub use runner::{Command, Middleware, Runner, RunnerChain, Work};
