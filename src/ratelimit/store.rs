//! Limiter store trait for abstracting total and per-identifier implementations.

use crate::error::Result;

/// Trait for limiter store implementations.
///
/// This trait abstracts over both the [`TotalStore`](super::TotalStore) and
/// the [`IndividualStore`](super::IndividualStore) so admission middleware
/// can work with either.
///
/// `Ok(())` admits the caller; a denial is always an error, so an admitted
/// call never carries one.
pub trait LimiterStore: Send + Sync {
    /// Check whether `identifier` may proceed right now, consuming one token if so.
    fn allow(&self, identifier: &str) -> Result<()>;
}

impl<S: LimiterStore + ?Sized> LimiterStore for std::sync::Arc<S> {
    fn allow(&self, identifier: &str) -> Result<()> {
        (**self).allow(identifier)
    }
}
