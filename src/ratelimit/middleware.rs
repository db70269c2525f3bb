//! Admission middleware: consult a limiter store before running the next runner.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, trace, warn};

use super::store::LimiterStore;
use crate::context::Context;
use crate::error::{AdmissionError, BoxError, Result};
use crate::runner::{Middleware, Runner, Work};

/// Derives the admission key from the context.
pub type IdentifierExtractor =
    dyn Fn(&Context) -> std::result::Result<String, BoxError> + Send + Sync;

/// Observes an extraction failure and decides what to propagate.
///
/// Returning `None` suppresses the error: `run` then returns `Ok(())`
/// without executing the work.
pub type ErrorHandler = dyn Fn(&Context, AdmissionError) -> Option<AdmissionError> + Send + Sync;

/// Observes a denial for an identifier and decides what to propagate.
///
/// Same contract as [`ErrorHandler`].
pub type DenyHandler =
    dyn Fn(&Context, &str, AdmissionError) -> Option<AdmissionError> + Send + Sync;

/// Everything an admission middleware needs.
#[derive(Clone)]
pub struct LimiterConfig {
    identifier: Arc<IdentifierExtractor>,
    on_error: Arc<ErrorHandler>,
    on_deny: Arc<DenyHandler>,
    store: Arc<dyn LimiterStore>,
}

impl LimiterConfig {
    pub fn builder() -> LimiterConfigBuilder {
        LimiterConfigBuilder::default()
    }
}

impl std::fmt::Debug for LimiterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterConfig").finish_non_exhaustive()
    }
}

/// Builder for [`LimiterConfig`]. All four parts are required.
#[derive(Default)]
pub struct LimiterConfigBuilder {
    identifier: Option<Arc<IdentifierExtractor>>,
    on_error: Option<Arc<ErrorHandler>>,
    on_deny: Option<Arc<DenyHandler>>,
    store: Option<Arc<dyn LimiterStore>>,
}

impl LimiterConfigBuilder {
    pub fn identifier<F>(mut self, extractor: F) -> Self
    where
        F: Fn(&Context) -> std::result::Result<String, BoxError> + Send + Sync + 'static,
    {
        self.identifier = Some(Arc::new(extractor));
        self
    }

    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Context, AdmissionError) -> Option<AdmissionError> + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }

    pub fn on_deny<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Context, &str, AdmissionError) -> Option<AdmissionError> + Send + Sync + 'static,
    {
        self.on_deny = Some(Arc::new(handler));
        self
    }

    /// Use `store`. Pass an `Arc` to share one store between limiters.
    pub fn store<S>(mut self, store: S) -> Self
    where
        S: LimiterStore + 'static,
    {
        self.store = Some(Arc::new(store));
        self
    }

    pub fn build(self) -> Result<LimiterConfig> {
        Ok(LimiterConfig {
            identifier: self.identifier.ok_or_else(|| missing("identifier extractor"))?,
            on_error: self.on_error.ok_or_else(|| missing("error handler"))?,
            on_deny: self.on_deny.ok_or_else(|| missing("deny handler"))?,
            store: self.store.ok_or_else(|| missing("store"))?,
        })
    }
}

fn missing(part: &str) -> AdmissionError {
    AdmissionError::Config(format!("limiter {} is required", part))
}

/// Middleware that wraps a runner with an admission check.
#[derive(Debug, Clone)]
pub struct AdmissionLayer {
    config: LimiterConfig,
}

impl AdmissionLayer {
    pub fn new(config: LimiterConfig) -> Self {
        Self { config }
    }
}

impl Middleware for AdmissionLayer {
    fn wrap(&self, next: Arc<dyn Runner>) -> Arc<dyn Runner> {
        Arc::new(Admission {
            config: self.config.clone(),
            next,
        })
    }
}

/// Runner produced by [`AdmissionLayer`].
#[derive(Clone)]
pub struct Admission {
    config: LimiterConfig,
    next: Arc<dyn Runner>,
}

#[async_trait]
impl Runner for Admission {
    async fn run(&self, ctx: &Context, work: Work<'_>) -> Result<()> {
        let identifier = match (self.config.identifier)(ctx) {
            Ok(identifier) => identifier,
            Err(source) => {
                warn!(error = %source, "Identifier extraction failed");
                let err = AdmissionError::ExtractionFailed(source);
                return propagate((self.config.on_error)(ctx, err));
            }
        };

        trace!(identifier = %identifier, "Checking admission");

        if let Err(denied) = self.config.store.allow(&identifier) {
            debug!(identifier = %identifier, error = %denied, "Admission denied");
            return propagate((self.config.on_deny)(ctx, &identifier, denied));
        }

        self.next.run(ctx, work).await
    }
}

fn propagate(handled: Option<AdmissionError>) -> Result<()> {
    match handled {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Build an admission middleware from `config`.
pub fn middleware(config: LimiterConfig) -> AdmissionLayer {
    AdmissionLayer::new(config)
}

/// Build a single limiter ending in the terminal runner.
pub fn new(config: LimiterConfig) -> Arc<dyn Runner> {
    crate::runner::single(middleware(config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::MockClock;
    use crate::ratelimit::{IndividualStore, IndividualStoreConfig, TotalStore, TotalStoreConfig};
    use crate::runner::RunnerChain;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct Phone(&'static str);

    #[derive(Default)]
    struct Hooks {
        errors: Mutex<Vec<String>>,
        denials: Mutex<Vec<String>>,
    }

    fn config_with(
        hooks: &Arc<Hooks>,
        store: impl LimiterStore + 'static,
        extractor: impl Fn(&Context) -> std::result::Result<String, BoxError> + Send + Sync + 'static,
    ) -> LimiterConfig {
        let on_error = hooks.clone();
        let on_deny = hooks.clone();
        LimiterConfig::builder()
            .identifier(extractor)
            .on_error(move |_, err| {
                on_error.errors.lock().push(err.to_string());
                Some(err)
            })
            .on_deny(move |_, identifier, err| {
                on_deny.denials.lock().push(identifier.to_string());
                Some(err)
            })
            .store(store)
            .build()
            .unwrap()
    }

    fn total(rate: f64, burst: u32) -> TotalStore {
        TotalStore::with_clock(TotalStoreConfig { rate, burst }, Arc::new(MockClock::new()))
    }

    fn phone_extractor(ctx: &Context) -> std::result::Result<String, BoxError> {
        ctx.value::<Phone>()
            .map(|phone| phone.0.to_string())
            .ok_or_else(|| "no phone number in context".into())
    }

    fn counting_work(calls: &Arc<AtomicUsize>) -> Work<'static> {
        let calls = calls.clone();
        Work::new(move |_| async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_builder_requires_every_part() {
        let err = LimiterConfig::builder()
            .identifier(|_| Ok("total".to_string()))
            .store(total(1.0, 1))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("error handler"));
    }

    #[tokio::test]
    async fn test_admitted_call_runs_work() {
        let hooks = Arc::new(Hooks::default());
        let runner = new(config_with(&hooks, total(1.0, 1), |_| Ok("total".to_string())));
        let calls = Arc::new(AtomicUsize::new(0));

        runner
            .run(&Context::background(), counting_work(&calls))
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(hooks.denials.lock().is_empty());
    }

    #[tokio::test]
    async fn test_denied_call_invokes_deny_handler() {
        let hooks = Arc::new(Hooks::default());
        let runner = new(config_with(&hooks, total(1.0, 1), |_| Ok("total".to_string())));
        let calls = Arc::new(AtomicUsize::new(0));
        let ctx = Context::background();

        runner.run(&ctx, counting_work(&calls)).await.unwrap();
        let err = runner.run(&ctx, counting_work(&calls)).await.unwrap_err();

        assert!(matches!(err, AdmissionError::TotalLimiterDenied));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*hooks.denials.lock(), vec!["total"]);
    }

    #[tokio::test]
    async fn test_extraction_failure_skips_store_and_work() {
        let hooks = Arc::new(Hooks::default());
        let store = Arc::new(total(1.0, 1));
        let runner = new(config_with(&hooks, store.clone(), phone_extractor));
        let calls = Arc::new(AtomicUsize::new(0));

        let err = runner
            .run(&Context::background(), counting_work(&calls))
            .await
            .unwrap_err();

        assert!(err.is_extraction_failed());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(hooks.errors.lock().len(), 1);
        // The token was never consumed
        assert_eq!(store.bucket().available(), 1.0);
    }

    #[tokio::test]
    async fn test_handler_may_transform_error() {
        let config = LimiterConfig::builder()
            .identifier(|_| Ok("total".to_string()))
            .on_error(|_, err| Some(err))
            .on_deny(|_, identifier, _| {
                Some(AdmissionError::Config(format!("quota exhausted for {}", identifier)))
            })
            .store(total(0.0, 0))
            .build()
            .unwrap();
        let runner = new(config);

        let err = runner
            .run(&Context::background(), Work::new(|_| async { Ok(()) }))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Configuration error: quota exhausted for total");
    }

    #[tokio::test]
    async fn test_handler_may_suppress_denial() {
        let config = LimiterConfig::builder()
            .identifier(|_| Ok("total".to_string()))
            .on_error(|_, err| Some(err))
            .on_deny(|_, _, _| None)
            .store(total(0.0, 0))
            .build()
            .unwrap();
        let runner = new(config);
        let calls = Arc::new(AtomicUsize::new(0));

        runner
            .run(&Context::background(), counting_work(&calls))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_inner_denial_is_attributed_to_inner_store() {
        let outer_hooks = Arc::new(Hooks::default());
        let inner_hooks = Arc::new(Hooks::default());
        let per_phone = IndividualStore::with_clock(
            IndividualStoreConfig {
                rate: 1.0,
                burst: 1,
                expires_in: Duration::from_secs(1),
            },
            Arc::new(MockClock::new()),
        );

        let runner = RunnerChain::new()
            .with(middleware(config_with(&outer_hooks, total(5.0, 5), |_| {
                Ok("total".to_string())
            })))
            .with(middleware(config_with(&inner_hooks, per_phone, phone_extractor)))
            .build();

        let ctx = Context::background().with_value(Phone("0966666666"));
        let calls = Arc::new(AtomicUsize::new(0));

        runner.run(&ctx, counting_work(&calls)).await.unwrap();
        let err = runner.run(&ctx, counting_work(&calls)).await.unwrap_err();

        assert!(matches!(err, AdmissionError::IndividualLimiterDenied { .. }));
        assert!(outer_hooks.denials.lock().is_empty());
        assert_eq!(*inner_hooks.denials.lock(), vec!["0966666666"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
