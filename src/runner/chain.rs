//! Middleware composition.

use std::sync::Arc;

use super::{Command, Runner};

/// A transformation from one runner to another.
///
/// Closures of type `Fn(Arc<dyn Runner>) -> Arc<dyn Runner>` are middlewares too.
pub trait Middleware: Send + Sync {
    /// Wrap `next`, producing the runner that executes first.
    fn wrap(&self, next: Arc<dyn Runner>) -> Arc<dyn Runner>;
}

impl<F> Middleware for F
where
    F: Fn(Arc<dyn Runner>) -> Arc<dyn Runner> + Send + Sync,
{
    fn wrap(&self, next: Arc<dyn Runner>) -> Arc<dyn Runner> {
        self(next)
    }
}

/// Compose middlewares into one runner ending in [`Command`].
///
/// The first middleware is the outermost: given `[m0, m1]` the result is
/// `m0(m1(Command))`, so `m0` runs its check first.
pub fn chain<I>(middlewares: I) -> Arc<dyn Runner>
where
    I: IntoIterator<Item = Box<dyn Middleware>>,
    I::IntoIter: DoubleEndedIterator,
{
    middlewares
        .into_iter()
        .rev()
        .fold(Arc::new(Command) as Arc<dyn Runner>, |next, middleware| {
            middleware.wrap(next)
        })
}

/// A one-element chain.
pub fn single<M: Middleware>(middleware: M) -> Arc<dyn Runner> {
    middleware.wrap(Arc::new(Command))
}

/// Builder collecting middlewares in outer-to-inner order.
#[derive(Default)]
pub struct RunnerChain {
    middlewares: Vec<Box<dyn Middleware>>,
}

impl RunnerChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware inside the ones already added.
    pub fn with<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.middlewares.push(Box::new(middleware));
        self
    }

    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Materialize the chain. The result is immutable and may be shared.
    pub fn build(self) -> Arc<dyn Runner> {
        chain(self.middlewares)
    }
}

impl std::fmt::Debug for RunnerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunnerChain")
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}
