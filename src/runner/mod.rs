//! Runners execute a unit of work under an execution context.
//!
//! A [`Runner`] is the capability "run this work under this context". A
//! [`Middleware`] turns one runner into another, and [`chain`] composes an
//! ordered list of middlewares around the terminal [`Command`] runner:
//!
//! ```rust
//! use admission::runner::{RunnerChain, Work};
//! use admission::Context;
//!
//! # tokio_test::block_on(async {
//! let runner = RunnerChain::new().build();
//! let result = runner
//!     .run(&Context::background(), Work::new(|_ctx| async { Ok(()) }))
//!     .await;
//! assert!(result.is_ok());
//! # });
//! ```

mod chain;
mod command;

pub use chain::{chain, single, Middleware, RunnerChain};
pub use command::Command;

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use std::future::Future;

use crate::context::Context;
use crate::error::Result;

/// Future returned by a unit of work.
pub type WorkFuture<'a> = BoxFuture<'a, Result<()>>;

/// A caller-supplied unit of work, invoked at most once.
pub struct Work<'a> {
    f: Box<dyn FnOnce(Context) -> WorkFuture<'a> + Send + 'a>,
}

impl<'a> Work<'a> {
    /// Wrap an async function of the execution context.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: FnOnce(Context) -> Fut + Send + 'a,
        Fut: Future<Output = Result<()>> + Send + 'a,
    {
        Self {
            f: Box::new(move |ctx| f(ctx).boxed()),
        }
    }

    /// Run the work.
    pub fn invoke(self, ctx: Context) -> WorkFuture<'a> {
        (self.f)(ctx)
    }
}

impl std::fmt::Debug for Work<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Work")
    }
}

/// The capability to execute a unit of work under a context.
///
/// Errors from the work itself are returned unchanged.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run `work` under `ctx`.
    async fn run(&self, ctx: &Context, work: Work<'_>) -> Result<()>;
}

/// Adapter letting a plain function satisfy [`Runner`].
///
/// ```rust
/// use admission::runner::RunnerFn;
///
/// let passthrough = RunnerFn::new(|ctx, work| work.invoke(ctx));
/// # let _ = passthrough;
/// ```
pub struct RunnerFn<F> {
    f: F,
}

impl<F> RunnerFn<F>
where
    F: for<'w> Fn(Context, Work<'w>) -> WorkFuture<'w> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

#[async_trait]
impl<F> Runner for RunnerFn<F>
where
    F: for<'w> Fn(Context, Work<'w>) -> WorkFuture<'w> + Send + Sync,
{
    async fn run(&self, ctx: &Context, work: Work<'_>) -> Result<()> {
        (self.f)(ctx.clone(), work).await
    }
}

impl<F> std::fmt::Debug for RunnerFn<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("RunnerFn")
    }
}
