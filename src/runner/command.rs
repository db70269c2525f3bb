//! Terminal runner that executes the unit of work.

use async_trait::async_trait;
use tracing::debug;

use super::{Runner, Work};
use crate::context::Context;
use crate::error::{AdmissionError, Result};

/// The last link of every chain: runs the work unless the context is
/// already cancelled.
#[derive(Debug, Clone, Copy, Default)]
pub struct Command;

#[async_trait]
impl Runner for Command {
    async fn run(&self, ctx: &Context, work: Work<'_>) -> Result<()> {
        // Cancellation is only checked here, once, right before the work.
        if ctx.is_cancelled() {
            debug!("Context cancelled before execution");
            return Err(AdmissionError::ContextCancelled);
        }

        work.invoke(ctx.clone()).await
    }
}
