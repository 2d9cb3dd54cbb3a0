use async_trait::async_trait;
use std::time::Instant;
use tracing::{debug, error, info};

use super::{Next, Stage};
use crate::error::Result;
use crate::executor::{ExecutionContext, Executor};

/// Logs start, then success or failure with the elapsed time
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingStage;

#[async_trait]
impl Stage for LoggingStage {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn handle(
        &self,
        executor: &mut dyn Executor,
        ctx: &mut ExecutionContext,
        next: Next<'_>,
    ) -> Result<()> {
        let name = executor.name();
        let invocation_id = ctx.invocation_id();
        let started = Instant::now();

        debug!(executor = %name, invocation_id = %invocation_id, "Invocation started");

        let result = next.run(executor, ctx).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(()) => info!(
                executor = %name,
                invocation_id = %invocation_id,
                elapsed_ms,
                "Invocation succeeded"
            ),
            Err(err) => error!(
                executor = %name,
                invocation_id = %invocation_id,
                elapsed_ms,
                error = %err,
                "Invocation failed"
            ),
        }

        result
    }
}
