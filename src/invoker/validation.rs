use async_trait::async_trait;
use tracing::debug;

use super::{Next, Stage};
use crate::error::Result;
use crate::executor::{ExecutionContext, Executor};

/// Runs `validate` ahead of everything inward; a failure means `execute`
/// never runs for this executor.
#[derive(Debug, Default, Clone, Copy)]
pub struct ValidationStage;

#[async_trait]
impl Stage for ValidationStage {
    fn name(&self) -> &'static str {
        "validation"
    }

    async fn handle(
        &self,
        executor: &mut dyn Executor,
        ctx: &mut ExecutionContext,
        next: Next<'_>,
    ) -> Result<()> {
        let validated = match executor.as_validator() {
            Some(validator) => validator.validate(ctx).await,
            None => Ok(()),
        };
        if let Err(err) = validated {
            debug!(executor = %executor.name(), error = %err, "Validation rejected executor");
            return Err(err);
        }
        next.run(executor, ctx).await
    }
}
