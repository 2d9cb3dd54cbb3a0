//! # Invocation Pipeline
//!
//! An ordered list of [`Stage`]s around the terminal `execute` call. Each
//! stage receives a [`Next`] handle for the rest of the chain and decides
//! whether (and how) to continue; returning without calling it short-circuits
//! everything inward, including `execute`.
//!
//! The default chain, outer to inner:
//!
//! ```text
//! events → logging → trace → validation → transaction → execute
//! ```
//!
//! Nested invocations through [`ExecutionContext::invoke`] re-enter the same
//! pipeline from the top, so every sub-command gets the full treatment while
//! sharing the tree's transaction and event collector.

pub mod events;
pub mod logging;
pub mod trace;
pub mod transaction;
pub mod validation;

use async_trait::async_trait;
use futures::future::BoxFuture;
use std::fmt;
use std::sync::Arc;
use tokio::time::sleep_until;

use crate::config::PipelineConfig;
use crate::error::{ExecutionError, Result};
use crate::executor::{ExecutionContext, Executor};

pub use events::EventStage;
pub use logging::LoggingStage;
pub use trace::TraceStage;
pub use transaction::TransactionStage;
pub use validation::ValidationStage;

pub const DEFAULT_TRACER_NAME: &str = "iam-core";

/// One cross-cutting concern wrapped around execution
#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(
        &self,
        executor: &mut dyn Executor,
        ctx: &mut ExecutionContext,
        next: Next<'_>,
    ) -> Result<()>;
}

/// The remainder of the pipeline after the current stage
#[derive(Clone, Copy)]
pub struct Next<'a> {
    stages: &'a [Arc<dyn Stage>],
}

impl<'a> Next<'a> {
    pub fn run<'f>(
        self,
        executor: &'f mut dyn Executor,
        ctx: &'f mut ExecutionContext,
    ) -> BoxFuture<'f, Result<()>>
    where
        'a: 'f,
    {
        match self.stages.split_first() {
            Some((stage, rest)) => stage.handle(executor, ctx, Next { stages: rest }),
            None => Box::pin(execute_cancellable(executor, ctx)),
        }
    }
}

/// The terminal step: `execute`, abandoned as soon as the tree is cancelled
/// or its deadline passes.
pub(crate) async fn execute_cancellable(
    executor: &mut dyn Executor,
    ctx: &mut ExecutionContext,
) -> Result<()> {
    let cancellation = ctx.cancellation().clone();
    let deadline = ctx.deadline();

    let expired = async move {
        match deadline {
            Some(deadline) => sleep_until(deadline).await,
            None => std::future::pending::<()>().await,
        }
    };

    tokio::select! {
        biased;
        () = cancellation.cancelled() => Err(ExecutionError::Cancelled),
        () = expired => Err(ExecutionError::DeadlineExceeded),
        result = executor.execute(ctx) => result,
    }
}

pub struct Pipeline {
    stages: Vec<Arc<dyn Stage>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("stages", &self.stage_names())
            .finish()
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::default_chain()
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// No stages at all: `invoke` only executes
    pub fn empty() -> Self {
        Self { stages: Vec::new() }
    }

    pub fn default_chain() -> Self {
        Self::from_config(&PipelineConfig::default())
    }

    /// The default chain minus the observability stages the config disables
    pub fn from_config(config: &PipelineConfig) -> Self {
        let mut builder = Self::builder().stage(EventStage);
        if config.logging_enabled {
            builder = builder.stage(LoggingStage);
        }
        if config.tracing_enabled {
            builder = builder.stage(TraceStage::global(config.tracer_name.clone()));
        }
        builder.stage(ValidationStage).stage(TransactionStage).build()
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|stage| stage.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub async fn invoke(
        &self,
        executor: &mut dyn Executor,
        ctx: &mut ExecutionContext,
    ) -> Result<()> {
        Next {
            stages: &self.stages,
        }
        .run(executor, ctx)
        .await
    }
}

#[derive(Default)]
pub struct PipelineBuilder {
    stages: Vec<Arc<dyn Stage>>,
}

impl PipelineBuilder {
    /// Append a stage inside the ones added before it
    pub fn stage(mut self, stage: impl Stage + 'static) -> Self {
        self.stages.push(Arc::new(stage));
        self
    }

    /// Append a stage instance that other pipelines hold as well
    pub fn shared_stage(mut self, stage: Arc<dyn Stage>) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            stages: self.stages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseHandle;
    use crate::test_helpers::{Journal, RecordingPool, ScriptedCommand};

    struct Recording {
        label: &'static str,
        journal: Journal,
    }

    #[async_trait]
    impl Stage for Recording {
        fn name(&self) -> &'static str {
            self.label
        }

        async fn handle(
            &self,
            executor: &mut dyn Executor,
            ctx: &mut ExecutionContext,
            next: Next<'_>,
        ) -> Result<()> {
            self.journal.record(format!("{}:enter", self.label));
            let result = next.run(executor, ctx).await;
            self.journal.record(format!("{}:leave", self.label));
            result
        }
    }

    struct ShortCircuit;

    #[async_trait]
    impl Stage for ShortCircuit {
        fn name(&self) -> &'static str {
            "short-circuit"
        }

        async fn handle(
            &self,
            _executor: &mut dyn Executor,
            _ctx: &mut ExecutionContext,
            _next: Next<'_>,
        ) -> Result<()> {
            Err(ExecutionError::Validation("stopped".to_string()))
        }
    }

    fn context(pipeline: Pipeline) -> ExecutionContext {
        ExecutionContext::new(DatabaseHandle::new(RecordingPool::new().into_pool()))
            .with_pipeline(Arc::new(pipeline))
    }

    #[test]
    fn test_default_chain_order() {
        assert_eq!(
            Pipeline::default_chain().stage_names(),
            vec!["events", "logging", "trace", "validation", "transaction"]
        );
    }

    #[test]
    fn test_from_config_drops_disabled_stages() {
        let config = PipelineConfig {
            tracing_enabled: false,
            logging_enabled: false,
            ..PipelineConfig::default()
        };
        assert_eq!(
            Pipeline::from_config(&config).stage_names(),
            vec!["events", "validation", "transaction"]
        );
    }

    #[tokio::test]
    async fn test_stages_wrap_in_order() {
        let journal = Journal::new();
        let pipeline = Pipeline::builder()
            .stage(Recording {
                label: "outer",
                journal: journal.clone(),
            })
            .stage(Recording {
                label: "inner",
                journal: journal.clone(),
            })
            .build();
        let mut ctx = context(pipeline);

        ctx.invoke(&mut ScriptedCommand::new("cmd", &journal))
            .await
            .unwrap();

        assert_eq!(
            journal.entries(),
            vec![
                "outer:enter",
                "inner:enter",
                "cmd:execute",
                "inner:leave",
                "outer:leave"
            ]
        );
    }

    #[tokio::test]
    async fn test_shared_stage_runs_in_every_pipeline() {
        let journal = Journal::new();
        let audit: Arc<dyn Stage> = Arc::new(Recording {
            label: "audit",
            journal: journal.clone(),
        });
        let plain = Pipeline::builder().shared_stage(Arc::clone(&audit)).build();
        let guarded = Pipeline::builder()
            .shared_stage(Arc::clone(&audit))
            .stage(ShortCircuit)
            .build();
        assert_eq!(guarded.stage_names(), vec!["audit", "short-circuit"]);

        context(plain)
            .invoke(&mut ScriptedCommand::new("cmd", &journal))
            .await
            .unwrap();
        context(guarded)
            .invoke(&mut ScriptedCommand::new("cmd", &journal))
            .await
            .unwrap_err();

        assert_eq!(
            journal.entries(),
            vec!["audit:enter", "cmd:execute", "audit:leave", "audit:enter", "audit:leave"]
        );
    }

    #[tokio::test]
    async fn test_short_circuit_skips_execute() {
        let journal = Journal::new();
        let mut ctx = context(Pipeline::builder().stage(ShortCircuit).build());

        let err = ctx
            .invoke(&mut ScriptedCommand::new("cmd", &journal))
            .await
            .unwrap_err();

        assert_eq!(err, ExecutionError::Validation("stopped".to_string()));
        assert!(journal.entries().is_empty());
    }

    #[tokio::test]
    async fn test_empty_pipeline_only_executes() {
        let journal = Journal::new();
        let pipeline = Pipeline::empty();
        assert!(pipeline.is_empty());
        let mut ctx = context(pipeline);

        ctx.invoke(&mut ScriptedCommand::new("cmd", &journal))
            .await
            .unwrap();
        assert_eq!(journal.entries(), vec!["cmd:execute"]);
    }
}
