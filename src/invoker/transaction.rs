use async_trait::async_trait;

use super::{Next, Stage};
use crate::error::Result;
use crate::executor::{ExecutionContext, Executor};

/// Guarantees a transaction around the subtree of a transactional executor.
///
/// Inside a tree scope the opened transaction belongs to the tree and is ended
/// once by the tree root after the event flush. Without one, this stage ends
/// the transaction itself with the subtree's result.
#[derive(Debug, Default, Clone, Copy)]
pub struct TransactionStage;

#[async_trait]
impl Stage for TransactionStage {
    fn name(&self) -> &'static str {
        "transaction"
    }

    async fn handle(
        &self,
        executor: &mut dyn Executor,
        ctx: &mut ExecutionContext,
        next: Next<'_>,
    ) -> Result<()> {
        if !executor.is_transactional() {
            return next.run(executor, ctx).await;
        }

        // a no-op guard inside a tree scope, so ending it passes the result through
        let guard = ctx.ensure_tx().await?;
        let result = next.run(executor, ctx).await;
        ctx.end_tx(guard, result).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::DatabaseHandle;
    use crate::error::ExecutionError;
    use crate::invoker::Pipeline;
    use crate::test_helpers::{DbOperation, Journal, Phase, RecordingPool, ScriptedCommand};
    use std::sync::Arc;

    fn context(pool: &RecordingPool) -> ExecutionContext {
        ExecutionContext::new(DatabaseHandle::new(pool.clone().into_pool()))
            .with_pipeline(Arc::new(Pipeline::builder().stage(TransactionStage).build()))
    }

    #[tokio::test]
    async fn test_non_transactional_passes_through() {
        let pool = RecordingPool::new();
        let journal = Journal::new();

        context(&pool)
            .invoke(&mut ScriptedCommand::new("cmd", &journal))
            .await
            .unwrap();

        assert!(pool.operations().is_empty());
    }

    #[tokio::test]
    async fn test_commits_on_success() {
        let pool = RecordingPool::new();
        let journal = Journal::new();

        context(&pool)
            .invoke(&mut ScriptedCommand::new("cmd", &journal).transactional())
            .await
            .unwrap();

        assert_eq!(pool.operations(), vec![DbOperation::Begin, DbOperation::Commit]);
    }

    #[tokio::test]
    async fn test_rolls_back_with_cause() {
        let pool = RecordingPool::new();
        let journal = Journal::new();

        let err = context(&pool)
            .invoke(
                &mut ScriptedCommand::new("cmd", &journal)
                    .transactional()
                    .failing_at(Phase::Execute),
            )
            .await
            .unwrap_err();

        assert_eq!(err, ExecutionError::Execution("cmd failed".to_string()));
        assert_eq!(pool.operations(), vec![DbOperation::Begin, DbOperation::Rollback]);
    }

    #[tokio::test]
    async fn test_nested_transactional_reuses_outer() {
        let pool = RecordingPool::new();
        let journal = Journal::new();
        let child = ScriptedCommand::new("child", &journal).transactional();

        context(&pool)
            .invoke(
                &mut ScriptedCommand::new("parent", &journal)
                    .transactional()
                    .invoking(child),
            )
            .await
            .unwrap();

        assert_eq!(pool.operations(), vec![DbOperation::Begin, DbOperation::Commit]);
        assert_eq!(journal.entries(), vec!["child:execute", "parent:execute"]);
    }

    #[tokio::test]
    async fn test_begin_failure_skips_execute() {
        let pool = RecordingPool::new().fail_begin("no connections");
        let journal = Journal::new();

        let err = context(&pool)
            .invoke(&mut ScriptedCommand::new("cmd", &journal).transactional())
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::Database(_)));
        assert!(journal.entries().is_empty());
    }
}
