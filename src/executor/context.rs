//! Per-invocation-tree execution context.

use std::fmt;
use std::sync::Arc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::Executor;
use crate::database::{ClientGuard, DatabaseHandle, TxGuard};
use crate::error::{ExecutionError, Result};
use crate::events::{EventStore, UnconfiguredEventStore};
use crate::invoker::events::{EventCollector, TreeScope};
use crate::invoker::{execute_cancellable, Pipeline};
use crate::permission::{DenyAll, PermissionChecker, PermissionRequest};
use crate::repository::Repositories;

/// Everything a running executor can reach: the database handle, the pipeline
/// that nested invocations re-enter, and the injected collaborators.
///
/// One context lives for exactly one invocation tree. Nested calls mutate it in
/// place (binding a transaction, registering events) and never replace it.
pub struct ExecutionContext {
    db: DatabaseHandle,
    pipeline: Option<Arc<Pipeline>>,
    permission_checker: Arc<dyn PermissionChecker>,
    event_store: Arc<dyn EventStore>,
    repositories: Repositories,
    invocation_id: Uuid,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
    scope: Option<TreeScope>,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("invocation_id", &self.invocation_id)
            .field("db", &self.db)
            .field("pipeline", &self.pipeline)
            .field("repositories", &self.repositories)
            .field("deadline", &self.deadline)
            .field("in_tree", &self.scope.is_some())
            .finish()
    }
}

impl ExecutionContext {
    /// A bare context without a pipeline: `invoke` calls `execute` directly.
    pub fn new(db: DatabaseHandle) -> Self {
        Self {
            db,
            pipeline: None,
            permission_checker: Arc::new(DenyAll),
            event_store: Arc::new(UnconfiguredEventStore),
            repositories: Repositories::new(),
            invocation_id: Uuid::new_v4(),
            cancellation: CancellationToken::new(),
            deadline: None,
            scope: None,
        }
    }

    pub fn with_pipeline(mut self, pipeline: Arc<Pipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn with_permission_checker(mut self, checker: Arc<dyn PermissionChecker>) -> Self {
        self.permission_checker = checker;
        self
    }

    pub fn with_event_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.event_store = store;
        self
    }

    pub fn with_repositories(mut self, repositories: Repositories) -> Self {
        self.repositories = repositories;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_deadline(mut self, deadline: Option<Instant>) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn db(&self) -> &DatabaseHandle {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut DatabaseHandle {
        &mut self.db
    }

    pub fn pipeline(&self) -> Option<&Arc<Pipeline>> {
        self.pipeline.as_ref()
    }

    pub fn invocation_id(&self) -> Uuid {
        self.invocation_id
    }

    pub fn event_store(&self) -> Arc<dyn EventStore> {
        Arc::clone(&self.event_store)
    }

    pub async fn check_permission(&self, request: &PermissionRequest) -> Result<()> {
        self.permission_checker.check(request).await
    }

    pub fn repository<R>(&self) -> Option<Arc<R>>
    where
        R: ?Sized + Send + Sync + 'static,
    {
        self.repositories.get::<R>()
    }

    /// Fails with the repository type name when nothing is bound, for use with `?`
    pub fn require_repository<R>(&self) -> Result<Arc<R>>
    where
        R: ?Sized + Send + Sync + 'static,
    {
        self.repository::<R>().ok_or_else(|| {
            ExecutionError::Configuration(format!(
                "no repository bound for {}",
                std::any::type_name::<R>()
            ))
        })
    }

    pub fn repositories_mut(&mut self) -> &mut Repositories {
        &mut self.repositories
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// `Err` once the tree was cancelled or its deadline passed
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancellation.is_cancelled() {
            return Err(ExecutionError::Cancelled);
        }
        if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
            return Err(ExecutionError::DeadlineExceeded);
        }
        Ok(())
    }

    /// See [`DatabaseHandle::ensure_tx`].
    ///
    /// Inside an invocation tree the tree root owns whatever gets opened, so
    /// callers always receive [`TxGuard::Noop`] there.
    pub async fn ensure_tx(&mut self) -> Result<TxGuard> {
        let guard = self.db.ensure_tx().await?;
        match self.scope.as_mut() {
            Some(scope) => {
                scope.adopt(guard);
                Ok(TxGuard::Noop)
            }
            None => Ok(guard),
        }
    }

    pub async fn end_tx(&mut self, guard: TxGuard, result: Result<()>) -> Result<()> {
        guard.end(&mut self.db, result).await
    }

    /// See [`DatabaseHandle::ensure_client`]. Inside an invocation tree the
    /// lease is released by the tree root after the transaction ended.
    pub async fn ensure_client(&mut self) -> Result<ClientGuard> {
        let guard = self.db.ensure_client().await?;
        match self.scope.as_mut() {
            Some(scope) => {
                scope.adopt_client(guard);
                Ok(ClientGuard::Noop)
            }
            None => Ok(guard),
        }
    }

    pub async fn release_client(&mut self, guard: ClientGuard) -> Result<()> {
        guard.release(&mut self.db).await
    }

    /// Run `executor` through the bound pipeline, sharing this context's
    /// transaction and event collection. Without a pipeline the executor is
    /// executed directly.
    pub async fn invoke(&mut self, executor: &mut dyn Executor) -> Result<()> {
        self.check_cancelled()?;
        match self.pipeline.clone() {
            Some(pipeline) => pipeline.invoke(executor, self).await,
            None => execute_cancellable(executor, self).await,
        }
    }

    pub(crate) fn in_tree(&self) -> bool {
        self.scope.is_some()
    }

    pub(crate) fn open_tree(&mut self) {
        self.scope.get_or_insert_with(TreeScope::default);
    }

    pub(crate) fn close_tree(&mut self) -> TreeScope {
        self.scope.take().unwrap_or_default()
    }

    pub(crate) fn collector_mut(&mut self) -> &mut EventCollector {
        self.scope
            .get_or_insert_with(TreeScope::default)
            .collector_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{DbOperation, Journal, RecordingPool, ScriptedCommand};
    use std::time::Duration;

    fn context(pool: &RecordingPool) -> ExecutionContext {
        ExecutionContext::new(DatabaseHandle::new(pool.clone().into_pool()))
    }

    #[tokio::test]
    async fn test_invoke_without_pipeline_executes_directly() {
        let pool = RecordingPool::new();
        let journal = Journal::new();
        let mut ctx = context(&pool);
        let mut command = ScriptedCommand::new("add-org", &journal);

        ctx.invoke(&mut command).await.unwrap();

        // no validation stage, so only execute runs
        assert_eq!(journal.entries(), vec!["add-org:execute"]);
        assert!(pool.operations().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_context_refuses_to_invoke() {
        let pool = RecordingPool::new();
        let journal = Journal::new();
        let token = CancellationToken::new();
        token.cancel();
        let mut ctx = context(&pool).with_cancellation(token);

        let err = ctx
            .invoke(&mut ScriptedCommand::new("add-org", &journal))
            .await
            .unwrap_err();

        assert_eq!(err, ExecutionError::Cancelled);
        assert!(journal.entries().is_empty());
    }

    #[tokio::test]
    async fn test_passed_deadline_refuses_to_invoke() {
        let pool = RecordingPool::new();
        let journal = Journal::new();
        let mut ctx = context(&pool).with_deadline(Some(Instant::now() - Duration::from_millis(1)));

        let err = ctx
            .invoke(&mut ScriptedCommand::new("add-org", &journal))
            .await
            .unwrap_err();
        assert_eq!(err, ExecutionError::DeadlineExceeded);
    }

    #[tokio::test]
    async fn test_ensure_tx_without_tree_returns_owner() {
        let pool = RecordingPool::new();
        let mut ctx = context(&pool);

        let guard = ctx.ensure_tx().await.unwrap();
        assert!(guard.is_owner());
        ctx.end_tx(guard, Ok(())).await.unwrap();

        assert_eq!(pool.operations(), vec![DbOperation::Begin, DbOperation::Commit]);
    }

    #[tokio::test]
    async fn test_tree_owns_transaction_opened_inside_it() {
        let pool = RecordingPool::new();
        let mut ctx = context(&pool);
        ctx.open_tree();

        let guard = ctx.ensure_tx().await.unwrap();
        assert_eq!(guard, TxGuard::Noop);
        ctx.end_tx(guard, Ok(())).await.unwrap();
        assert!(ctx.db().in_transaction());

        let scope = ctx.close_tree();
        assert!(scope.owns_transaction());
        scope.end(&mut ctx, Ok(())).await.unwrap();
        assert_eq!(pool.operations(), vec![DbOperation::Begin, DbOperation::Commit]);
    }

    #[tokio::test]
    async fn test_tree_releases_client_leased_inside_it() {
        let pool = RecordingPool::new();
        let mut ctx = context(&pool);
        ctx.open_tree();

        let client = ctx.ensure_client().await.unwrap();
        assert_eq!(client, ClientGuard::Noop);
        let tx = ctx.ensure_tx().await.unwrap();
        ctx.release_client(client).await.unwrap();
        ctx.end_tx(tx, Ok(())).await.unwrap();
        assert!(ctx.db().in_transaction());

        ctx.close_tree().end(&mut ctx, Ok(())).await.unwrap();
        assert_eq!(
            pool.operations(),
            vec![
                DbOperation::Acquire,
                DbOperation::Begin,
                DbOperation::Commit,
                DbOperation::Release
            ]
        );
    }

    #[tokio::test]
    async fn test_require_repository_names_missing_type() {
        let pool = RecordingPool::new();
        let ctx = context(&pool);

        let err = ctx.require_repository::<String>().unwrap_err();
        assert!(err.to_string().contains("String"));
    }
}
