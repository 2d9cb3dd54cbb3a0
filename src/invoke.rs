//! Top-level entry points: [`invoke`] for commands and batches, [`query`] for
//! queriers.
//!
//! ```rust,no_run
//! use iam_core::{invoke, InvokeOptions, PgDatabase, PgEventStore};
//! use iam_core::config::CoreConfig;
//! use std::sync::Arc;
//!
//! # async fn example(command: &mut dyn iam_core::Executor) -> iam_core::Result<()> {
//! let config = CoreConfig::load()?;
//! let database = PgDatabase::connect(&config.database).await?;
//!
//! let options = InvokeOptions::new(database.into_pool())
//!     .with_event_store(Arc::new(PgEventStore));
//! invoke(command, options).await
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::database::{DatabaseHandle, Pool};
use crate::error::{ExecutionError, Result};
use crate::events::{EventStore, UnconfiguredEventStore};
use crate::executor::{ExecutionContext, Executor, Querier};
use crate::invoker::Pipeline;
use crate::permission::{DenyAll, PermissionChecker};
use crate::repository::Repositories;

/// Collaborators for one top-level invocation.
///
/// Defaults: the default pipeline, a permission checker denying everything,
/// an event store refusing every flush, a fresh cancellation token and no
/// deadline.
pub struct InvokeOptions {
    db: DatabaseHandle,
    pipeline: Option<Arc<Pipeline>>,
    event_store: Arc<dyn EventStore>,
    permission_checker: Arc<dyn PermissionChecker>,
    repositories: Repositories,
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl InvokeOptions {
    pub fn new(pool: Arc<dyn Pool>) -> Self {
        Self::with_handle(DatabaseHandle::new(pool))
    }

    /// Start from an existing handle, e.g. one already scoped to a client
    pub fn with_handle(db: DatabaseHandle) -> Self {
        Self {
            db,
            pipeline: Some(Arc::new(Pipeline::default_chain())),
            event_store: Arc::new(UnconfiguredEventStore),
            permission_checker: Arc::new(DenyAll),
            repositories: Repositories::new(),
            cancellation: CancellationToken::new(),
            deadline: None,
        }
    }

    pub fn with_pipeline(self, pipeline: Pipeline) -> Self {
        self.with_shared_pipeline(Arc::new(pipeline))
    }

    pub fn with_shared_pipeline(mut self, pipeline: Arc<Pipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    /// Every invocation calls `execute` directly
    pub fn without_pipeline(mut self) -> Self {
        self.pipeline = None;
        self
    }

    pub fn with_event_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.event_store = store;
        self
    }

    pub fn with_permission_checker(mut self, checker: Arc<dyn PermissionChecker>) -> Self {
        self.permission_checker = checker;
        self
    }

    pub fn with_repository<R>(mut self, repository: Arc<R>) -> Self
    where
        R: ?Sized + Send + Sync + 'static,
    {
        self.repositories.insert(repository);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn into_context(self) -> ExecutionContext {
        let ctx = ExecutionContext::new(self.db)
            .with_permission_checker(self.permission_checker)
            .with_event_store(self.event_store)
            .with_repositories(self.repositories)
            .with_cancellation(self.cancellation)
            .with_deadline(self.deadline);
        match self.pipeline {
            Some(pipeline) => ctx.with_pipeline(pipeline),
            None => ctx,
        }
    }
}

/// Run `executor` as the root of a new invocation tree
pub async fn invoke(executor: &mut dyn Executor, options: InvokeOptions) -> Result<()> {
    let mut ctx = options.into_context();
    ctx.invoke(executor).await
}

/// Run `querier` as the root of a new invocation tree and take its result
pub async fn query<T, Q>(querier: &mut Q, options: InvokeOptions) -> Result<T>
where
    Q: Querier<T>,
{
    invoke(querier, options).await?;
    querier
        .take_result()
        .ok_or_else(|| ExecutionError::MissingResult(querier.name()))
}

impl std::fmt::Debug for InvokeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InvokeOptions")
            .field("db", &self.db)
            .field("pipeline", &self.pipeline)
            .field("deadline", &self.deadline)
            .finish_non_exhaustive()
    }
}
