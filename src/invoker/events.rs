//! Event collection and the single flush per invocation tree.
//!
//! The outermost call through [`EventStage`] opens a [`TreeScope`]. Every
//! event producer below it, however deep and whether reached directly, through
//! a batch or from another executor's `execute`, contributes to the scope's
//! [`EventCollector`]. When the root returns successfully the collected events
//! are pushed in one call, inside the transaction the scope owns, and only then
//! is that transaction ended.
//!
//! Ordering is causal pre-order: a producer's own events come before the events
//! of every producer it invoked, and siblings keep invocation order. Because a
//! producer's `events` is consulted only after its `execute` (and therefore all
//! of its children) returned, each producer gets a frame on an explicit stack
//! that buffers its descendants' events until its own are known.

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Next, Stage};
use crate::database::{ClientGuard, TxGuard};
use crate::error::{ExecutionError, Result};
use crate::events::DomainEvent;
use crate::executor::{ExecutionContext, Executor};

#[derive(Debug, Default, Clone, Copy)]
pub struct EventStage;

#[async_trait]
impl Stage for EventStage {
    fn name(&self) -> &'static str {
        "events"
    }

    async fn handle(
        &self,
        executor: &mut dyn Executor,
        ctx: &mut ExecutionContext,
        next: Next<'_>,
    ) -> Result<()> {
        if ctx.in_tree() {
            return collect(executor, ctx, next).await;
        }

        ctx.open_tree();
        let result = collect(executor, ctx, next).await;
        let scope = ctx.close_tree();
        scope.end(ctx, result).await
    }
}

async fn collect(
    executor: &mut dyn Executor,
    ctx: &mut ExecutionContext,
    next: Next<'_>,
) -> Result<()> {
    if executor.as_event_producer().is_none() {
        return next.run(executor, ctx).await;
    }

    // collect only runs inside a scope, which takes over the transaction
    let _ = ctx.ensure_tx().await?;

    ctx.collector_mut().enter();
    match produce(executor, ctx, next).await {
        Ok(own) => {
            ctx.collector_mut().leave(own);
            Ok(())
        }
        Err(err) => {
            ctx.collector_mut().abandon();
            Err(err)
        }
    }
}

async fn produce(
    executor: &mut dyn Executor,
    ctx: &mut ExecutionContext,
    next: Next<'_>,
) -> Result<Vec<DomainEvent>> {
    next.run(executor, ctx).await?;
    match executor.as_event_producer() {
        Some(producer) => producer.events(ctx).await,
        None => Ok(Vec::new()),
    }
}

/// Per-tree state shared by every nested invocation
#[derive(Debug, Default)]
pub struct TreeScope {
    collector: EventCollector,
    tx: Option<TxGuard>,
    client: Option<ClientGuard>,
}

impl TreeScope {
    /// Take over ending a transaction opened inside the tree
    pub(crate) fn adopt(&mut self, guard: TxGuard) {
        if guard.is_owner() && self.tx.is_none() {
            self.tx = Some(guard);
        }
    }

    /// Take over releasing a client leased inside the tree
    pub(crate) fn adopt_client(&mut self, guard: ClientGuard) {
        if guard.is_owner() && self.client.is_none() {
            self.client = Some(guard);
        }
    }

    pub(crate) fn collector_mut(&mut self) -> &mut EventCollector {
        &mut self.collector
    }

    pub fn owns_transaction(&self) -> bool {
        self.tx.is_some()
    }

    /// Flush on success, end the owned transaction with the final outcome,
    /// then release the owned client.
    pub(crate) async fn end(self, ctx: &mut ExecutionContext, result: Result<()>) -> Result<()> {
        let TreeScope {
            collector,
            tx,
            client,
        } = self;

        let result = match result {
            Ok(()) if tx.is_some() && !ctx.db().in_transaction() => {
                warn!(
                    invocation_id = %ctx.invocation_id(),
                    "Transaction of invocation tree ended before its events were flushed"
                );
                Err(ExecutionError::Database(
                    "transaction ended before the invocation tree finished".to_string(),
                ))
            }
            Ok(()) => flush(ctx, collector.into_events()).await,
            Err(err) => {
                if !collector.is_empty() {
                    debug!(
                        discarded = collector.len(),
                        "Discarding collected events of failed invocation"
                    );
                }
                Err(err)
            }
        };

        let result = match tx {
            Some(guard) => ctx.end_tx(guard, result).await,
            None => result,
        };

        match client {
            Some(guard) => {
                let released = ctx.release_client(guard).await;
                result.and(released)
            }
            None => result,
        }
    }
}

async fn flush(ctx: &mut ExecutionContext, events: Vec<DomainEvent>) -> Result<()> {
    if events.is_empty() {
        return Ok(());
    }
    let store = ctx.event_store();
    store.push(ctx.db_mut(), &events).await?;
    debug!(
        invocation_id = %ctx.invocation_id(),
        events = events.len(),
        "Flushed collected events"
    );
    Ok(())
}

/// Explicit frame stack turning post-order event production into pre-order.
#[derive(Debug, Default)]
pub struct EventCollector {
    /// One buffer per producer currently executing, innermost last
    frames: Vec<Vec<DomainEvent>>,
    collected: Vec<DomainEvent>,
}

impl EventCollector {
    /// A producer starts; its descendants' events land in the new frame
    pub fn enter(&mut self) {
        self.frames.push(Vec::new());
    }

    /// The innermost producer succeeded with `own` events.
    pub fn leave(&mut self, own: Vec<DomainEvent>) {
        let descendants = self.frames.pop().unwrap_or_default();
        let mut merged = own;
        merged.extend(descendants);

        match self.frames.last_mut() {
            Some(parent) => parent.extend(merged),
            None => self.collected.extend(merged),
        }
    }

    /// The innermost producer failed: drop everything its subtree produced
    pub fn abandon(&mut self) {
        self.frames.pop();
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Events ready to be flushed
    pub fn len(&self) -> usize {
        self.collected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collected.is_empty()
    }

    pub fn into_events(self) -> Vec<DomainEvent> {
        self.collected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{DatabaseHandle, HandleShape};
    use crate::error::ExecutionError;
    use crate::events::Aggregate;
    use crate::invoker::Pipeline;
    use crate::test_helpers::{
        event, DbOperation, Journal, Phase, RecordingEventStore, RecordingPool, ScriptedCommand,
    };
    use std::sync::Arc;

    fn types(events: &[DomainEvent]) -> Vec<&str> {
        events.iter().map(|e| e.event_type()).collect()
    }

    fn named(event_type: &str) -> DomainEvent {
        DomainEvent::new(Aggregate::new("i", "o", "t", "1"), event_type)
    }

    fn context(pool: &RecordingPool, store: &RecordingEventStore) -> ExecutionContext {
        ExecutionContext::new(DatabaseHandle::new(pool.clone().into_pool()))
            .with_pipeline(Arc::new(Pipeline::builder().stage(EventStage).build()))
            .with_event_store(Arc::new(store.clone()))
    }

    #[test]
    fn test_collector_orders_parent_before_children() {
        let mut collector = EventCollector::default();

        collector.enter(); // parent
        collector.enter(); // first child
        collector.enter(); // grandchild
        collector.leave(vec![named("grandchild")]);
        collector.leave(vec![named("child-1")]);
        collector.enter(); // second child
        collector.leave(vec![named("child-2")]);
        assert_eq!(collector.depth(), 1);
        collector.leave(vec![named("parent")]);

        assert_eq!(collector.depth(), 0);
        assert_eq!(
            types(&collector.into_events()),
            vec!["parent", "child-1", "grandchild", "child-2"]
        );
    }

    #[test]
    fn test_abandoned_frame_drops_subtree() {
        let mut collector = EventCollector::default();

        collector.enter();
        collector.enter();
        collector.leave(vec![named("child")]);
        collector.abandon();
        collector.enter();
        collector.leave(vec![named("sibling")]);

        assert_eq!(types(&collector.into_events()), vec!["sibling"]);
    }

    #[tokio::test]
    async fn test_single_flush_inside_transaction() {
        let pool = RecordingPool::new();
        let store = RecordingEventStore::new();
        let journal = Journal::new();

        let child = ScriptedCommand::new("child", &journal).emitting(vec![event("child.added")]);
        let mut parent = ScriptedCommand::new("parent", &journal)
            .emitting(vec![event("parent.added")])
            .invoking(child);

        context(&pool, &store).invoke(&mut parent).await.unwrap();

        assert_eq!(store.push_count(), 1);
        assert_eq!(types(&store.events()), vec!["parent.added", "child.added"]);
        assert_eq!(store.shapes(), vec![HandleShape::Transaction]);
        assert_eq!(pool.operations(), vec![DbOperation::Begin, DbOperation::Commit]);
    }

    #[tokio::test]
    async fn test_failure_rolls_back_without_flush() {
        let pool = RecordingPool::new();
        let store = RecordingEventStore::new();
        let journal = Journal::new();

        let child = ScriptedCommand::new("child", &journal)
            .emitting(vec![event("child.added")])
            .failing_at(Phase::Events);
        let mut parent = ScriptedCommand::new("parent", &journal)
            .emitting(vec![event("parent.added")])
            .invoking(child);

        let err = context(&pool, &store).invoke(&mut parent).await.unwrap_err();

        assert_eq!(err, ExecutionError::Events("child events failed".to_string()));
        assert_eq!(store.push_count(), 0);
        assert_eq!(pool.operations(), vec![DbOperation::Begin, DbOperation::Rollback]);
    }

    #[tokio::test]
    async fn test_push_failure_rolls_back() {
        let pool = RecordingPool::new();
        let store = RecordingEventStore::new().fail_with("unique violation");
        let journal = Journal::new();

        let mut command =
            ScriptedCommand::new("cmd", &journal).emitting(vec![event("cmd.added")]);

        let err = context(&pool, &store).invoke(&mut command).await.unwrap_err();

        assert!(matches!(err, ExecutionError::EventStore(_)));
        assert_eq!(pool.operations(), vec![DbOperation::Begin, DbOperation::Rollback]);
    }

    #[tokio::test]
    async fn test_refuses_to_flush_after_transaction_ended_early() {
        let pool = RecordingPool::new();
        let store = RecordingEventStore::new();
        let mut ctx = context(&pool, &store);

        ctx.open_tree();
        let _ = ctx.ensure_tx().await.unwrap();
        ctx.collector_mut().enter();
        ctx.collector_mut().leave(vec![event("org.added")]);
        // bypasses the scope and commits on the handle directly
        TxGuard::Owner.end(ctx.db_mut(), Ok(())).await.unwrap();

        let err = ctx.close_tree().end(&mut ctx, Ok(())).await.unwrap_err();

        assert!(matches!(err, ExecutionError::Database(_)));
        assert_eq!(store.push_count(), 0);
        assert_eq!(pool.operations(), vec![DbOperation::Begin, DbOperation::Commit]);
    }

    #[tokio::test]
    async fn test_non_producer_opens_nothing() {
        let pool = RecordingPool::new();
        let store = RecordingEventStore::new();
        let journal = Journal::new();

        context(&pool, &store)
            .invoke(&mut ScriptedCommand::new("cmd", &journal))
            .await
            .unwrap();

        assert!(pool.operations().is_empty());
        assert_eq!(store.push_count(), 0);
    }

    #[tokio::test]
    async fn test_producer_without_events_commits_without_push() {
        let pool = RecordingPool::new();
        let store = RecordingEventStore::new();
        let journal = Journal::new();

        context(&pool, &store)
            .invoke(&mut ScriptedCommand::new("cmd", &journal).emitting(vec![]))
            .await
            .unwrap();

        assert_eq!(store.push_count(), 0);
        assert_eq!(pool.operations(), vec![DbOperation::Begin, DbOperation::Commit]);
    }
}
