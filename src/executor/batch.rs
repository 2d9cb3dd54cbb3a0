use async_trait::async_trait;
use std::fmt;

use super::{ExecutionContext, Executor};
use crate::error::Result;

/// Runs a fixed list of executors in order as one logical step.
///
/// Every member goes through [`ExecutionContext::invoke`], so it still gets
/// validated, traced, logged and collected. The first failing member stops the
/// batch and its error is returned unchanged.
///
/// ```rust
/// use iam_core::test_helpers::{
///     event, AllowAll, Journal, RecordingEventStore, RecordingPool, ScriptedCommand,
/// };
/// use iam_core::{invoke, Batch, InvokeOptions};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let journal = Journal::new();
/// let store = RecordingEventStore::new();
/// let mut batch = Batch::default()
///     .with(ScriptedCommand::new("add-org", &journal).emitting(vec![event("org.added")]))
///     .with(ScriptedCommand::new("add-member", &journal).emitting(vec![event("org.member.added")]));
///
/// let options = InvokeOptions::new(RecordingPool::new().into_pool())
///     .with_event_store(Arc::new(store.clone()))
///     .with_permission_checker(Arc::new(AllowAll));
/// invoke(&mut batch, options).await.unwrap();
///
/// // both members publish together, in one push
/// assert_eq!(store.push_count(), 1);
/// assert_eq!(store.events().len(), 2);
/// # });
/// ```
#[derive(Default)]
pub struct Batch {
    executors: Vec<Box<dyn Executor>>,
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("executors", &self.member_names())
            .finish()
    }
}

impl Batch {
    pub fn new(executors: Vec<Box<dyn Executor>>) -> Self {
        Self { executors }
    }

    pub fn push(&mut self, executor: impl Executor + 'static) {
        self.executors.push(Box::new(executor));
    }

    pub fn with(mut self, executor: impl Executor + 'static) -> Self {
        self.push(executor);
        self
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    fn member_names(&self) -> Vec<String> {
        self.executors.iter().map(|executor| executor.name()).collect()
    }
}

impl FromIterator<Box<dyn Executor>> for Batch {
    fn from_iter<I: IntoIterator<Item = Box<dyn Executor>>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[async_trait]
impl Executor for Batch {
    fn name(&self) -> String {
        format!("Batch[{}]", self.member_names().join(", "))
    }

    async fn execute(&mut self, ctx: &mut ExecutionContext) -> Result<()> {
        for executor in &mut self.executors {
            ctx.invoke(executor.as_mut()).await?;
        }
        Ok(())
    }
}
