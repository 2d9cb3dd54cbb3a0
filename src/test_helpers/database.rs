use async_trait::async_trait;
use parking_lot::Mutex;
use std::any::Any;
use std::sync::Arc;

use crate::database::{Client, Pool, Transaction};
use crate::error::{ExecutionError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbOperation {
    Begin,
    Commit,
    Rollback,
    Acquire,
    Release,
}

#[derive(Debug, Default)]
struct Failures {
    begin: Option<String>,
    commit: Option<String>,
    rollback: Option<String>,
}

/// A pool that records the operations that took effect.
///
/// Clones share the same log, so a test keeps one clone and hands another to
/// the handle under test.
#[derive(Debug, Clone, Default)]
pub struct RecordingPool {
    log: Arc<Mutex<Vec<DbOperation>>>,
    failures: Arc<Mutex<Failures>>,
}

impl RecordingPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_begin(self, message: impl Into<String>) -> Self {
        self.failures.lock().begin = Some(message.into());
        self
    }

    pub fn fail_commit(self, message: impl Into<String>) -> Self {
        self.failures.lock().commit = Some(message.into());
        self
    }

    pub fn fail_rollback(self, message: impl Into<String>) -> Self {
        self.failures.lock().rollback = Some(message.into());
        self
    }

    pub fn into_pool(self) -> Arc<dyn Pool> {
        Arc::new(self)
    }

    pub fn operations(&self) -> Vec<DbOperation> {
        self.log.lock().clone()
    }

    pub fn begins(&self) -> usize {
        self.count(DbOperation::Begin)
    }

    pub fn commits(&self) -> usize {
        self.count(DbOperation::Commit)
    }

    pub fn rollbacks(&self) -> usize {
        self.count(DbOperation::Rollback)
    }

    fn count(&self, operation: DbOperation) -> usize {
        self.log.lock().iter().filter(|op| **op == operation).count()
    }

    fn apply(&self, operation: DbOperation) -> Result<()> {
        let failure = {
            let failures = self.failures.lock();
            match operation {
                DbOperation::Begin => failures.begin.clone(),
                DbOperation::Commit => failures.commit.clone(),
                DbOperation::Rollback => failures.rollback.clone(),
                DbOperation::Acquire | DbOperation::Release => None,
            }
        };
        if let Some(message) = failure {
            return Err(ExecutionError::Database(message));
        }
        self.log.lock().push(operation);
        Ok(())
    }
}

#[async_trait]
impl Pool for RecordingPool {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        self.apply(DbOperation::Begin)?;
        Ok(Box::new(RecordingTransaction { pool: self.clone() }))
    }

    async fn acquire(&self) -> Result<Box<dyn Client>> {
        self.apply(DbOperation::Acquire)?;
        Ok(Box::new(RecordingClient { pool: self.clone() }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct RecordingTransaction {
    pool: RecordingPool,
}

#[async_trait]
impl Transaction for RecordingTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.pool.apply(DbOperation::Commit)
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.pool.apply(DbOperation::Rollback)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[derive(Debug)]
pub struct RecordingClient {
    pool: RecordingPool,
}

#[async_trait]
impl Client for RecordingClient {
    async fn begin(&mut self) -> Result<()> {
        self.pool.apply(DbOperation::Begin)
    }

    async fn commit(&mut self) -> Result<()> {
        self.pool.apply(DbOperation::Commit)
    }

    async fn rollback(&mut self) -> Result<()> {
        self.pool.apply(DbOperation::Rollback)
    }

    async fn release(self: Box<Self>) -> Result<()> {
        self.pool.apply(DbOperation::Release)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
