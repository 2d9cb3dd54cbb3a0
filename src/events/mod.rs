//! Domain events and the sink they are flushed to.

pub mod postgres;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::database::DatabaseHandle;
use crate::error::{ExecutionError, Result};

pub use postgres::PgEventStore;

/// The aggregate an event is appended to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Aggregate {
    pub instance_id: String,
    pub owner: String,
    pub aggregate_type: String,
    pub id: String,
}

impl Aggregate {
    pub fn new(
        instance_id: impl Into<String>,
        owner: impl Into<String>,
        aggregate_type: impl Into<String>,
        id: impl Into<String>,
    ) -> Self {
        Self {
            instance_id: instance_id.into(),
            owner: owner.into(),
            aggregate_type: aggregate_type.into(),
            id: id.into(),
        }
    }
}

impl fmt::Display for Aggregate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.instance_id, self.aggregate_type, self.id)
    }
}

/// An immutable state change produced by a command.
///
/// Its position in the event store is assigned when the batch it belongs to is
/// appended; until then its identity is the aggregate plus its index in that batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    aggregate: Aggregate,
    event_type: String,
    revision: u16,
    creator: String,
    payload: Option<Value>,
}

impl DomainEvent {
    pub fn new(aggregate: Aggregate, event_type: impl Into<String>) -> Self {
        Self {
            aggregate,
            event_type: event_type.into(),
            revision: 1,
            creator: String::new(),
            payload: None,
        }
    }

    pub fn with_revision(mut self, revision: u16) -> Self {
        self.revision = revision;
        self
    }

    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = creator.into();
        self
    }

    pub fn with_payload<T: Serialize>(mut self, payload: &T) -> Result<Self> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    pub fn aggregate(&self) -> &Aggregate {
        &self.aggregate
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn revision(&self) -> u16 {
        self.revision
    }

    pub fn creator(&self) -> &str {
        &self.creator
    }

    pub fn payload(&self) -> Option<&Value> {
        self.payload.as_ref()
    }
}

/// Durable append-only sink for domain events.
///
/// `push` receives the handle of the running invocation tree and must append
/// atomically with respect to the transaction bound to it.
#[async_trait]
pub trait EventStore: Send + Sync {
    async fn push(&self, db: &mut DatabaseHandle, events: &[DomainEvent]) -> Result<()>;
}

/// Default sink of an execution context: refuses every flush
#[derive(Debug, Default, Clone, Copy)]
pub struct UnconfiguredEventStore;

#[async_trait]
impl EventStore for UnconfiguredEventStore {
    async fn push(&self, _db: &mut DatabaseHandle, events: &[DomainEvent]) -> Result<()> {
        Err(ExecutionError::Configuration(format!(
            "no event store configured, cannot push {} events",
            events.len()
        )))
    }
}
