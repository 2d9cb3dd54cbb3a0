use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::database::{DatabaseHandle, HandleShape};
use crate::error::{ExecutionError, Result};
use crate::events::{Aggregate, DomainEvent, EventStore};

/// An event on a fixed test aggregate
pub fn event(event_type: &str) -> DomainEvent {
    event_on("aggregate-1", event_type)
}

pub fn event_on(aggregate_id: &str, event_type: &str) -> DomainEvent {
    DomainEvent::new(
        Aggregate::new("instance-1", "owner-1", "test", aggregate_id),
        event_type,
    )
}

#[derive(Debug, Clone)]
struct RecordedPush {
    events: Vec<DomainEvent>,
    shape: HandleShape,
}

/// Event store recording every push and the handle shape it was pushed on
#[derive(Debug, Clone, Default)]
pub struct RecordingEventStore {
    pushes: Arc<Mutex<Vec<RecordedPush>>>,
    failure: Option<String>,
}

impl RecordingEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every push fails with an [`ExecutionError::EventStore`] carrying `message`
    pub fn fail_with(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    pub fn pushes(&self) -> Vec<Vec<DomainEvent>> {
        self.pushes.lock().iter().map(|push| push.events.clone()).collect()
    }

    pub fn push_count(&self) -> usize {
        self.pushes.lock().len()
    }

    /// All pushed events, in push order
    pub fn events(&self) -> Vec<DomainEvent> {
        self.pushes
            .lock()
            .iter()
            .flat_map(|push| push.events.iter().cloned())
            .collect()
    }

    pub fn shapes(&self) -> Vec<HandleShape> {
        self.pushes.lock().iter().map(|push| push.shape).collect()
    }
}

#[async_trait]
impl EventStore for RecordingEventStore {
    async fn push(&self, db: &mut DatabaseHandle, events: &[DomainEvent]) -> Result<()> {
        if let Some(message) = &self.failure {
            return Err(ExecutionError::EventStore(message.clone()));
        }
        self.pushes.lock().push(RecordedPush {
            events: events.to_vec(),
            shape: db.shape(),
        });
        Ok(())
    }
}
