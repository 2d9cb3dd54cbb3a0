#![allow(dead_code)]

pub mod strategies;

use iam_core::test_helpers::{AllowAll, Journal, RecordingEventStore, RecordingPool};
use iam_core::{DatabaseHandle, DomainEvent, InvokeOptions};
use std::sync::Arc;

/// Recording collaborators for one invocation tree
pub struct Harness {
    pub pool: RecordingPool,
    pub store: RecordingEventStore,
    pub journal: Journal,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            pool: RecordingPool::new(),
            store: RecordingEventStore::new(),
            journal: Journal::new(),
        }
    }

    pub fn with_pool(pool: RecordingPool) -> Self {
        Self {
            pool,
            ..Self::new()
        }
    }

    /// Default pipeline wired to the recording pool and store, permissions granted
    pub fn options(&self) -> InvokeOptions {
        self.options_with_handle(DatabaseHandle::new(self.pool.clone().into_pool()))
    }

    pub fn options_with_handle(&self, db: DatabaseHandle) -> InvokeOptions {
        InvokeOptions::with_handle(db)
            .with_event_store(Arc::new(self.store.clone()))
            .with_permission_checker(Arc::new(AllowAll))
    }

    pub fn published_types(&self) -> Vec<String> {
        event_types(&self.store.events())
    }
}

pub fn event_types(events: &[DomainEvent]) -> Vec<String> {
    events
        .iter()
        .map(|event| event.event_type().to_string())
        .collect()
}
