use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use crate::error::{ExecutionError, Result};
use crate::events::DomainEvent;
use crate::executor::{EventProducer, ExecutionContext, Executor, Querier, Validator};
use crate::permission::{PermissionChecker, PermissionRequest};

/// Shared, ordered record of `"<name>:<phase>"` entries
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Validate,
    Execute,
    Events,
}

/// A command whose behavior is configured up front.
///
/// By default it validates, invokes nothing, produces no events and succeeds.
/// `execute` first invokes its children in order through the context, then
/// records itself, so a failing `execute` still ran its children.
pub struct ScriptedCommand {
    name: String,
    journal: Journal,
    validates: bool,
    events: Option<Vec<DomainEvent>>,
    children: Vec<Box<dyn Executor>>,
    failing_at: Option<Phase>,
    transactional: bool,
}

impl ScriptedCommand {
    pub fn new(name: impl Into<String>, journal: &Journal) -> Self {
        Self {
            name: name.into(),
            journal: journal.clone(),
            validates: true,
            events: None,
            children: Vec::new(),
            failing_at: None,
            transactional: false,
        }
    }

    /// Makes the command an event producer returning `events`
    pub fn emitting(mut self, events: Vec<DomainEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn invoking(mut self, child: impl Executor + 'static) -> Self {
        self.children.push(Box::new(child));
        self
    }

    pub fn invoking_boxed(mut self, child: Box<dyn Executor>) -> Self {
        self.children.push(child);
        self
    }

    pub fn failing_at(mut self, phase: Phase) -> Self {
        self.failing_at = Some(phase);
        self
    }

    pub fn transactional(mut self) -> Self {
        self.transactional = true;
        self
    }

    /// Drops the validator capability
    pub fn plain(mut self) -> Self {
        self.validates = false;
        self
    }

    fn record(&self, phase: &str) {
        self.journal.record(format!("{}:{phase}", self.name));
    }

    fn fails_at(&self, phase: Phase) -> bool {
        self.failing_at == Some(phase)
    }
}

#[async_trait]
impl Executor for ScriptedCommand {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn execute(&mut self, ctx: &mut ExecutionContext) -> Result<()> {
        for child in &mut self.children {
            ctx.invoke(child.as_mut()).await?;
        }
        self.record("execute");
        if self.fails_at(Phase::Execute) {
            return Err(ExecutionError::Execution(format!("{} failed", self.name)));
        }
        Ok(())
    }

    fn as_validator(&mut self) -> Option<&mut dyn Validator> {
        if self.validates {
            Some(self)
        } else {
            None
        }
    }

    fn as_event_producer(&mut self) -> Option<&mut dyn EventProducer> {
        if self.events.is_some() {
            Some(self)
        } else {
            None
        }
    }

    fn is_transactional(&self) -> bool {
        self.transactional
    }
}

#[async_trait]
impl Validator for ScriptedCommand {
    async fn validate(&mut self, _ctx: &mut ExecutionContext) -> Result<()> {
        self.record("validate");
        if self.fails_at(Phase::Validate) {
            return Err(ExecutionError::Validation(format!("{} invalid", self.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl EventProducer for ScriptedCommand {
    async fn events(&mut self, _ctx: &mut ExecutionContext) -> Result<Vec<DomainEvent>> {
        self.record("events");
        if self.fails_at(Phase::Events) {
            return Err(ExecutionError::Events(format!("{} events failed", self.name)));
        }
        Ok(self.events.clone().unwrap_or_default())
    }
}

/// A querier that yields `value` when its execution succeeds
pub struct ScriptedQuery<T> {
    name: String,
    journal: Journal,
    value: Option<T>,
    result: Option<T>,
    failing_at: Option<Phase>,
}

impl<T: Clone + Send> ScriptedQuery<T> {
    pub fn new(name: impl Into<String>, journal: &Journal, value: Option<T>) -> Self {
        Self {
            name: name.into(),
            journal: journal.clone(),
            value,
            result: None,
            failing_at: None,
        }
    }

    pub fn failing_at(mut self, phase: Phase) -> Self {
        self.failing_at = Some(phase);
        self
    }
}

#[async_trait]
impl<T: Clone + Send> Executor for ScriptedQuery<T> {
    fn name(&self) -> String {
        self.name.clone()
    }

    async fn execute(&mut self, _ctx: &mut ExecutionContext) -> Result<()> {
        self.journal.record(format!("{}:execute", self.name));
        if self.failing_at == Some(Phase::Execute) {
            return Err(ExecutionError::Execution(format!("{} failed", self.name)));
        }
        self.result = self.value.clone();
        Ok(())
    }

    fn as_validator(&mut self) -> Option<&mut dyn Validator> {
        Some(self)
    }
}

#[async_trait]
impl<T: Clone + Send> Validator for ScriptedQuery<T> {
    async fn validate(&mut self, _ctx: &mut ExecutionContext) -> Result<()> {
        self.journal.record(format!("{}:validate", self.name));
        if self.failing_at == Some(Phase::Validate) {
            return Err(ExecutionError::Validation(format!("{} invalid", self.name)));
        }
        Ok(())
    }
}

impl<T: Clone + Send> Querier<T> for ScriptedQuery<T> {
    fn take_result(&mut self) -> Option<T> {
        self.result.take()
    }
}

/// Grants every permission
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

#[async_trait]
impl PermissionChecker for AllowAll {
    async fn check(&self, _request: &PermissionRequest) -> Result<()> {
        Ok(())
    }
}
