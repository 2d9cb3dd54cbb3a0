//! # Executor Contracts
//!
//! The unit of work every administrative operation implements.
//!
//! - [`Executor`] only executes.
//! - A [`Commander`] also validates and produces [`DomainEvent`]s.
//! - A [`Querier`] also validates and yields a typed result instead of events.
//!
//! The pipeline discovers the optional capabilities of an executor through the
//! `as_validator` / `as_event_producer` / `is_transactional` accessors, which a
//! type overrides for each capability it really has:
//!
//! ```rust,ignore
//! #[async_trait]
//! impl Executor for AddOrganization {
//!     async fn execute(&mut self, ctx: &mut ExecutionContext) -> Result<()> { /* ... */ }
//!
//!     fn as_validator(&mut self) -> Option<&mut dyn Validator> {
//!         Some(self)
//!     }
//!
//!     fn as_event_producer(&mut self) -> Option<&mut dyn EventProducer> {
//!         Some(self)
//!     }
//! }
//! ```

pub mod batch;
pub mod context;

use async_trait::async_trait;

use crate::error::Result;
use crate::events::DomainEvent;

pub use batch::Batch;
pub use context::ExecutionContext;

#[async_trait]
pub trait Executor: Send {
    /// Used for span names and log fields; defaults to the implementing type
    fn name(&self) -> String {
        short_type_name(std::any::type_name::<Self>())
    }

    /// Perform the work. Sub-work goes through [`ExecutionContext::invoke`].
    async fn execute(&mut self, ctx: &mut ExecutionContext) -> Result<()>;

    fn as_validator(&mut self) -> Option<&mut dyn Validator> {
        None
    }

    fn as_event_producer(&mut self) -> Option<&mut dyn EventProducer> {
        None
    }

    /// Whether this executor's subtree must run inside a transaction
    fn is_transactional(&self) -> bool {
        false
    }
}

#[async_trait]
pub trait Validator: Send {
    /// Runs before `execute`; an error here means `execute` never runs
    async fn validate(&mut self, ctx: &mut ExecutionContext) -> Result<()>;
}

#[async_trait]
pub trait EventProducer: Send {
    /// Only consulted after `execute` returned `Ok`
    async fn events(&mut self, ctx: &mut ExecutionContext) -> Result<Vec<DomainEvent>>;
}

pub trait Commander: Executor + Validator + EventProducer {}

impl<T> Commander for T where T: Executor + Validator + EventProducer {}

pub trait Querier<T>: Executor + Validator {
    /// The result of the last successful `execute`, taken out of the querier.
    /// `None` when execution failed or has not run.
    fn take_result(&mut self) -> Option<T>;
}

/// Marks an executor as requiring a transaction around its subtree
///
/// All other capabilities of the wrapped executor are forwarded unchanged.
pub struct Transactional<E> {
    inner: E,
}

impl<E: Executor> Transactional<E> {
    pub fn new(inner: E) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &E {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut E {
        &mut self.inner
    }

    pub fn into_inner(self) -> E {
        self.inner
    }
}

#[async_trait]
impl<E: Executor> Executor for Transactional<E> {
    fn name(&self) -> String {
        self.inner.name()
    }

    async fn execute(&mut self, ctx: &mut ExecutionContext) -> Result<()> {
        self.inner.execute(ctx).await
    }

    fn as_validator(&mut self) -> Option<&mut dyn Validator> {
        self.inner.as_validator()
    }

    fn as_event_producer(&mut self) -> Option<&mut dyn EventProducer> {
        self.inner.as_event_producer()
    }

    fn is_transactional(&self) -> bool {
        true
    }
}

#[async_trait]
impl<E: Executor + Validator> Validator for Transactional<E> {
    async fn validate(&mut self, ctx: &mut ExecutionContext) -> Result<()> {
        self.inner.validate(ctx).await
    }
}

#[async_trait]
impl<E: Executor + EventProducer> EventProducer for Transactional<E> {
    async fn events(&mut self, ctx: &mut ExecutionContext) -> Result<Vec<DomainEvent>> {
        self.inner.events(ctx).await
    }
}

impl<T, Q: Querier<T>> Querier<T> for Transactional<Q> {
    fn take_result(&mut self) -> Option<T> {
        self.inner.take_result()
    }
}

/// `a::b::Outer<c::Inner>` → `Outer<Inner>`
pub(crate) fn short_type_name(full: &str) -> String {
    let mut short = String::with_capacity(full.len());
    let mut path = String::new();

    let flush = |path: &mut String, short: &mut String| {
        let last = path.rsplit("::").next().unwrap_or_default();
        short.push_str(last);
        path.clear();
    };

    for c in full.chars() {
        if c.is_alphanumeric() || c == '_' || c == ':' {
            path.push(c);
        } else {
            flush(&mut path, &mut short);
            short.push(c);
        }
    }
    flush(&mut path, &mut short);
    short
}
