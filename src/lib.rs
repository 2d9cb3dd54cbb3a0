#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # IAM Core
//!
//! The execution core every administrative operation of the IAM platform runs
//! through.
//!
//! ## Overview
//!
//! An operation is an [`Executor`]. Write operations are [`Commander`]s: they
//! validate, execute and then produce [`DomainEvent`]s. Read operations are
//! [`Querier`]s that yield a typed result instead. Operations compose freely:
//! a command's `execute` may invoke further commands or [`Batch`]es through
//! [`ExecutionContext::invoke`], to any depth.
//!
//! Whatever the shape of the resulting call tree, the pipeline guarantees:
//!
//! - **One transaction per tree**: the first event producer or
//!   [`Transactional`] executor opens it, everything else joins it, and it is
//!   committed or rolled back exactly once when the root returns.
//! - **One flush per tree**: all events of a successful tree are pushed to the
//!   [`EventStore`] in a single call, inside that transaction.
//! - **Causal order**: a command's own events precede the events of every
//!   command it invoked.
//! - **All or nothing**: the first failure anywhere aborts the tree, rolls the
//!   transaction back and publishes nothing.
//!
//! ## Module Organization
//!
//! - [`executor`] - Executor, Commander and Querier contracts, context, batches
//! - [`invoker`] - The stage pipeline (events, logging, trace, validation, transaction)
//! - [`invoke`] - Top-level entry points and their options
//! - [`database`] - Database handle shapes and their Postgres adapters
//! - [`events`] - Domain events and event stores
//! - [`config`] - Configuration management
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use iam_core::{
//!     invoke, Aggregate, DomainEvent, EventProducer, ExecutionContext, Executor, InvokeOptions,
//!     PgDatabase, PgEventStore, Result, Validator,
//! };
//! use iam_core::config::CoreConfig;
//! use std::sync::Arc;
//!
//! struct AddOrganization {
//!     instance_id: String,
//!     org_id: String,
//! }
//!
//! #[async_trait]
//! impl Executor for AddOrganization {
//!     async fn execute(&mut self, _ctx: &mut ExecutionContext) -> Result<()> {
//!         Ok(())
//!     }
//!
//!     fn as_validator(&mut self) -> Option<&mut dyn Validator> {
//!         Some(self)
//!     }
//!
//!     fn as_event_producer(&mut self) -> Option<&mut dyn EventProducer> {
//!         Some(self)
//!     }
//! }
//!
//! #[async_trait]
//! impl Validator for AddOrganization {
//!     async fn validate(&mut self, _ctx: &mut ExecutionContext) -> Result<()> {
//!         Ok(())
//!     }
//! }
//!
//! #[async_trait]
//! impl EventProducer for AddOrganization {
//!     async fn events(&mut self, _ctx: &mut ExecutionContext) -> Result<Vec<DomainEvent>> {
//!         let org = Aggregate::new(&self.instance_id, &self.org_id, "org", &self.org_id);
//!         Ok(vec![DomainEvent::new(org, "org.added")])
//!     }
//! }
//!
//! # async fn example() -> Result<()> {
//! let config = CoreConfig::load()?;
//! let database = PgDatabase::connect(&config.database).await?;
//!
//! let mut command = AddOrganization {
//!     instance_id: "instance-1".into(),
//!     org_id: "org-1".into(),
//! };
//! invoke(
//!     &mut command,
//!     InvokeOptions::new(database.into_pool()).with_event_store(Arc::new(PgEventStore)),
//! )
//! .await
//! # }
//! ```
//!
//! ## Testing
//!
//! [`test_helpers`] provides recording in-memory collaborators, so pipelines
//! can be exercised without a database:
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit, integration and property tests
//! ```

pub mod config;
pub mod database;
pub mod error;
pub mod events;
pub mod executor;
pub mod invoke;
pub mod invoker;
pub mod logging;
pub mod permission;
pub mod repository;
pub mod test_helpers;

pub use config::{CoreConfig, DatabaseConfig, LoggingConfig, PipelineConfig};
pub use database::postgres::PgDatabase;
pub use database::{ClientGuard, DatabaseHandle, HandleShape, TxGuard};
pub use error::{ExecutionError, Result};
pub use events::{Aggregate, DomainEvent, EventStore, PgEventStore};
pub use executor::{
    Batch, Commander, EventProducer, ExecutionContext, Executor, Querier, Transactional, Validator,
};
pub use invoke::{invoke, query, InvokeOptions};
pub use invoker::{Next, Pipeline, PipelineBuilder, Stage};
pub use permission::{PermissionChecker, PermissionRequest};
pub use repository::Repositories;
