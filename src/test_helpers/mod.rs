//! # Test Helpers
//!
//! In-memory collaborators that record what the pipeline does to them, plus
//! scripted executors whose every phase can be observed or made to fail.
//! Used by the unit tests of this crate, the integration tests under `tests/`,
//! and by embedders testing their own commands without a database.

pub mod commands;
pub mod database;
pub mod events;

pub use commands::{AllowAll, Journal, Phase, ScriptedCommand, ScriptedQuery};
pub use database::{DbOperation, RecordingClient, RecordingPool, RecordingTransaction};
pub use events::{event, event_on, RecordingEventStore};
