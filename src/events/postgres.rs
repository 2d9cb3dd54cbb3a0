//! Event store backed by the `eventstore.events2` table.
//!
//! Pushing locks the newest row of every touched aggregate, continues each
//! aggregate's sequence from there, and appends the whole batch in one
//! statement. `in_tx_order` records the event's index within the batch so the
//! publication order of the invocation tree is preserved verbatim.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Postgres, QueryBuilder, Row};
use std::collections::HashMap;
use tracing::debug;

use super::{Aggregate, DomainEvent, EventStore};
use crate::database::postgres::{self, PgConnectionRef};
use crate::database::DatabaseHandle;
use crate::error::{ExecutionError, Result};

#[derive(Debug, Default, Clone, Copy)]
pub struct PgEventStore;

#[async_trait]
impl EventStore for PgEventStore {
    async fn push(&self, db: &mut DatabaseHandle, events: &[DomainEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }
        if !db.in_transaction() {
            return Err(ExecutionError::EventStore(
                "events must be pushed inside a transaction".to_string(),
            ));
        }
        let revisions = column_revisions(events)?;

        let conn = match postgres::connection(db)? {
            PgConnectionRef::Connection(conn) => conn,
            PgConnectionRef::Pool(_) => {
                return Err(ExecutionError::EventStore(
                    "transaction handle resolved to a pool".to_string(),
                ))
            }
        };

        let aggregates = distinct_aggregates(events);
        let rows = lock_statement(&aggregates)
            .build()
            .fetch_all(&mut *conn)
            .await?;

        let mut latest = HashMap::with_capacity(rows.len());
        for row in rows {
            let aggregate = Aggregate::new(
                row.try_get::<String, _>("instance_id")?,
                row.try_get::<String, _>("owner")?,
                row.try_get::<String, _>("aggregate_type")?,
                row.try_get::<String, _>("aggregate_id")?,
            );
            latest.insert(aggregate, row.try_get::<i64, _>("sequence")?);
        }

        let sequences = assign_sequences(events, &latest);
        let stored = push_statement(events, &revisions, &sequences)
            .build()
            .fetch_all(&mut *conn)
            .await?;

        let last_created_at = stored
            .last()
            .map(|row| row.try_get::<DateTime<Utc>, _>("created_at"))
            .transpose()?;

        debug!(
            events = stored.len(),
            aggregates = aggregates.len(),
            created_at = ?last_created_at,
            "Pushed events to eventstore.events2"
        );

        Ok(())
    }
}

fn distinct_aggregates(events: &[DomainEvent]) -> Vec<&Aggregate> {
    let mut seen = Vec::new();
    for event in events {
        if !seen.contains(&event.aggregate()) {
            seen.push(event.aggregate());
        }
    }
    seen
}

fn lock_statement(aggregates: &[&Aggregate]) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new("WITH existing AS (");
    for (i, aggregate) in aggregates.iter().enumerate() {
        if i > 0 {
            builder.push(" UNION ALL ");
        }
        builder.push(
            r#"(SELECT instance_id, aggregate_type, aggregate_id, "sequence" FROM eventstore.events2 WHERE instance_id = "#,
        );
        builder.push_bind(aggregate.instance_id.clone());
        builder.push(" AND aggregate_type = ");
        builder.push_bind(aggregate.aggregate_type.clone());
        builder.push(" AND aggregate_id = ");
        builder.push_bind(aggregate.id.clone());
        builder.push(" AND owner = ");
        builder.push_bind(aggregate.owner.clone());
        builder.push(r#" ORDER BY "sequence" DESC LIMIT 1)"#);
    }
    builder.push(
        ") SELECT e.instance_id, e.owner, e.aggregate_type, e.aggregate_id, e.sequence \
         FROM eventstore.events2 e JOIN existing ON e.instance_id = existing.instance_id \
         AND e.aggregate_type = existing.aggregate_type AND e.aggregate_id = existing.aggregate_id \
         AND e.sequence = existing.sequence FOR UPDATE",
    );
    builder
}

/// Next sequence per event, continuing from the newest stored row of its aggregate
fn assign_sequences(events: &[DomainEvent], latest: &HashMap<Aggregate, i64>) -> Vec<i64> {
    let mut current = latest.clone();
    events
        .iter()
        .map(|event| {
            let sequence = current.entry(event.aggregate().clone()).or_insert(0);
            *sequence += 1;
            *sequence
        })
        .collect()
}

/// `revision` is a `SMALLINT` column
fn column_revisions(events: &[DomainEvent]) -> Result<Vec<i16>> {
    events
        .iter()
        .map(|event| {
            i16::try_from(event.revision()).map_err(|_| {
                ExecutionError::EventStore(format!(
                    "revision {} of {} exceeds the stored range",
                    event.revision(),
                    event.event_type()
                ))
            })
        })
        .collect()
}

fn push_statement(
    events: &[DomainEvent],
    revisions: &[i16],
    sequences: &[i64],
) -> QueryBuilder<'static, Postgres> {
    let mut builder = QueryBuilder::new(
        r#"INSERT INTO eventstore.events2 (instance_id, "owner", aggregate_type, aggregate_id, revision, creator, event_type, payload, "sequence", in_tx_order, created_at, "position") "#,
    );
    builder.push_values(
        events.iter().zip(revisions).zip(sequences).enumerate(),
        |mut row, (in_tx_order, ((event, revision), sequence))| {
            let aggregate = event.aggregate();
            row.push_bind(aggregate.instance_id.clone())
                .push_bind(aggregate.owner.clone())
                .push_bind(aggregate.aggregate_type.clone())
                .push_bind(aggregate.id.clone())
                .push_bind(*revision)
                .push_bind(event.creator().to_string())
                .push_bind(event.event_type().to_string())
                .push_bind(event.payload().cloned())
                .push_bind(*sequence)
                .push_bind(in_tx_order as i32)
                .push_unseparated(", statement_timestamp(), EXTRACT(EPOCH FROM clock_timestamp())");
        },
    );
    builder.push(r#" RETURNING created_at, "position""#);
    builder
}
