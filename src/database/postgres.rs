//! PostgreSQL adapters for the three handle shapes, backed by SQLx.

use async_trait::async_trait;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnection, PgPool, PgPoolOptions};
use sqlx::Postgres;
use std::any::Any;
use std::sync::Arc;
use tracing::{info, warn};

use super::{Client, Connection, DatabaseHandle, Pool, Transaction};
use crate::config::DatabaseConfig;
use crate::error::{ExecutionError, Result};

#[derive(Debug, Clone)]
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        config.validate()?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(config.acquire_timeout())
            .connect(&config.url)
            .await?;

        info!(
            max_connections = config.max_connections,
            "Connected to PostgreSQL"
        );

        Ok(Self { pool })
    }

    pub fn pg_pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn into_pool(self) -> Arc<dyn Pool> {
        Arc::new(self)
    }

    pub async fn health_check(&self) -> Result<bool> {
        let health: i32 = sqlx::query_scalar("SELECT 1").fetch_one(&self.pool).await?;
        Ok(health == 1)
    }
}

#[async_trait]
impl Pool for PgDatabase {
    async fn begin(&self) -> Result<Box<dyn Transaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgTransaction { tx }))
    }

    async fn acquire(&self) -> Result<Box<dyn Client>> {
        let conn = self.pool.acquire().await?;
        Ok(Box::new(PgClient { conn, in_tx: false }))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// A leased connection hosting at most one transaction.
///
/// Dropped while that transaction is open or in an unknown state (a cancelled
/// invocation, a failed `COMMIT`), the connection is closed instead of going
/// back to the pool.
pub struct PgClient {
    conn: PoolConnection<Postgres>,
    in_tx: bool,
}

impl Drop for PgClient {
    fn drop(&mut self) {
        if self.in_tx {
            warn!("Leased connection dropped inside a transaction, closing it");
            self.conn.close_on_drop();
        }
    }
}

#[async_trait]
impl Client for PgClient {
    async fn begin(&mut self) -> Result<()> {
        self.in_tx = true;
        sqlx::query("BEGIN").execute(&mut *self.conn).await?;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        sqlx::query("COMMIT").execute(&mut *self.conn).await?;
        self.in_tx = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        sqlx::query("ROLLBACK").execute(&mut *self.conn).await?;
        self.in_tx = false;
        Ok(())
    }

    async fn release(self: Box<Self>) -> Result<()> {
        drop(self);
        Ok(())
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// What a repository can run statements against
pub enum PgConnectionRef<'a> {
    Pool(&'a PgPool),
    Connection(&'a mut PgConnection),
}

/// Resolve the bound handle into something SQLx can execute against.
///
/// Fails when the handle is backed by a non-Postgres implementation.
pub fn connection(db: &mut DatabaseHandle) -> Result<PgConnectionRef<'_>> {
    match db.connection() {
        Connection::Pool(pool) => pool
            .as_any()
            .downcast_ref::<PgDatabase>()
            .map(|database| PgConnectionRef::Pool(&database.pool))
            .ok_or_else(not_postgres),
        Connection::Client(client) => client
            .as_any_mut()
            .downcast_mut::<PgClient>()
            .map(|client| PgConnectionRef::Connection(&mut *client.conn))
            .ok_or_else(not_postgres),
        Connection::Transaction(tx) => tx
            .as_any_mut()
            .downcast_mut::<PgTransaction>()
            .map(|tx| PgConnectionRef::Connection(&mut *tx.tx))
            .ok_or_else(not_postgres),
    }
}

fn not_postgres() -> ExecutionError {
    ExecutionError::Database("bound database handle is not backed by PostgreSQL".to_string())
}
