//! # Database Handle
//!
//! The execution core never talks SQL itself. It only needs to know which
//! shape the bound handle currently has and how to promote it:
//!
//! ```text
//! Pool ──ensure_tx──▶ Transaction
//!  │
//!  └──ensure_client──▶ Client ──ensure_tx──▶ Transaction (hosted on the client)
//! ```
//!
//! Whoever performs a promotion receives an owning guard and is the only one
//! allowed to end it. Every later promotion attempt against an already promoted
//! handle yields a no-op guard, so nested calls can ask for a transaction as
//! often as they like and still produce a single physical transaction.

pub mod postgres;

use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{ExecutionError, Result};

/// A connection pool: the unscoped shape of a handle.
#[async_trait]
pub trait Pool: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>>;

    async fn acquire(&self) -> Result<Box<dyn Client>>;

    fn as_any(&self) -> &dyn Any;
}

/// A connection leased from a pool. It can host a transaction on itself.
#[async_trait]
pub trait Client: Send + Sync {
    async fn begin(&mut self) -> Result<()>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;

    async fn release(self: Box<Self>) -> Result<()>;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A transaction started directly from a pool.
#[async_trait]
pub trait Transaction: Send + Sync {
    async fn commit(self: Box<Self>) -> Result<()>;

    async fn rollback(self: Box<Self>) -> Result<()>;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleShape {
    Pool,
    Client,
    Transaction,
}

enum Bound {
    Pool,
    Client(Box<dyn Client>),
    /// Transaction begun on a leased client; ending it returns to `Client`
    ClientTransaction(Box<dyn Client>),
    Transaction(Box<dyn Transaction>),
}

/// Borrowed view of whatever the handle currently points at
pub enum Connection<'a> {
    Pool(&'a dyn Pool),
    Client(&'a mut dyn Client),
    Transaction(&'a mut dyn Transaction),
}

/// The database handle bound into an execution context.
pub struct DatabaseHandle {
    pool: Arc<dyn Pool>,
    bound: Bound,
}

impl fmt::Debug for DatabaseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseHandle")
            .field("shape", &self.shape())
            .finish()
    }
}

impl DatabaseHandle {
    pub fn new(pool: Arc<dyn Pool>) -> Self {
        Self {
            pool,
            bound: Bound::Pool,
        }
    }

    pub fn shape(&self) -> HandleShape {
        match self.bound {
            Bound::Pool => HandleShape::Pool,
            Bound::Client(_) => HandleShape::Client,
            Bound::ClientTransaction(_) | Bound::Transaction(_) => HandleShape::Transaction,
        }
    }

    pub fn in_transaction(&self) -> bool {
        self.shape() == HandleShape::Transaction
    }

    pub fn pool(&self) -> &Arc<dyn Pool> {
        &self.pool
    }

    pub fn connection(&mut self) -> Connection<'_> {
        match &mut self.bound {
            Bound::Pool => Connection::Pool(self.pool.as_ref()),
            Bound::Client(client) | Bound::ClientTransaction(client) => {
                Connection::Client(client.as_mut())
            }
            Bound::Transaction(tx) => Connection::Transaction(tx.as_mut()),
        }
    }

    /// Begin a transaction unless one is already bound.
    pub async fn ensure_tx(&mut self) -> Result<TxGuard> {
        match &mut self.bound {
            Bound::Transaction(_) | Bound::ClientTransaction(_) => Ok(TxGuard::Noop),
            Bound::Client(client) => {
                client.begin().await?;
                if let Bound::Client(client) = std::mem::replace(&mut self.bound, Bound::Pool) {
                    self.bound = Bound::ClientTransaction(client);
                }
                debug!("Transaction started on leased client");
                Ok(TxGuard::Owner)
            }
            Bound::Pool => {
                let tx = self.pool.begin().await?;
                self.bound = Bound::Transaction(tx);
                debug!("Transaction started on pool");
                Ok(TxGuard::Owner)
            }
        }
    }

    /// Lease a connection unless the handle is already scoped.
    pub async fn ensure_client(&mut self) -> Result<ClientGuard> {
        match self.bound {
            Bound::Pool => {
                let client = self.pool.acquire().await?;
                self.bound = Bound::Client(client);
                debug!("Client acquired from pool");
                Ok(ClientGuard::Owner)
            }
            _ => Ok(ClientGuard::Noop),
        }
    }

    /// Commit on `Ok`, roll back on `Err`, and fall back to the pre-transaction shape.
    async fn end_tx(&mut self, result: Result<()>) -> Result<()> {
        let bound = std::mem::replace(&mut self.bound, Bound::Pool);
        match bound {
            Bound::Transaction(tx) => match result {
                Ok(()) => tx.commit().await,
                Err(cause) => rollback_outcome(cause, tx.rollback().await),
            },
            Bound::ClientTransaction(mut client) => {
                let outcome = match result {
                    Ok(()) => client.commit().await,
                    Err(cause) => rollback_outcome(cause, client.rollback().await),
                };
                self.bound = Bound::Client(client);
                outcome
            }
            other => {
                warn!("Transaction guard ended but no transaction is bound");
                self.bound = other;
                result
            }
        }
    }

    async fn release_client(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.bound, Bound::Pool) {
            Bound::Client(client) => client.release().await,
            Bound::ClientTransaction(mut client) => {
                // the transaction owner never ended it, so its work is lost
                warn!("Releasing client with an open transaction, rolling back");
                let aborted = ExecutionError::Database(
                    "client released while its transaction was still open".to_string(),
                );
                let rollback = rollback_outcome(aborted, client.rollback().await);
                let release = client.release().await;
                release.and(rollback)
            }
            other => {
                self.bound = other;
                Ok(())
            }
        }
    }
}

fn rollback_outcome(cause: ExecutionError, rollback: Result<()>) -> Result<()> {
    match rollback {
        Ok(()) => Err(cause),
        Err(rollback_err) => Err(ExecutionError::Rollback {
            cause: Box::new(cause),
            reason: rollback_err.to_string(),
        }),
    }
}

/// Returned by [`DatabaseHandle::ensure_tx`].
#[must_use = "a transaction guard must be ended or handed to the invocation tree"]
#[derive(Debug, PartialEq, Eq)]
pub enum TxGuard {
    /// This call began the transaction and must end it
    Owner,
    /// A transaction was already bound; ending does nothing
    Noop,
}

impl TxGuard {
    pub fn is_owner(&self) -> bool {
        matches!(self, TxGuard::Owner)
    }

    /// End the transaction with the outcome of the work it wrapped.
    ///
    /// A no-op guard passes `result` through untouched.
    pub async fn end(self, db: &mut DatabaseHandle, result: Result<()>) -> Result<()> {
        match self {
            TxGuard::Owner => db.end_tx(result).await,
            TxGuard::Noop => result,
        }
    }
}

/// Returned by [`DatabaseHandle::ensure_client`].
#[must_use = "a client guard must be released"]
#[derive(Debug, PartialEq, Eq)]
pub enum ClientGuard {
    Owner,
    Noop,
}

impl ClientGuard {
    pub fn is_owner(&self) -> bool {
        matches!(self, ClientGuard::Owner)
    }

    pub async fn release(self, db: &mut DatabaseHandle) -> Result<()> {
        match self {
            ClientGuard::Owner => db.release_client().await,
            ClientGuard::Noop => Ok(()),
        }
    }
}
