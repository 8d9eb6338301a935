//! Connection handle for a single-writer embedded engine.
//!
//! [`Database`] owns at most one open connection, which is also its one idle
//! connection. Callers queue on it, so the engine's own locking is the only
//! write serialisation. Native driver operations are tried first; a
//! [`DriverError::Skip`] falls back to the prepared path.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::warn;

use super::driver::{Connection, Driver, DriverError, Value};

/// Rows produced by connections of driver `D`.
pub type RowOf<D> = <<D as Driver>::Conn as Connection>::Row;
/// Execution outcome produced by connections of driver `D`.
pub type OutcomeOf<D> = <<D as Driver>::Conn as Connection>::Outcome;

/// A lazily connected handle capped at one connection.
pub struct Database<D: Driver> {
    driver: D,
    target: D::Target,
    slot: Mutex<Option<D::Conn>>,
    // Set when a transaction is dropped before commit or rollback.
    abandoned_tx: AtomicBool,
    closed: AtomicBool,
}

impl<D: Driver> Database<D> {
    /// Create a handle. No connection is opened until first use.
    pub fn new(driver: D, target: D::Target) -> Self {
        Self {
            driver,
            target,
            slot: Mutex::new(None),
            abandoned_tx: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    async fn acquire(&self) -> Result<MappedMutexGuard<'_, D::Conn>, sqlx::Error> {
        if self.closed.load(Ordering::Acquire) {
            return Err(sqlx::Error::PoolClosed);
        }
        let mut slot = self.slot.lock().await;
        // close() may have emptied the slot while we waited for it.
        if self.closed.load(Ordering::Acquire) {
            return Err(sqlx::Error::PoolClosed);
        }
        if slot.is_none() {
            *slot = Some(self.driver.open(&self.target).await?);
        }
        let mut conn = MutexGuard::try_map(slot, Option::as_mut)
            .map_err(|_| sqlx::Error::PoolClosed)?;

        if self.abandoned_tx.swap(false, Ordering::AcqRel) {
            if let Err(e) = conn.rollback().await {
                warn!(driver = self.driver.name(), err = %e, "db.tx.abandoned_rollback");
            }
        }
        Ok(conn)
    }

    /// Open the connection if needed and check that it is alive.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        self.acquire().await?.ping().await
    }

    pub async fn execute(&self, sql: &str, args: &[Value]) -> Result<OutcomeOf<D>, sqlx::Error> {
        let mut conn = self.acquire().await?;
        execute_on(&mut *conn, sql, args).await
    }

    pub async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<RowOf<D>>, sqlx::Error> {
        let mut conn = self.acquire().await?;
        query_on(&mut *conn, sql, args).await
    }

    /// Start a transaction. The connection stays reserved until it ends.
    pub async fn begin(&self) -> Result<Transaction<'_, D>, sqlx::Error> {
        let mut conn = self.acquire().await?;
        // Cancelled while BEGIN is in flight: roll back on next use.
        self.abandoned_tx.store(true, Ordering::Release);
        let begun = conn.begin().await;
        self.abandoned_tx.store(false, Ordering::Release);
        begun?;
        Ok(Transaction {
            conn,
            abandoned: &self.abandoned_tx,
            done: false,
        })
    }

    /// Close the connection. Later calls fail with `PoolClosed`.
    pub async fn close(&self) -> Result<(), sqlx::Error> {
        self.closed.store(true, Ordering::Release);
        let conn = self.slot.lock().await.take();
        match conn {
            Some(conn) => conn.close().await,
            None => Ok(()),
        }
    }
}

/// An open transaction on the handle's connection.
///
/// Dropping it without [`commit`](Self::commit) or [`rollback`](Self::rollback)
/// rolls it back before the connection is next used.
pub struct Transaction<'a, D: Driver> {
    conn: MappedMutexGuard<'a, D::Conn>,
    abandoned: &'a AtomicBool,
    done: bool,
}

impl<'a, D: Driver> Transaction<'a, D> {
    pub async fn execute(&mut self, sql: &str, args: &[Value]) -> Result<OutcomeOf<D>, sqlx::Error> {
        execute_on(&mut *self.conn, sql, args).await
    }

    pub async fn query(&mut self, sql: &str, args: &[Value]) -> Result<Vec<RowOf<D>>, sqlx::Error> {
        query_on(&mut *self.conn, sql, args).await
    }

    /// A failed commit leaves the transaction to be rolled back on next use.
    pub async fn commit(mut self) -> Result<(), sqlx::Error> {
        self.conn.commit().await?;
        self.done = true;
        Ok(())
    }

    pub async fn rollback(mut self) -> Result<(), sqlx::Error> {
        self.conn.rollback().await?;
        self.done = true;
        Ok(())
    }
}

impl<'a, D: Driver> Drop for Transaction<'a, D> {
    fn drop(&mut self) {
        if !self.done {
            self.abandoned.store(true, Ordering::Release);
        }
    }
}

async fn execute_on<C: Connection>(
    conn: &mut C,
    sql: &str,
    args: &[Value],
) -> Result<C::Outcome, sqlx::Error> {
    match conn.execute(sql, args).await {
        Ok(outcome) => Ok(outcome),
        Err(DriverError::Sql(e)) => Err(e),
        Err(DriverError::Skip) => conn.execute_prepared(sql, args).await,
    }
}

async fn query_on<C: Connection>(
    conn: &mut C,
    sql: &str,
    args: &[Value],
) -> Result<Vec<C::Row>, sqlx::Error> {
    match conn.query(sql, args).await {
        Ok(rows) => Ok(rows),
        Err(DriverError::Sql(e)) => Err(e),
        Err(DriverError::Skip) => conn.query_prepared(sql, args).await,
    }
}
