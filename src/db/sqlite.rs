//! SQLite driver backed by `sqlx::SqliteConnection`.

use async_trait::async_trait;
use sqlx::query::Query;
use sqlx::sqlite::{
    Sqlite, SqliteArguments, SqliteConnectOptions, SqliteConnection, SqliteQueryResult, SqliteRow,
};
use sqlx::{ConnectOptions, Connection as _, Executor};

use super::driver::{Capabilities, Connection, Driver, DriverError, Value};

/// The plain SQLite driver.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver;

#[async_trait]
impl Driver for SqliteDriver {
    type Target = SqliteConnectOptions;
    type Conn = SqliteConn;

    fn name(&self) -> &'static str {
        "sqlite3"
    }

    async fn open(&self, target: &SqliteConnectOptions) -> Result<SqliteConn, sqlx::Error> {
        let inner = target.connect().await?;
        Ok(SqliteConn { inner })
    }
}

/// A single SQLite connection.
pub struct SqliteConn {
    inner: SqliteConnection,
}

fn bind_all<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    args: &[Value],
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    for arg in args {
        query = match arg {
            Value::Null => query.bind(None::<i64>),
            Value::Integer(v) => query.bind(*v),
            Value::Real(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.clone()),
            Value::Blob(v) => query.bind(v.clone()),
        };
    }
    query
}

#[async_trait]
impl Connection for SqliteConn {
    type Row = SqliteRow;
    type Outcome = SqliteQueryResult;

    fn capabilities(&self) -> Capabilities {
        Capabilities::ALL
    }

    async fn execute(&mut self, sql: &str, args: &[Value]) -> Result<SqliteQueryResult, DriverError> {
        // Without arguments the text may hold several statements (migration bodies).
        if args.is_empty() {
            return Ok(self.inner.execute(sql).await?);
        }
        Ok(bind_all(sqlx::query(sql), args)
            .execute(&mut self.inner)
            .await?)
    }

    async fn query(&mut self, sql: &str, args: &[Value]) -> Result<Vec<SqliteRow>, DriverError> {
        Ok(bind_all(sqlx::query(sql), args)
            .fetch_all(&mut self.inner)
            .await?)
    }

    async fn execute_prepared(
        &mut self,
        sql: &str,
        args: &[Value],
    ) -> Result<SqliteQueryResult, sqlx::Error> {
        bind_all(sqlx::query(sql).persistent(false), args)
            .execute(&mut self.inner)
            .await
    }

    async fn query_prepared(
        &mut self,
        sql: &str,
        args: &[Value],
    ) -> Result<Vec<SqliteRow>, sqlx::Error> {
        bind_all(sqlx::query(sql).persistent(false), args)
            .fetch_all(&mut self.inner)
            .await
    }

    async fn begin(&mut self) -> Result<(), sqlx::Error> {
        self.inner.execute("BEGIN").await.map(|_| ())
    }

    async fn commit(&mut self) -> Result<(), sqlx::Error> {
        self.inner.execute("COMMIT").await.map(|_| ())
    }

    async fn rollback(&mut self) -> Result<(), sqlx::Error> {
        self.inner.execute("ROLLBACK").await.map(|_| ())
    }

    async fn ping(&mut self) -> Result<(), sqlx::Error> {
        self.inner.ping().await
    }

    async fn close(self) -> Result<(), sqlx::Error> {
        self.inner.close().await
    }
}
