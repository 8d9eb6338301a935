//! Driver seam between the database handle and a concrete engine.
//!
//! A [`Driver`] opens [`Connection`]s. Connections declare which optional
//! operations they implement natively through [`Capabilities`]; the optional
//! methods return [`DriverError::Skip`] otherwise, and the caller falls back
//! to the baseline prepared path that every connection must provide.

use async_trait::async_trait;
use std::fmt;
use std::ops::BitOr;
use thiserror::Error;

/// A bound statement argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Integer(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// Set of optional operations a connection implements natively.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const NONE: Capabilities = Capabilities(0);
    /// Parameterised statement execution without a separate prepare step.
    pub const EXECUTE: Capabilities = Capabilities(1);
    /// Parameterised row-returning queries without a separate prepare step.
    pub const QUERY: Capabilities = Capabilities(1 << 1);
    pub const ALL: Capabilities = Capabilities(Self::EXECUTE.0 | Self::QUERY.0);

    pub const fn contains(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Self) -> Self::Output {
        Capabilities(self.0 | rhs.0)
    }
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut set = f.debug_set();
        if self.contains(Self::EXECUTE) {
            set.entry(&"execute");
        }
        if self.contains(Self::QUERY) {
            set.entry(&"query");
        }
        set.finish()
    }
}

/// Error returned by the optional connection operations.
#[derive(Debug, Error)]
pub enum DriverError {
    /// The connection does not implement this operation natively; use the
    /// prepared path instead.
    #[error("operation not supported by connection, use the prepared path")]
    Skip,
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
}

/// Opens connections to a database engine.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Where and how to connect.
    type Target: Send + Sync;
    type Conn: Connection;

    /// Name the driver is known by in logs.
    fn name(&self) -> &'static str;

    async fn open(&self, target: &Self::Target) -> Result<Self::Conn, sqlx::Error>;
}

/// One physical connection.
#[async_trait]
pub trait Connection: Send + 'static {
    type Row: Send;
    type Outcome: Send;

    fn capabilities(&self) -> Capabilities;

    /// Native execute. Only meaningful when [`Capabilities::EXECUTE`] is set.
    async fn execute(&mut self, _sql: &str, _args: &[Value]) -> Result<Self::Outcome, DriverError> {
        Err(DriverError::Skip)
    }

    /// Native query. Only meaningful when [`Capabilities::QUERY`] is set.
    async fn query(&mut self, _sql: &str, _args: &[Value]) -> Result<Vec<Self::Row>, DriverError> {
        Err(DriverError::Skip)
    }

    async fn execute_prepared(
        &mut self,
        sql: &str,
        args: &[Value],
    ) -> Result<Self::Outcome, sqlx::Error>;

    async fn query_prepared(
        &mut self,
        sql: &str,
        args: &[Value],
    ) -> Result<Vec<Self::Row>, sqlx::Error>;

    async fn begin(&mut self) -> Result<(), sqlx::Error>;

    async fn commit(&mut self) -> Result<(), sqlx::Error>;

    async fn rollback(&mut self) -> Result<(), sqlx::Error>;

    async fn ping(&mut self) -> Result<(), sqlx::Error>;

    async fn close(self) -> Result<(), sqlx::Error>
    where
        Self: Sized;
}
