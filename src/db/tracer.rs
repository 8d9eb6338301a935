//! Driver-level SQL instrumentation.
//!
//! [`TracedDriver`] wraps another [`Driver`] and hands out
//! [`TracedConnection`]s that time native `execute`/`query` calls. Failed
//! calls are always logged at ERROR; successful calls slower than the
//! configured threshold are logged at WARN, subject to per-connection
//! sampling. Results and errors are returned to the caller untouched.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::Dispatch;

use super::driver::{Capabilities, Connection, Driver, DriverError, Value};

/// Name the SQLite driver is registered under once traced.
pub const TRACED_DRIVER_NAME: &str = "sqlite3-traced";

const MASKED: &str = "[masked]";

/// Tracer settings, fixed for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracerConfig {
    /// Successful calls at least this slow are reported. Zero disables.
    pub slow_threshold: Duration,
    /// Replace argument values with a placeholder in error events.
    pub mask_args: bool,
    /// Report one in every N slow calls per connection. 0 and 1 report all.
    pub sample_every: u32,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            slow_threshold: Duration::from_millis(50),
            mask_args: true,
            sample_every: 1,
        }
    }
}

/// Tracer configuration plus the subscriber its events go to.
#[derive(Debug, Clone)]
pub struct Tracer {
    config: TracerConfig,
    dispatch: Option<Dispatch>,
}

impl Tracer {
    pub fn new(config: TracerConfig) -> Self {
        Self {
            config,
            dispatch: None,
        }
    }

    /// Send events to `dispatch` instead of the default subscriber.
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    fn emit(&self, f: impl FnOnce()) {
        match &self.dispatch {
            Some(dispatch) => tracing::dispatcher::with_default(dispatch, f),
            None => f(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpKind {
    Exec,
    Query,
}

impl OpKind {
    fn as_str(self) -> &'static str {
        match self {
            OpKind::Exec => "exec",
            OpKind::Query => "query",
        }
    }
}

/// Driver wrapper that instruments every connection it opens.
pub struct TracedDriver<D> {
    base: D,
    tracer: Arc<Tracer>,
    name: &'static str,
}

impl<D: Driver> TracedDriver<D> {
    pub fn new(base: D, tracer: Tracer) -> Self {
        Self {
            base,
            tracer: Arc::new(tracer),
            name: TRACED_DRIVER_NAME,
        }
    }

    /// Override the name reported by [`Driver::name`].
    pub fn named(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }
}

#[async_trait]
impl<D: Driver> Driver for TracedDriver<D> {
    type Target = D::Target;
    type Conn = TracedConnection<D::Conn>;

    fn name(&self) -> &'static str {
        self.name
    }

    async fn open(&self, target: &D::Target) -> Result<Self::Conn, sqlx::Error> {
        let base = self.base.open(target).await?;
        Ok(TracedConnection::new(base, Arc::clone(&self.tracer)))
    }
}

/// A connection whose native calls are timed and logged.
pub struct TracedConnection<C> {
    base: C,
    tracer: Arc<Tracer>,
    calls: u64,
}

impl<C: Connection> TracedConnection<C> {
    pub fn new(base: C, tracer: Arc<Tracer>) -> Self {
        Self {
            base,
            tracer,
            calls: 0,
        }
    }

    fn observe<T>(
        &mut self,
        kind: OpKind,
        sql: &str,
        args: &[Value],
        elapsed: Duration,
        result: &Result<T, DriverError>,
    ) {
        match result {
            // The base was not supposed to skip after advertising the capability,
            // and the fallback path is not ours to time.
            Err(DriverError::Skip) => {}
            Err(DriverError::Sql(err)) => {
                let sql = compact(sql);
                let args = render_args(args, self.tracer.config.mask_args);
                self.tracer.emit(|| {
                    tracing::error!(
                        kind = kind.as_str(),
                        sql = %sql,
                        args = %args,
                        dur = ?elapsed,
                        err = %compact(&err.to_string()),
                        "db.query.error"
                    );
                });
            }
            Ok(_) => {
                let threshold = self.tracer.config.slow_threshold;
                if threshold.is_zero() || elapsed < threshold {
                    return;
                }
                if !self.sampled() {
                    return;
                }
                let sql = compact(sql);
                self.tracer.emit(|| {
                    tracing::warn!(
                        kind = kind.as_str(),
                        sql = %sql,
                        dur = ?elapsed,
                        "db.query.slow"
                    );
                });
            }
        }
    }

    fn sampled(&mut self) -> bool {
        let n = u64::from(self.tracer.config.sample_every);
        if n <= 1 {
            return true;
        }
        self.calls += 1;
        self.calls % n == 0
    }
}

#[async_trait]
impl<C: Connection> Connection for TracedConnection<C> {
    type Row = C::Row;
    type Outcome = C::Outcome;

    fn capabilities(&self) -> Capabilities {
        self.base.capabilities()
    }

    async fn execute(&mut self, sql: &str, args: &[Value]) -> Result<C::Outcome, DriverError> {
        if !self.base.capabilities().contains(Capabilities::EXECUTE) {
            return Err(DriverError::Skip);
        }
        let start = Instant::now();
        let result = self.base.execute(sql, args).await;
        self.observe(OpKind::Exec, sql, args, start.elapsed(), &result);
        result
    }

    async fn query(&mut self, sql: &str, args: &[Value]) -> Result<Vec<C::Row>, DriverError> {
        if !self.base.capabilities().contains(Capabilities::QUERY) {
            return Err(DriverError::Skip);
        }
        let start = Instant::now();
        let result = self.base.query(sql, args).await;
        self.observe(OpKind::Query, sql, args, start.elapsed(), &result);
        result
    }

    async fn execute_prepared(
        &mut self,
        sql: &str,
        args: &[Value],
    ) -> Result<C::Outcome, sqlx::Error> {
        self.base.execute_prepared(sql, args).await
    }

    async fn query_prepared(
        &mut self,
        sql: &str,
        args: &[Value],
    ) -> Result<Vec<C::Row>, sqlx::Error> {
        self.base.query_prepared(sql, args).await
    }

    async fn begin(&mut self) -> Result<(), sqlx::Error> {
        self.base.begin().await
    }

    async fn commit(&mut self) -> Result<(), sqlx::Error> {
        self.base.commit().await
    }

    async fn rollback(&mut self) -> Result<(), sqlx::Error> {
        self.base.rollback().await
    }

    async fn ping(&mut self) -> Result<(), sqlx::Error> {
        self.base.ping().await
    }

    async fn close(self) -> Result<(), sqlx::Error> {
        self.base.close().await
    }
}

/// Collapse all whitespace runs to single spaces so a statement logs on one line.
pub fn compact(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn render_args(args: &[Value], mask: bool) -> String {
    if mask {
        MASKED.to_string()
    } else {
        format!("{:?}", args)
    }
}
