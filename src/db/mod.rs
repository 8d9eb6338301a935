//! Database module for SQLite operations.
//!
//! This module provides:
//! - A driver seam with capability-checked optional operations
//! - Driver-level SQL tracing (errors, slow queries, sampling)
//! - A single-connection database handle with transactions
//! - Transactional, versioned schema migrations

pub mod database;
pub mod driver;
pub mod migrations;
pub mod sqlite;
pub mod tracer;

pub use database::{Database, OutcomeOf, RowOf, Transaction};
pub use driver::{Capabilities, Connection, Driver, DriverError, Value};
pub use migrations::{
    discover, migrate, EmbeddedSource, MemorySource, MigrateError, MigrationSource, MigrationUnit,
};
pub use sqlite::{SqliteConn, SqliteDriver};
pub use tracer::{TracedConnection, TracedDriver, Tracer, TracerConfig, TRACED_DRIVER_NAME};
