//! Application store: a traced SQLite handle with its schema migrated.

use futures::future::BoxFuture;
use rust_embed::Embed;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{ConnectOptions, Row};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};

use crate::db::{
    migrate, Database, Driver, EmbeddedSource, MigrateError, MigrationSource, SqliteDriver,
    TracedDriver, Tracer, Transaction,
};

const BUSY_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Embed)]
#[folder = "migrations/"]
struct Migrations;

pub type StoreDriver = TracedDriver<SqliteDriver>;
pub type StoreDb = Database<StoreDriver>;
pub type StoreTx<'a> = Transaction<'a, StoreDriver>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store: create dir {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store: ping: {0}")]
    Ping(#[source] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] MigrateError),
}

/// The migrated database the application runs against.
pub struct Store {
    db: StoreDb,
}

impl Store {
    /// Open the database at `path` and apply the embedded migrations.
    pub async fn open(path: &Path, tracer: Tracer) -> Result<Self, StoreError> {
        Self::open_with(path, tracer, &EmbeddedSource::<Migrations>::new()).await
    }

    /// Open the database at `path` and apply migrations from `source`.
    pub async fn open_with(
        path: &Path,
        tracer: Tracer,
        source: &dyn MigrationSource,
    ) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| StoreError::CreateDir {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let driver = TracedDriver::new(SqliteDriver, tracer);
        info!(driver = driver.name(), path = %path.display(), "store.init");
        let db = Database::new(driver, connect_options(path));

        db.ping().await.map_err(StoreError::Ping)?;

        if let Err(e) = migrate(&db, source).await {
            if let Err(close_err) = db.close().await {
                error!(err = %close_err, "store.close");
            }
            return Err(e.into());
        }

        Ok(Store { db })
    }

    pub fn db(&self) -> &StoreDb {
        &self.db
    }

    /// Highest schema version recorded in the ledger, 0 when none.
    pub async fn last_migration_version(&self) -> Result<i64, sqlx::Error> {
        let rows = self
            .db
            .query("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", &[])
            .await?;
        match rows.first() {
            Some(row) => row.try_get(0),
            None => Ok(0),
        }
    }

    /// Run `f` inside a transaction, committing on `Ok` and rolling back on `Err`.
    pub async fn with_tx<'s, T, F>(&'s self, f: F) -> Result<T, sqlx::Error>
    where
        T: Send,
        F: for<'t> FnOnce(&'t mut StoreTx<'s>) -> BoxFuture<'t, Result<T, sqlx::Error>>,
    {
        let mut tx = self.db.begin().await?;
        match f(&mut tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rb) = tx.rollback().await {
                    error!(error = %rb, "store.tx.rollback");
                }
                Err(e)
            }
        }
    }

    pub async fn close(&self) {
        if let Err(e) = self.db.close().await {
            error!(err = %e, "store.close");
        }
    }
}

fn connect_options(path: &Path) -> SqliteConnectOptions {
    SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .foreign_keys(true)
        .busy_timeout(BUSY_TIMEOUT)
        .journal_mode(SqliteJournalMode::Wal)
        .disable_statement_logging()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemorySource, TracerConfig, Value};
    use tempfile::TempDir;

    fn db_path(dir: &TempDir) -> PathBuf {
        dir.path().join("nested").join("test.db")
    }

    #[tokio::test]
    async fn test_open_creates_database_and_applies_embedded_migrations() {
        let temp_dir = TempDir::new().unwrap();
        let path = db_path(&temp_dir);

        let store = Store::open(&path, Tracer::new(TracerConfig::default()))
            .await
            .expect("open failed");
        assert!(path.exists());
        assert_eq!(store.last_migration_version().await.unwrap(), 1);
        store.close().await;
    }

    #[tokio::test]
    async fn test_reopen_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let path = db_path(&temp_dir);

        let store = Store::open(&path, Tracer::new(TracerConfig::default()))
            .await
            .unwrap();
        store.close().await;

        let store = Store::open(&path, Tracer::new(TracerConfig::default()))
            .await
            .unwrap();
        let rows = store
            .db()
            .query("SELECT COUNT(*) FROM schema_migrations", &[])
            .await
            .unwrap();
        assert_eq!(rows[0].get::<i64, _>(0), 1);
        store.close().await;
    }

    #[tokio::test]
    async fn test_pragmas_configured() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(&db_path(&temp_dir), Tracer::new(TracerConfig::default()))
            .await
            .unwrap();

        let rows = store.db().query("PRAGMA foreign_keys", &[]).await.unwrap();
        assert_eq!(rows[0].get::<i64, _>(0), 1);

        let rows = store.db().query("PRAGMA journal_mode", &[]).await.unwrap();
        let mode: String = rows[0].get(0);
        assert_eq!(mode, "wal");

        let rows = store.db().query("PRAGMA busy_timeout", &[]).await.unwrap();
        assert_eq!(rows[0].get::<i64, _>(0), 5000);
    }

    #[tokio::test]
    async fn test_failed_migration_fails_open() {
        let temp_dir = TempDir::new().unwrap();
        let source = MemorySource::new().with("1_bad.sql", "NOT SQL AT ALL;");
        let result = Store::open_with(
            &db_path(&temp_dir),
            Tracer::new(TracerConfig::default()),
            &source,
        )
        .await;
        assert!(matches!(
            result,
            Err(StoreError::Migrate(MigrateError::Exec { version: 1, .. }))
        ));
    }

    #[tokio::test]
    async fn test_with_tx_commits_and_rolls_back() {
        let temp_dir = TempDir::new().unwrap();
        let store = Store::open(&db_path(&temp_dir), Tracer::new(TracerConfig::default()))
            .await
            .unwrap();

        store
            .with_tx(|tx| {
                Box::pin(async move {
                    tx.execute(
                        "INSERT INTO settings (key, value) VALUES (?, ?)",
                        &[Value::from("theme"), Value::from("dark")],
                    )
                    .await?;
                    Ok(())
                })
            })
            .await
            .unwrap();

        let result: Result<(), sqlx::Error> = store
            .with_tx(|tx| {
                Box::pin(async move {
                    tx.execute(
                        "INSERT INTO settings (key, value) VALUES (?, ?)",
                        &[Value::from("lang"), Value::from("fr")],
                    )
                    .await?;
                    Err(sqlx::Error::RowNotFound)
                })
            })
            .await;
        assert!(matches!(result, Err(sqlx::Error::RowNotFound)));

        let rows = store
            .db()
            .query("SELECT key FROM settings ORDER BY key", &[])
            .await
            .unwrap();
        let keys: Vec<String> = rows.iter().map(|r| r.get(0)).collect();
        assert_eq!(keys, vec!["theme".to_string()]);
    }
}
