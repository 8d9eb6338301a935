//! Versioned schema migrations.
//!
//! Migration artifacts are named `<version>_<description>` (for example
//! `001_init.sql`) and hold one or more SQL statements. A run discovers and
//! sorts them, then applies every version above the ledger's current maximum
//! inside one transaction, recording each applied version in
//! `schema_migrations`. Any failure rolls the whole run back.

use rust_embed::Embed;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::marker::PhantomData;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info};

use super::database::Database;
use super::driver::{Connection, Driver, Value};

const CREATE_LEDGER: &str = "CREATE TABLE IF NOT EXISTS schema_migrations(version INTEGER PRIMARY KEY);";
const CURRENT_VERSION: &str = "SELECT COALESCE(MAX(version), 0) FROM schema_migrations";
const RECORD_VERSION: &str = "INSERT INTO schema_migrations(version) VALUES (?)";

#[derive(Debug, Error)]
pub enum MigrateError {
    #[error("migrate: bad name {name:?}: {reason}")]
    BadName { name: String, reason: String },
    #[error("migrate: duplicate version {version}: {first:?} and {second:?}")]
    Duplicate {
        version: i64,
        first: String,
        second: String,
    },
    #[error("migrate: read {name:?}: {reason}")]
    Read { name: String, reason: String },
    #[error("migrate: begin: {0}")]
    Begin(#[source] sqlx::Error),
    #[error("migrate: create table: {0}")]
    Ledger(#[source] sqlx::Error),
    #[error("migrate: current version: {0}")]
    CurrentVersion(#[source] sqlx::Error),
    #[error("migrate: exec {version} ({name}): {source}")]
    Exec {
        version: i64,
        name: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("migrate: record {version}: {source}")]
    Record {
        version: i64,
        #[source]
        source: sqlx::Error,
    },
    #[error("migrate: commit: {0}")]
    Commit(#[source] sqlx::Error),
}

/// One versioned batch of schema statements.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationUnit {
    pub version: i64,
    pub name: String,
    pub sql: String,
}

/// A top-level entry of a migration source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceEntry {
    pub name: String,
    pub is_dir: bool,
}

/// A fixed collection of migration artifacts.
pub trait MigrationSource: Send + Sync {
    fn entries(&self) -> Result<Vec<SourceEntry>, MigrateError>;

    fn read(&self, name: &str) -> Result<Cow<'_, [u8]>, MigrateError>;
}

/// Artifacts compiled into the binary with `#[derive(Embed)]`.
pub struct EmbeddedSource<E> {
    _assets: PhantomData<fn() -> E>,
}

impl<E: Embed> EmbeddedSource<E> {
    pub fn new() -> Self {
        Self {
            _assets: PhantomData,
        }
    }
}

impl<E: Embed> Default for EmbeddedSource<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: Embed> MigrationSource for EmbeddedSource<E> {
    fn entries(&self) -> Result<Vec<SourceEntry>, MigrateError> {
        Ok(top_level_entries(E::iter()))
    }

    fn read(&self, name: &str) -> Result<Cow<'_, [u8]>, MigrateError> {
        E::get(name)
            .map(|file| Cow::Owned(file.data.into_owned()))
            .ok_or_else(|| MigrateError::Read {
                name: name.to_string(),
                reason: "not found".to_string(),
            })
    }
}

/// Artifacts held in memory, keyed by path. A `/` in a path makes its first
/// segment a directory entry.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    files: BTreeMap<String, Vec<u8>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, path: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        self.files.insert(path.into(), contents.into());
        self
    }
}

impl MigrationSource for MemorySource {
    fn entries(&self) -> Result<Vec<SourceEntry>, MigrateError> {
        Ok(top_level_entries(self.files.keys().map(|k| Cow::Borrowed(k.as_str()))))
    }

    fn read(&self, name: &str) -> Result<Cow<'_, [u8]>, MigrateError> {
        self.files
            .get(name)
            .map(|data| Cow::Borrowed(data.as_slice()))
            .ok_or_else(|| MigrateError::Read {
                name: name.to_string(),
                reason: "not found".to_string(),
            })
    }
}

fn top_level_entries<'a>(paths: impl Iterator<Item = Cow<'a, str>>) -> Vec<SourceEntry> {
    let mut files = BTreeSet::new();
    let mut dirs = BTreeSet::new();
    for path in paths {
        match path.split_once('/') {
            Some((dir, _)) => {
                dirs.insert(dir.to_string());
            }
            None => {
                files.insert(path.into_owned());
            }
        }
    }
    dirs.into_iter()
        .map(|name| SourceEntry { name, is_dir: true })
        .chain(files.into_iter().map(|name| SourceEntry { name, is_dir: false }))
        .collect()
}

/// Parse the version prefix of an artifact name such as `007_add_index.sql`.
pub fn parse_version(name: &str) -> Result<i64, MigrateError> {
    let bad = |reason: &str| MigrateError::BadName {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    let (prefix, _) = name
        .split_once('_')
        .ok_or_else(|| bad("expected <version>_<description>"))?;
    if prefix.is_empty() || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return Err(bad("version prefix is not a number"));
    }
    let version: i64 = prefix
        .parse()
        .map_err(|e: std::num::ParseIntError| bad(&e.to_string()))?;
    if version <= 0 {
        return Err(bad("version must be positive"));
    }
    Ok(version)
}

/// Read every artifact of `source`, sorted by version.
///
/// Directories and names starting with `.` are skipped. A malformed name, a
/// duplicate version or an unreadable artifact fails the whole discovery.
pub fn discover(source: &dyn MigrationSource) -> Result<Vec<MigrationUnit>, MigrateError> {
    let mut units = Vec::new();
    let mut seen: HashMap<i64, String> = HashMap::new();

    for entry in source.entries()? {
        if entry.is_dir || entry.name.starts_with('.') {
            continue;
        }
        let version = parse_version(&entry.name)?;
        if let Some(prev) = seen.get(&version) {
            return Err(MigrateError::Duplicate {
                version,
                first: prev.clone(),
                second: entry.name,
            });
        }
        seen.insert(version, entry.name.clone());

        let data = source.read(&entry.name)?;
        let sql = std::str::from_utf8(&data)
            .map_err(|e| MigrateError::Read {
                name: entry.name.clone(),
                reason: e.to_string(),
            })?
            .to_string();

        units.push(MigrationUnit {
            version,
            name: entry.name,
            sql,
        });
    }

    units.sort_by_key(|u| u.version);
    Ok(units)
}

/// Apply all pending migrations from `source` in a single transaction.
///
/// Returns the number of units applied; zero when the database is already
/// current.
pub async fn migrate<D>(db: &Database<D>, source: &dyn MigrationSource) -> Result<usize, MigrateError>
where
    D: Driver,
    D::Conn: Connection<Row = SqliteRow>,
{
    let start = Instant::now();
    let units = discover(source)?;

    let mut tx = db.begin().await.map_err(MigrateError::Begin)?;
    let applied = match apply_pending(&mut tx, &units).await {
        Ok(applied) => applied,
        Err(e) => {
            if let Err(rb) = tx.rollback().await {
                error!(error = %rb, "db.migrate.rollback");
            }
            return Err(e);
        }
    };
    tx.commit().await.map_err(MigrateError::Commit)?;

    if applied > 0 {
        info!(applied, dur = ?start.elapsed(), "db.migrate.done");
    }
    Ok(applied)
}

async fn apply_pending<D>(
    tx: &mut super::database::Transaction<'_, D>,
    units: &[MigrationUnit],
) -> Result<usize, MigrateError>
where
    D: Driver,
    D::Conn: Connection<Row = SqliteRow>,
{
    tx.execute(CREATE_LEDGER, &[])
        .await
        .map_err(MigrateError::Ledger)?;

    let rows = tx
        .query(CURRENT_VERSION, &[])
        .await
        .map_err(MigrateError::CurrentVersion)?;
    let current: i64 = match rows.first() {
        Some(row) => row.try_get(0).map_err(MigrateError::CurrentVersion)?,
        None => 0,
    };

    let mut applied = 0;
    for unit in units.iter().filter(|u| u.version > current) {
        tx.execute(&unit.sql, &[])
            .await
            .map_err(|source| MigrateError::Exec {
                version: unit.version,
                name: unit.name.clone(),
                source,
            })?;
        tx.execute(RECORD_VERSION, &[Value::from(unit.version)])
            .await
            .map_err(|source| MigrateError::Record {
                version: unit.version,
                source,
            })?;

        applied += 1;
        info!(version = unit.version, name = %unit.name, "db.migrate.applied");
    }
    Ok(applied)
}
