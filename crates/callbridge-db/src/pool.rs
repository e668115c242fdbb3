//! Connection pool creation.

use crate::migrations::{run_migrations, MigrationError};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::OpenFlags;
use thiserror::Error;

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    pub pool_max_size: u32,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
        }
    }
}

/// Shared SQLite pool handed to request handlers and call sessions.
pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to create database connection pool: {0}")]
    PoolInit(#[from] r2d2::Error),
}

/// Errors from [`open`], which both builds the pool and migrates it.
#[derive(Debug, Error)]
pub enum OpenError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("failed to check out a connection for migrations: {0}")]
    Checkout(r2d2::Error),

    #[error(transparent)]
    Migration(#[from] MigrationError),
}

/// Creates a SQLite pool with WAL journaling, foreign keys and the configured
/// busy timeout applied to every new connection.
///
/// Use a file path in tests as well: each pooled `:memory:` connection would
/// see its own empty database.
pub fn create_pool(db_path: &str, settings: DbRuntimeSettings) -> Result<DbPool, PoolError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

    let manager = SqliteConnectionManager::file(db_path)
        .with_flags(flags)
        .with_init(move |conn| {
            let journal_mode: String =
                conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
            if journal_mode != "wal" && journal_mode != "memory" {
                tracing::warn!(journal_mode = %journal_mode, "sqlite refused WAL journal mode");
            }
            conn.execute_batch(&format!(
                "PRAGMA foreign_keys = ON;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA busy_timeout = {};",
                settings.busy_timeout_ms
            ))
        });

    let pool = Pool::builder()
        .max_size(settings.pool_max_size)
        .build(manager)?;

    Ok(pool)
}

/// Creates the pool and brings the schema up to date.
///
/// Returns the pool together with the number of migrations applied.
pub fn open(db_path: &str, settings: DbRuntimeSettings) -> Result<(DbPool, usize), OpenError> {
    let pool = create_pool(db_path, settings)?;
    let applied = {
        let conn = pool.get().map_err(OpenError::Checkout)?;
        run_migrations(&conn)?
    };
    if applied > 0 {
        tracing::info!(count = applied, path = db_path, "applied database migrations");
    }
    Ok((pool, applied))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_applies_schema_and_pragmas() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bridge.db");
        let settings = DbRuntimeSettings {
            busy_timeout_ms: 2_500,
            pool_max_size: 3,
        };

        let (pool, applied) =
            open(path.to_str().unwrap(), settings).expect("open should succeed");
        assert!(applied > 0);
        assert_eq!(pool.max_size(), 3);

        let conn = pool.get().expect("should get a connection");
        let mode: String = conn
            .query_row("PRAGMA journal_mode;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");

        let fk: i32 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(fk, 1);

        let busy_timeout: i32 = conn
            .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(busy_timeout, 2_500);
    }

    #[test]
    fn reopening_applies_nothing_new() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("bridge.db");
        let path = path.to_str().unwrap();

        let (_pool, first) = open(path, DbRuntimeSettings::default()).unwrap();
        assert!(first > 0);
        let (_pool, second) = open(path, DbRuntimeSettings::default()).unwrap();
        assert_eq!(second, 0);
    }
}
