//! Storage layer for the call bridge.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization
//! and embedded SQL migrations. The bridge itself only needs two tables:
//! `businesses` (the Business Profile source, read-only at call time) and
//! `calls` (one record per inbound call).
//!
//! Database work is synchronous; async callers run it inside
//! `tokio::task::spawn_blocking` and never hold a connection across network
//! I/O.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, open, DbPool, DbRuntimeSettings, OpenError, PoolError};
