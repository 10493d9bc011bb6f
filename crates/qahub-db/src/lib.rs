//! Database layer for the QAHub services.
//!
//! Provides SQLite connection pooling (via `r2d2`), WAL-mode initialization,
//! and the embedded schema migrations for every table the core owns:
//! accounts, the token revocation set, the durable topic log with consumer
//! group offsets, and the notification collection.
//!
//! Callers run queries from `tokio::task::spawn_blocking`, taking a pooled
//! connection per unit of work.

mod migrations;
mod pool;

pub use migrations::{run_migrations, MigrationError};
pub use pool::{create_pool, DbPool, DbRuntimeSettings, PoolError};

/// A pooled connection handle.
pub type PooledConnection = r2d2::PooledConnection<r2d2_sqlite::SqliteConnectionManager>;
