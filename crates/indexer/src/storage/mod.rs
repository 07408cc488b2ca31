//! Storage layer for the issue-tracker mirror.
//!
//! This module provides database operations for:
//! - Organizations and projects (idempotent creation keyed by chain id)
//! - Issues and their append-only transaction trail (atomic batches)
//! - Stacks attached to projects
//!
//! Every multi-row write for one event runs inside a single SQLite
//! transaction; dropping the transaction on error rolls it back.

use anyhow::{Context, Result};
use chrono::DateTime;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use issuetrack_core::CommitTime;

pub mod issue;
pub mod organization;
pub mod stack;
pub mod types;

pub use types::*;

/// Default pool size when none is configured.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const DEFAULT_MIN_CONNECTIONS: u32 = 1;

/// How long a writer waits for the SQLite write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database storage for the indexer.
///
/// Provides async access to SQLite database with connection pooling.
#[derive(Debug, Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance with the given database URL.
    ///
    /// This will create the database file if it doesn't exist. Foreign keys are
    /// enforced so that a child row can never reference a missing parent.
    ///
    /// # Arguments
    /// * `database_url` - SQLite database URL (e.g., "sqlite://issuetrack.db")
    /// * `max_connections` - Pool upper bound (defaults to 5)
    /// * `min_connections` - Pool lower bound (defaults to 1)
    ///
    /// # Example
    /// ```no_run
    /// # use issuetrack_indexer::storage::Storage;
    /// # async fn example() -> anyhow::Result<()> {
    /// let storage = Storage::new("sqlite://issuetrack.db", None, None).await?;
    /// storage.run_migrations().await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(
        database_url: &str,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
    ) -> Result<Self> {
        info!("Connecting to database: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {}", database_url))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS))
            .min_connections(min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS))
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        info!("Database connection established");

        Ok(Self { pool })
    }

    /// Create a new storage instance with a specific file path.
    pub async fn new_with_path<P: AsRef<Path>>(
        path: P,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
    ) -> Result<Self> {
        let database_url = format!("sqlite://{}", path.as_ref().display());
        Self::new(&database_url, max_connections, min_connections).await
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Migrations completed successfully");

        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection");
        self.pool.close().await;
    }

    /// Get database statistics.
    pub async fn stats(&self) -> Result<DatabaseStats> {
        Ok(DatabaseStats {
            organization_count: self.count_rows("organizations").await?,
            project_count: self.count_rows("projects").await?,
            issue_count: self.count_rows("issues").await?,
            transaction_count: self.count_rows("transactions").await?,
            stack_count: self.count_rows("stacks").await?,
        })
    }

    async fn count_rows(&self, table: &str) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {table}");
        let count: i64 = sqlx::query_scalar(&sql)
            .fetch_one(&self.pool)
            .await
            .with_context(|| format!("Failed to count {table}"))?;

        Ok(count as u64)
    }

    /// Check database health.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database health check failed")?;

        Ok(())
    }
}

/// Database statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Total number of organizations
    pub organization_count: u64,

    /// Total number of projects
    pub project_count: u64,

    /// Total number of issues
    pub issue_count: u64,

    /// Total number of audit rows
    pub transaction_count: u64,

    /// Total number of stacks
    pub stack_count: u64,
}

/// Decode a persisted unix-seconds column.
pub(crate) fn commit_time_from_db(secs: i64) -> std::result::Result<CommitTime, sqlx::Error> {
    DateTime::from_timestamp(secs, 0)
        .ok_or_else(|| sqlx::Error::Decode(format!("timestamp out of range: {secs}").into()))
}

/// Whether a write failed because a referenced parent row is missing.
pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db_err| db_err.is_foreign_key_violation())
}
