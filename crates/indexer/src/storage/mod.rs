//! Storage layer for the Civitas indexer (the projection store).
//!
//! This module provides database operations for:
//! - Benefits (guarded, monotonic status transitions)
//! - Vendors (latest-wins by block coordinates)
//! - Ledger event journal (replay detection)
//! - Sync state (indexer progress tracking)

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

pub mod benefit;
pub mod journal;
pub mod sync;
pub mod types;
pub mod vendor;

pub use types::*;

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
    /// This will create the database file if it doesn't exist. Call
    /// [`Storage::run_migrations`] afterwards to create the schema.
    ///
    /// # Arguments
    /// * `database_url` - SQLite database URL (e.g., "sqlite://civitas.db")
    /// * `max_connections` - Pool ceiling (default 5)
    /// * `min_connections` - Pool floor (default 1)
    ///
    /// # Example
    /// ```no_run
    /// # use civitas_indexer::storage::Storage;
    /// # async fn example() -> anyhow::Result<()> {
    /// let storage = Storage::new("sqlite://civitas.db", None, None).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(
        database_url: &str,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
    ) -> Result<Self> {
        info!("Connecting to database: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.unwrap_or(5))
            .min_connections(min_connections.unwrap_or(1))
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        info!("Database connection established");

        Ok(Self { pool })
    }

    /// Create a new storage instance with a specific file path.
    pub async fn new_with_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let database_url = format!("sqlite://{}", path.display());
        Self::new(&database_url, None, None).await
    }

    /// Run database migrations.
    ///
    /// This should be called once during initialization to ensure the schema is up to date.
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
        let benefit_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM benefits")
            .fetch_one(&self.pool)
            .await?;

        let redeemed_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM benefits WHERE status = 'Redeemed'")
                .fetch_one(&self.pool)
                .await?;

        let vendor_count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM vendors WHERE is_verified = 1")
                .fetch_one(&self.pool)
                .await?;

        let event_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ledger_events")
            .fetch_one(&self.pool)
            .await?;

        let sync_state = self.get_sync_state().await?;

        Ok(DatabaseStats {
            benefit_count: benefit_count as u64,
            redeemed_count: redeemed_count as u64,
            verified_vendor_count: vendor_count as u64,
            event_count: event_count as u64,
            last_block_number: sync_state.last_block_number,
        })
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
    /// Total number of projected benefits
    pub benefit_count: u64,

    /// Benefits in the Redeemed state
    pub redeemed_count: u64,

    /// Vendors currently verified
    pub verified_vendor_count: u64,

    /// Rows in the ledger event journal
    pub event_count: u64,

    /// Last processed block number
    pub last_block_number: u64,
}
