//! PostgreSQL storage adapter.
//!
//! Cross-worker coordination rests entirely on `FOR UPDATE SKIP LOCKED`:
//! claim and reattempt each run one statement that locks, updates, and
//! returns a single scene row, so any number of stateless workers can pull
//! from the shared queue without a broker.

pub mod project;
pub mod scene;

use glacierwatch_core::error::{GlacierError, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// PostgreSQL-backed store.
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to the database and verify the connection.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
            .map_err(|e| GlacierError::Database(format!("Failed to connect: {e}")))?;

        sqlx::query("SELECT 1")
            .fetch_one(&pool)
            .await
            .map_err(|e| GlacierError::Database(format!("Connection test failed: {e}")))?;

        Ok(Self { pool })
    }

    /// Connect and bring the schema up to date.
    pub async fn with_migrations(database_url: &str) -> Result<Self> {
        let store = Self::connect(database_url).await?;
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run pending migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| GlacierError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}
