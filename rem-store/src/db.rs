//! Database connection pool
//!
//! deadpool-postgres over tokio-postgres. Connection-level failures classify
//! as `StoreError::Transient` so callers can retry with jitter; everything
//! else surfaces as a plain database error.

use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use rem_core::StoreError;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;
use tokio_postgres::NoTls;

/// Database connection pool configuration.
#[derive(Debug, Clone)]
pub struct DbConfig {
    /// Postgres connection URL.
    pub url: String,
    /// Maximum pool size.
    pub max_size: usize,
    /// Connection timeout.
    pub timeout: Duration,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "postgres://postgres@localhost:5432/rem".to_string(),
            max_size: 16,
            timeout: Duration::from_secs(30),
        }
    }
}

impl DbConfig {
    /// Environment variables:
    /// - `P8_DATABASE_URL` (default: postgres://postgres@localhost:5432/rem)
    /// - `P8_DB_POOL_SIZE` (default: 16)
    /// - `P8_DB_TIMEOUT_SECS` (default: 30)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            url: std::env::var("P8_DATABASE_URL").unwrap_or(defaults.url),
            max_size: std::env::var("P8_DB_POOL_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_size),
            timeout: Duration::from_secs(
                std::env::var("P8_DB_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
        }
    }

    /// Create a connection pool from this configuration.
    pub fn create_pool(&self) -> Result<Pool, StoreError> {
        let mut cfg = Config::new();
        cfg.url = Some(self.url.clone());
        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(self.max_size));

        cfg.create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| StoreError::Database(format!("failed to create pool: {e}")))
    }
}

/// Pool wrapper every service holds.
#[derive(Clone)]
pub struct Db {
    pool: Pool,
}

impl Db {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn from_config(config: &DbConfig) -> Result<Self, StoreError> {
        Ok(Self::new(config.create_pool()?))
    }

    /// Current pool size for observability.
    pub fn pool_size(&self) -> usize {
        self.pool.status().size
    }

    /// Get a connection from the pool.
    pub async fn conn(&self) -> Result<deadpool_postgres::Object, StoreError> {
        self.pool.get().await.map_err(pool_error)
    }

    /// Run a statement, returning the affected row count.
    pub async fn execute(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<u64, StoreError> {
        let conn = self.conn().await?;
        conn.execute(sql, params).await.map_err(db_error)
    }

    /// Run a query returning zero-or-one JSONB value in column 0.
    pub async fn query_json_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Option<JsonValue>, StoreError> {
        let conn = self.conn().await?;
        let row = conn.query_opt(sql, params).await.map_err(db_error)?;
        Ok(row.and_then(|r| r.get::<_, Option<JsonValue>>(0)))
    }

    /// Run a query whose column 0 is a JSONB array; flattens to a Vec.
    pub async fn query_json_array(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<JsonValue>, StoreError> {
        let value = self.query_json_opt(sql, params).await?;
        match value {
            None | Some(JsonValue::Null) => Ok(Vec::new()),
            Some(JsonValue::Array(items)) => Ok(items),
            Some(other) => Err(StoreError::Conversion {
                table: "-".to_string(),
                reason: format!("expected JSON array, got {other}"),
            }),
        }
    }

    /// Run a query returning raw rows.
    pub async fn query(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Vec<tokio_postgres::Row>, StoreError> {
        let conn = self.conn().await?;
        conn.query(sql, params).await.map_err(db_error)
    }

    /// Run a query returning exactly one row.
    pub async fn query_one(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<tokio_postgres::Row, StoreError> {
        let conn = self.conn().await?;
        conn.query_one(sql, params).await.map_err(db_error)
    }

    /// Run a query returning zero or one row.
    pub async fn query_opt(
        &self,
        sql: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> Result<Option<tokio_postgres::Row>, StoreError> {
        let conn = self.conn().await?;
        conn.query_opt(sql, params).await.map_err(db_error)
    }
}

/// Map a driver error, classifying connection-level failures as transient.
pub fn db_error(err: tokio_postgres::Error) -> StoreError {
    let transient = err.is_closed()
        || matches!(
            err.code(),
            Some(&SqlState::CONNECTION_EXCEPTION)
                | Some(&SqlState::CONNECTION_FAILURE)
                | Some(&SqlState::CONNECTION_DOES_NOT_EXIST)
                | Some(&SqlState::SQLCLIENT_UNABLE_TO_ESTABLISH_SQLCONNECTION)
                | Some(&SqlState::TOO_MANY_CONNECTIONS)
                | Some(&SqlState::QUERY_CANCELED)
                | Some(&SqlState::ADMIN_SHUTDOWN)
        );
    if transient {
        StoreError::Transient {
            reason: err.to_string(),
        }
    } else {
        StoreError::Database(err.to_string())
    }
}

fn pool_error(err: deadpool_postgres::PoolError) -> StoreError {
    // Pool exhaustion and checkout timeouts are retryable by definition.
    StoreError::Transient {
        reason: err.to_string(),
    }
}
