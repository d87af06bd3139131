//! Connection pool configuration and construction

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use thiserror::Error;

/// Database connection errors
#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("Database configuration error: {0}")]
    Config(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Pool settings for one store connection
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub connect_timeout_secs: u64,
    pub idle_timeout_secs: Option<u64>,
}

impl DbConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: 10,
            connect_timeout_secs: 30,
            idle_timeout_secs: Some(600),
        }
    }

    /// Read a pool configuration from the environment.
    ///
    /// `var` names the environment variable holding the connection URL
    /// (the history and source stores are configured independently);
    /// `DB_MAX_CONNECTIONS` and `DB_CONNECT_TIMEOUT` apply to both.
    pub fn from_env(var: &str) -> DbResult<Self> {
        let url = std::env::var(var).map_err(|_| DbError::Config(format!("{} not set", var)))?;

        let mut config = Self::new(url);

        if let Some(max) = std::env::var("DB_MAX_CONNECTIONS")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.max_connections = max;
        }

        if let Some(timeout) = std::env::var("DB_CONNECT_TIMEOUT")
            .ok()
            .and_then(|s| s.parse().ok())
        {
            config.connect_timeout_secs = timeout;
        }

        Ok(config)
    }
}

/// Open a connection pool against one store
pub async fn create_pool(config: &DbConfig) -> DbResult<PgPool> {
    let mut options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.connect_timeout_secs));

    if let Some(idle_timeout) = config.idle_timeout_secs {
        options = options.idle_timeout(Duration::from_secs(idle_timeout));
    }

    let pool = options.connect(&config.url).await?;

    tracing::info!(
        max_connections = config.max_connections,
        "database connection pool created"
    );

    Ok(pool)
}

/// Verify a pool is usable
pub async fn health_check(pool: &PgPool) -> DbResult<()> {
    sqlx::query("SELECT 1")
        .execute(pool)
        .await
        .map(|_| ())
        .map_err(DbError::from)
}
