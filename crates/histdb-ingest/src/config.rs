//! Ingestion subsystem configuration

use crate::db::{DbConfig, DbError, DbResult};

/// Settings for one ingestion subsystem instance
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Connection settings for the source ledger store
    pub source_db: DbConfig,
    /// Connection settings for the history store being written
    pub history_db: DbConfig,
    /// Passphrase of the network being imported
    pub network: String,
    /// Minimum number of ledgers to keep when enforcing retention,
    /// working back from the latest ledger. 0 keeps everything.
    pub retention_count: u32,
}

impl IngestConfig {
    /// Read configuration from the environment.
    ///
    /// - `SOURCE_DATABASE_URL`, `HISTORY_DATABASE_URL`: store connections
    /// - `NETWORK_PASSPHRASE`: network being imported
    /// - `HISTORY_RETENTION_COUNT`: retention floor (default 0, keep all)
    pub fn from_env() -> DbResult<Self> {
        dotenvy::dotenv().ok();

        let network = std::env::var("NETWORK_PASSPHRASE")
            .map_err(|_| DbError::Config("NETWORK_PASSPHRASE not set".to_string()))?;

        let retention_count = std::env::var("HISTORY_RETENTION_COUNT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);

        Ok(Self {
            source_db: DbConfig::from_env("SOURCE_DATABASE_URL")?,
            history_db: DbConfig::from_env("HISTORY_DATABASE_URL")?,
            network,
            retention_count,
        })
    }
}
