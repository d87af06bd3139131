//! Process-wide ingestion handle and the single-writer protocol

use sqlx::PgPool;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::info;

use crate::config::IngestConfig;
use crate::cursor::Cursor;
use crate::db::{self, DbError};
use crate::error::IngestError;
use crate::id;
use crate::ingestion::Ingestion;
use crate::metrics::IngestMetrics;
use crate::session::{LedgerProcessor, Session};
use crate::source::LedgerReader;

/// Failures creating or admitting ingestion work
#[derive(Error, Debug)]
pub enum SystemError {
    /// Another session holds the writer lock
    #[error("an ingestion session is already running: {active}")]
    Busy { active: String },

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

/// Ownership of the single-writer protocol.
///
/// At most one session may write at a time; `try_acquire` either takes
/// ownership or reports which session currently holds it — it never
/// blocks. The current-session label lives inside the lock and is
/// cleared when the returned guard drops.
#[derive(Debug, Default, Clone)]
pub struct WriterLock {
    active: Arc<Mutex<Option<String>>>,
}

impl WriterLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking acquisition; the label identifies the holder in the
    /// conflict error observed by later attempts.
    pub fn try_acquire(&self, label: impl Into<String>) -> Result<WriterGuard, SystemError> {
        let mut slot = self.active.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(active) = slot.as_ref() {
            return Err(SystemError::Busy {
                active: active.clone(),
            });
        }
        *slot = Some(label.into());
        Ok(WriterGuard {
            active: Arc::clone(&self.active),
        })
    }

    /// Label of the session currently holding the lock
    pub fn holder(&self) -> Option<String> {
        self.active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

/// Releases the writer lock on drop
#[derive(Debug)]
pub struct WriterGuard {
    active: Arc<Mutex<Option<String>>>,
}

impl Drop for WriterGuard {
    fn drop(&mut self) {
        let mut slot = self.active.lock().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }
}

/// Options for one ingestion session
#[derive(Debug, Clone)]
pub struct SessionOpts {
    /// First ledger sequence to ingest (inclusive)
    pub first: i32,
    /// Last ledger sequence to ingest (inclusive)
    pub last: i32,
    /// Clear existing data for the range before ingesting
    pub clear_existing: bool,
    /// Suppress per-ledger progress reporting
    pub skip_progress_report: bool,
}

/// The data ingestion subsystem: owns both store connections, the shared
/// metrics, the network passphrase, and the writer lock that serializes
/// sessions.
pub struct System {
    source_db: PgPool,
    history_db: PgPool,
    metrics: Arc<IngestMetrics>,
    /// Passphrase of the network being imported
    pub network: String,
    /// Minimum ledgers to keep when enforcing retention; 0 keeps all
    pub retention_count: u32,
    writer: WriterLock,
}

impl System {
    pub fn new(source_db: PgPool, history_db: PgPool, network: impl Into<String>) -> Self {
        Self {
            source_db,
            history_db,
            metrics: Arc::new(IngestMetrics::default()),
            network: network.into(),
            retention_count: 0,
            writer: WriterLock::new(),
        }
    }

    /// Connect both stores from configuration
    pub async fn connect(config: &IngestConfig) -> Result<Self, SystemError> {
        let source_db = db::create_pool(&config.source_db).await?;
        let history_db = db::create_pool(&config.history_db).await?;
        db::health_check(&source_db).await?;
        db::health_check(&history_db).await?;

        let mut system = Self::new(source_db, history_db, config.network.clone());
        system.retention_count = config.retention_count;
        Ok(system)
    }

    pub fn metrics(&self) -> Arc<IngestMetrics> {
        self.metrics.clone()
    }

    pub fn history_db(&self) -> &PgPool {
        &self.history_db
    }

    pub fn source_db(&self) -> &PgPool {
        &self.source_db
    }

    /// Label of the currently running session, if any
    pub fn current_session(&self) -> Option<String> {
        self.writer.holder()
    }

    /// Create a session for `[opts.first, opts.last]`, taking the writer
    /// lock. Fails with [`SystemError::Busy`] while another session is
    /// active instead of racing shared connection state; the lock is
    /// released when the returned session is dropped.
    pub fn try_start_session(
        &self,
        opts: SessionOpts,
        reader: Arc<dyn LedgerReader>,
        processor: Box<dyn LedgerProcessor>,
    ) -> Result<Session, SystemError> {
        let label = format!("ledgers [{}, {}]", opts.first, opts.last);
        let guard = self.writer.try_acquire(label)?;

        let cursor = Cursor::new(opts.first, opts.last, reader, self.metrics.clone());
        let ingestion = Ingestion::new(self.history_db.clone());

        Ok(
            Session::new(cursor, ingestion, processor, self.metrics.clone())
                .clear_existing(opts.clear_existing)
                .skip_progress_report(opts.skip_progress_report)
                .with_guard(guard),
        )
    }

    /// Drop history below the retention floor implied by
    /// `latest_sequence` and the configured retention count. Takes the
    /// writer lock like any other write.
    pub async fn enforce_retention(&self, latest_sequence: i32) -> Result<(), SystemError> {
        if self.retention_count == 0 {
            return Ok(());
        }

        let floor = latest_sequence - self.retention_count as i32 + 1;
        if floor <= 1 {
            return Ok(());
        }

        let _guard = self.writer.try_acquire("retention")?;
        let started = std::time::Instant::now();

        let mut ingestion = Ingestion::new(self.history_db.clone());
        ingestion.start().await.map_err(SystemError::Ingest)?;
        ingestion.clear(0, id::ledger(floor)).await?;
        ingestion.close().await.map_err(SystemError::Ingest)?;

        self.metrics.clear_ledger.record(started.elapsed());
        info!(floor, "enforced history retention");
        Ok(())
    }
}
