//! One ingestion run, ledger by ledger

use async_trait::async_trait;
use histdb_common::AssetsModified;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info};

use crate::cursor::Cursor;
use crate::error::IngestError;
use crate::id;
use crate::ingestion::Ingestion;
use crate::metrics::IngestMetrics;
use crate::source::LedgerBundle;
use crate::system::WriterGuard;

/// Decides which rows one ledger bundle produces.
///
/// The extraction of effects/operations/trades from decoded payloads
/// lives outside this crate; implementations receive the bundle and the
/// writer and call the typed emitters.
#[async_trait]
pub trait LedgerProcessor: Send {
    async fn process(
        &mut self,
        ingestion: &mut Ingestion,
        bundle: &LedgerBundle,
        assets_modified: &mut AssetsModified,
    ) -> anyhow::Result<()>;
}

/// Failures that terminate a session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("failed to load ledger {sequence}: {source}")]
    Load {
        sequence: i32,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to process ledger {sequence}: {source}")]
    Process {
        sequence: i32,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Ingest(#[from] IngestError),
}

/// A single attempt at ingesting a ledger range into the history store.
///
/// Drives the cursor, hands each bundle to the processor, and flushes
/// once per ledger, so failure granularity is per-ledger. A cursor read
/// error closes the writer like normal exhaustion does; on a processor or
/// flush error the transaction is left open and rolling back is the
/// caller's decision.
pub struct Session {
    pub cursor: Cursor,
    pub ingestion: Ingestion,
    processor: Box<dyn LedgerProcessor>,
    metrics: Arc<IngestMetrics>,

    /// Clear existing data for the target range before ingesting
    clear_existing: bool,
    /// Suppress per-ledger progress reporting
    skip_progress_report: bool,

    ingested: usize,
    err: Option<SessionError>,

    // Held for the session's lifetime to keep the single-writer lock.
    _guard: Option<WriterGuard>,
}

impl Session {
    pub fn new(
        cursor: Cursor,
        ingestion: Ingestion,
        processor: Box<dyn LedgerProcessor>,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            cursor,
            ingestion,
            processor,
            metrics,
            clear_existing: false,
            skip_progress_report: false,
            ingested: 0,
            err: None,
            _guard: None,
        }
    }

    pub fn clear_existing(mut self, clear: bool) -> Self {
        self.clear_existing = clear;
        self
    }

    pub fn skip_progress_report(mut self, skip: bool) -> Self {
        self.skip_progress_report = skip;
        self
    }

    pub(crate) fn with_guard(mut self, guard: WriterGuard) -> Self {
        self._guard = Some(guard);
        self
    }

    /// Ledgers successfully ingested so far
    pub fn ingested(&self) -> usize {
        self.ingested
    }

    /// The error that terminated this session, if any
    pub fn error(&self) -> Option<&SessionError> {
        self.err.as_ref()
    }

    /// Ingested count on success, terminal error otherwise
    pub fn result(&self) -> Result<usize, &SessionError> {
        match &self.err {
            Some(e) => Err(e),
            None => Ok(self.ingested),
        }
    }

    /// Run the session to completion
    pub async fn run(&mut self) {
        match self.run_inner().await {
            Ok(()) => {
                info!(ingested = self.ingested, "ingestion session finished");
            },
            Err(e) => {
                error!(error = %e, ingested = self.ingested, "ingestion session failed");
                self.err = Some(e);
            },
        }
    }

    async fn run_inner(&mut self) -> Result<(), SessionError> {
        self.ingestion.start().await.map_err(SessionError::Ingest)?;

        if self.clear_existing {
            let started = Instant::now();
            let start = id::ledger(self.cursor.first);
            let end = id::ledger_end(self.cursor.last);
            self.ingestion.clear(start, end).await?;
            self.metrics.clear_ledger.record(started.elapsed());
        }

        loop {
            let sequence = self.cursor.position();
            let bundle = match self.cursor.next_ledger().await {
                Ok(Some(bundle)) => bundle,
                Ok(None) => break,
                Err(source) => {
                    // Nothing is buffered for the failed ledger; commit
                    // what previous flushes left behind and stop.
                    self.ingestion.close().await?;
                    return Err(SessionError::Load { sequence, source });
                },
            };

            let started = Instant::now();
            self.processor
                .process(
                    &mut self.ingestion,
                    &bundle,
                    self.cursor.assets_modified_mut(),
                )
                .await
                .map_err(|source| SessionError::Process {
                    sequence: bundle.sequence,
                    source,
                })?;
            self.ingestion.flush().await?;

            self.metrics.ingest_ledger.record(started.elapsed());
            self.metrics.ledger_ingested();
            self.ingested += 1;

            if !self.skip_progress_report {
                info!(
                    sequence = bundle.sequence,
                    transactions = bundle.transactions.len(),
                    "ledger ingested"
                );
            }
        }

        self.ingestion.close().await.map_err(SessionError::Ingest)?;
        Ok(())
    }
}
