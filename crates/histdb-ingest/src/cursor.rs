//! Sequential reader over a source ledger range

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use histdb_common::{Asset, AssetsModified};
use tracing::warn;

use crate::metrics::IngestMetrics;
use crate::source::{LedgerBundle, LedgerReader};

/// Iterates the source store's closed ledgers over an inclusive
/// `[first, last]` sequence range, producing one [`LedgerBundle`] per
/// step. Strictly sequential; stops at `last`, at the first sequence the
/// source has not closed, or on the first read error.
pub struct Cursor {
    /// Beginning of the range (inclusive)
    pub first: i32,
    /// End of the range (inclusive)
    pub last: i32,
    reader: Arc<dyn LedgerReader>,
    metrics: Arc<IngestMetrics>,
    assets_modified: AssetsModified,
    next: i32,
}

impl Cursor {
    pub fn new(
        first: i32,
        last: i32,
        reader: Arc<dyn LedgerReader>,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            first,
            last,
            reader,
            metrics,
            assets_modified: AssetsModified::new(),
            next: first,
        }
    }

    /// The sequence the next step will load
    pub fn position(&self) -> i32 {
        self.next
    }

    /// Load the next ledger bundle in the range; `Ok(None)` when the
    /// range is exhausted.
    pub async fn next_ledger(&mut self) -> anyhow::Result<Option<LedgerBundle>> {
        if self.next > self.last {
            return Ok(None);
        }

        let sequence = self.next;
        let started = Instant::now();
        let bundle = self
            .reader
            .read_ledger(sequence)
            .await
            .with_context(|| format!("failed to load ledger {}", sequence))?;
        self.metrics.load_ledger.record(started.elapsed());

        match bundle {
            Some(bundle) => {
                self.next += 1;
                Ok(Some(bundle))
            },
            None => {
                // The source has not closed this sequence yet; end the
                // range here rather than failing the session.
                warn!(sequence, last = self.last, "source ledger missing, ending range early");
                self.next = self.last + 1;
                Ok(None)
            },
        }
    }

    /// Record an asset touched while processing the current ledger
    pub fn note_asset(&mut self, asset: Asset) {
        self.assets_modified.insert(asset);
    }

    /// Distinct assets touched so far in this run
    pub fn assets_modified(&self) -> &AssetsModified {
        &self.assets_modified
    }

    pub fn assets_modified_mut(&mut self) -> &mut AssetsModified {
        &mut self.assets_modified
    }
}
