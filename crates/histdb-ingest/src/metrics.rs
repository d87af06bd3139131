//! In-process metrics for the ingestion subsystem
//!
//! Plain atomics shared between System, Cursor and Session; surfaced
//! through tracing rather than exported, since metrics emission lives
//! outside this subsystem.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A cumulative duration counter
#[derive(Debug, Default)]
pub struct Timer {
    count: AtomicU64,
    total_micros: AtomicU64,
}

impl Timer {
    pub fn record(&self, elapsed: Duration) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.total_micros
            .fetch_add(elapsed.as_micros() as u64, Ordering::Relaxed);
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> Duration {
        Duration::from_micros(self.total_micros.load(Ordering::Relaxed))
    }

    /// Mean recorded duration, zero before the first observation
    pub fn mean(&self) -> Duration {
        let count = self.count();
        if count == 0 {
            return Duration::ZERO;
        }
        self.total() / count as u32
    }
}

/// Metrics for the ingestion subsystem
#[derive(Debug, Default)]
pub struct IngestMetrics {
    /// Time spent clearing ledger ranges
    pub clear_ledger: Timer,
    /// Time spent loading ledger bundles from the source store
    pub load_ledger: Timer,
    /// Time spent emitting and flushing one ledger's rows
    pub ingest_ledger: Timer,
    /// Ledgers successfully ingested since process start
    pub ledgers_ingested: AtomicU64,
}

impl IngestMetrics {
    pub fn ledger_ingested(&self) {
        self.ledgers_ingested.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ingested_count(&self) -> u64 {
        self.ledgers_ingested.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_accumulates() {
        let timer = Timer::default();
        timer.record(Duration::from_millis(10));
        timer.record(Duration::from_millis(30));

        assert_eq!(timer.count(), 2);
        assert_eq!(timer.total(), Duration::from_millis(40));
        assert_eq!(timer.mean(), Duration::from_millis(20));
    }

    #[test]
    fn test_mean_of_empty_timer_is_zero() {
        assert_eq!(Timer::default().mean(), Duration::ZERO);
    }
}
