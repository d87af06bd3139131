//! Source-store data model
//!
//! Decoded forms of what the source ledger store hands the ingestion
//! subsystem: one closed ledger's header, its transactions, and their
//! fee-change records. The reader that produces these from the source
//! store is a collaborator behind [`LedgerReader`].

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

/// Header of one closed ledger
#[derive(Debug, Clone)]
pub struct LedgerHeader {
    pub sequence: i32,
    pub ledger_hash: String,
    pub previous_ledger_hash: String,
    pub total_coins: i64,
    pub fee_pool: i64,
    pub base_fee: i32,
    pub base_reserve: i32,
    pub max_tx_set_size: i32,
    /// Close time as a unix timestamp
    pub close_time: i64,
    pub protocol_version: i32,
    /// Encoded header payload stored alongside the derived columns
    pub encoded: Option<String>,
}

impl LedgerHeader {
    pub fn closed_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.close_time, 0)
            .single()
            .unwrap_or_else(Utc::now)
    }
}

/// Validity window of a transaction, in unix seconds.
///
/// `max == 0` means the window never closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeBounds {
    pub min: i64,
    pub max: i64,
}

impl TimeBounds {
    /// Literal accepted by the store's int8range type
    pub fn range_literal(&self) -> String {
        if self.max == 0 {
            format!("[{},]", self.min)
        } else {
            format!("[{},{}]", self.min, self.max)
        }
    }
}

/// One transaction as decoded from the source store
#[derive(Debug, Clone)]
pub struct SourceTransaction {
    pub transaction_hash: String,
    pub ledger_sequence: i32,
    /// Position within the ledger's transaction set, starting at 1
    pub application_order: i32,
    pub source_address: String,
    pub account_sequence: i64,
    pub fee_paid: i32,
    pub operation_count: i32,
    pub envelope: String,
    pub result: String,
    pub result_meta: String,
    pub signatures: Vec<String>,
    pub time_bounds: Option<TimeBounds>,
    pub memo_type: String,
    pub memo: Option<String>,
}

/// Fee-change record attached to one transaction
#[derive(Debug, Clone)]
pub struct FeeChanges {
    pub transaction_hash: String,
    pub changes: String,
}

/// One closed ledger's worth of novelty
#[derive(Debug, Clone)]
pub struct LedgerBundle {
    pub sequence: i32,
    pub header: LedgerHeader,
    pub transactions: Vec<SourceTransaction>,
    pub fee_changes: Vec<FeeChanges>,
}

impl LedgerBundle {
    /// Fee-change record for a transaction in this bundle, if present
    pub fn fee_for(&self, transaction_hash: &str) -> Option<&FeeChanges> {
        self.fee_changes
            .iter()
            .find(|f| f.transaction_hash == transaction_hash)
    }

    /// Total operations across the bundle's transactions
    pub fn operation_count(&self) -> i32 {
        self.transactions.iter().map(|tx| tx.operation_count).sum()
    }
}

/// Reader over the source ledger store
///
/// Implementations load one closed ledger per call; `Ok(None)` means the
/// sequence has not closed (or does not exist), which ends the cursor's
/// range early.
#[async_trait]
pub trait LedgerReader: Send + Sync {
    async fn read_ledger(&self, sequence: i32) -> anyhow::Result<Option<LedgerBundle>>;
}
