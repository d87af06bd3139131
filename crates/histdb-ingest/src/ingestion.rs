//! The buffered batch writer
//!
//! [`Ingestion`] accumulates [`Row`]s in memory between `start()` and the
//! next `flush()`/`close()`, then writes them as bounded-size multi-row
//! insert statements inside one transaction. A flush is the unit of
//! atomicity: everything buffered since the last commit is written
//! together or not at all, and callers flush once per processed ledger.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use sqlx::{PgConnection, PgPool, Postgres, QueryBuilder, Transaction};
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

use crate::accounts;
use crate::assets;
use crate::error::{IngestError, IngestResult};
use crate::row::{
    EffectRow, LedgerRow, OperationParticipantRow, OperationRow, Row, Table, TradeRow,
    TransactionParticipantRow, TransactionRow,
};
use crate::source::{FeeChanges, LedgerHeader, SourceTransaction};
use crate::{CURRENT_VERSION, MAX_BATCH_PARAMS};
use histdb_common::Asset;

/// A matched exchange between a seller and a buyer of two distinct assets
#[derive(Debug, Clone)]
pub struct TradeData {
    pub seller_address: String,
    pub offer_id: i64,
    pub asset_sold: Asset,
    pub amount_sold: i64,
    pub asset_bought: Asset,
    pub amount_bought: i64,
}

/// One side of a trade after asset resolution
#[derive(Debug, Clone, PartialEq, Eq)]
struct TradeSide {
    address: String,
    asset_id: i64,
    amount: i64,
}

/// Assign base and counter deterministically: the side holding the asset
/// with the lower resolved identifier is base, regardless of who sold.
/// Returns (base, counter, base_is_seller).
fn canonical_trade(seller: TradeSide, buyer: TradeSide) -> (TradeSide, TradeSide, bool) {
    if seller.asset_id < buyer.asset_id {
        (seller, buyer, true)
    } else {
        (buyer, seller, false)
    }
}

/// An in-progress multi-row insert statement for one table
struct InsertBuilder {
    table: Table,
    builder: QueryBuilder<'static, Postgres>,
    params: usize,
    rows: usize,
}

impl InsertBuilder {
    fn new(table: Table) -> Self {
        let builder = QueryBuilder::new(format!(
            "INSERT INTO {} ({}) VALUES ",
            table.name(),
            table.insert_columns()
        ));
        Self {
            table,
            builder,
            params: 0,
            rows: 0,
        }
    }

    fn push(&mut self, row: &Row) {
        if self.rows > 0 {
            self.builder.push(", ");
        }
        row.push_tuple(&mut self.builder);
        self.rows += 1;
        self.params += row.param_count();
    }

    fn is_empty(&self) -> bool {
        self.rows == 0
    }

    async fn execute(mut self, conn: &mut PgConnection) -> IngestResult<()> {
        let table = self.table;
        self.builder
            .build()
            .execute(conn)
            .await
            .map_err(|e| IngestError::Statement { table, source: e })?;
        Ok(())
    }
}

/// Receives write requests from a Session and batches them into the
/// history store.
pub struct Ingestion {
    pool: PgPool,
    tx: Option<Transaction<'static, Postgres>>,
    builders: HashMap<Table, InsertBuilder>,
    rows: Vec<Row>,
}

impl Ingestion {
    /// Create a writer bound to the history store. Call [`start`] before
    /// emitting anything.
    ///
    /// [`start`]: Ingestion::start
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            tx: None,
            builders: HashMap::new(),
            rows: Vec::new(),
        }
    }

    /// Make the writer ready: open a transaction, recreate the per-table
    /// insert builders, and clear the row buffer. The same writer is
    /// reused across many ledgers; `flush()` calls this again after each
    /// commit.
    pub async fn start(&mut self) -> IngestResult<()> {
        if let Some(tx) = self.tx.take() {
            warn!("start() with a transaction already open; rolling it back");
            tx.rollback().await?;
        }

        self.tx = Some(self.pool.begin().await?);
        self.builders = Table::ALL
            .into_iter()
            .map(|t| (t, InsertBuilder::new(t)))
            .collect();
        self.rows.clear();
        Ok(())
    }

    /// Buffer a row for the effects table
    pub fn effect<T: Serialize>(
        &mut self,
        address: &str,
        operation_id: i64,
        order: i32,
        effect_type: i32,
        details: &T,
    ) -> IngestResult<()> {
        self.require_started()?;
        let details = serde_json::to_value(details)?;

        self.rows.push(Row::Effect(EffectRow {
            address: address.to_string(),
            account_id: 0,
            operation_id,
            order,
            effect_type,
            details,
        }));
        Ok(())
    }

    /// Helper for emitting a run of effects under one operation; tracks
    /// the running order and latches the first error.
    pub fn effects(&mut self, operation_id: i64) -> EffectBatch<'_> {
        EffectBatch {
            dest: self,
            operation_id,
            order: 0,
            added: 0,
            err: None,
        }
    }

    /// Buffer a row for the ledgers table, tagged with the current
    /// ingestion-algorithm version.
    pub fn ledger(
        &mut self,
        id: i64,
        header: &LedgerHeader,
        transaction_count: i32,
        operation_count: i32,
    ) -> IngestResult<()> {
        self.require_started()?;
        let now = Utc::now();

        self.rows.push(Row::Ledger(LedgerRow {
            importer_version: CURRENT_VERSION,
            id,
            sequence: header.sequence,
            ledger_hash: header.ledger_hash.clone(),
            previous_ledger_hash: (header.sequence > 1)
                .then(|| header.previous_ledger_hash.clone()),
            total_coins: header.total_coins,
            fee_pool: header.fee_pool,
            base_fee: header.base_fee,
            base_reserve: header.base_reserve,
            max_tx_set_size: header.max_tx_set_size,
            closed_at: header.closed_at(),
            created_at: now,
            updated_at: now,
            transaction_count,
            operation_count,
            protocol_version: header.protocol_version,
            ledger_header: header.encoded.clone(),
        }));
        Ok(())
    }

    /// Buffer a row for the operations table
    pub fn operation<T: Serialize>(
        &mut self,
        id: i64,
        transaction_id: i64,
        application_order: i32,
        source_account: &str,
        operation_type: i32,
        details: &T,
    ) -> IngestResult<()> {
        self.require_started()?;
        let details = serde_json::to_value(details)?;

        self.rows.push(Row::Operation(OperationRow {
            id,
            transaction_id,
            application_order,
            source_account: source_account.to_string(),
            operation_type,
            details,
        }));
        Ok(())
    }

    /// Buffer one participant row per address for an operation
    pub fn operation_participants(
        &mut self,
        operation_id: i64,
        addresses: &[String],
    ) -> IngestResult<()> {
        self.require_started()?;
        for address in addresses {
            self.rows
                .push(Row::OperationParticipant(OperationParticipantRow {
                    operation_id,
                    address: address.clone(),
                    account_id: 0,
                }));
        }
        Ok(())
    }

    /// Buffer a canonicalized trade row.
    ///
    /// Both assets are resolved (created if absent) against the open
    /// transaction; the side holding the lower asset id becomes base, so
    /// the same economic exchange yields the same row no matter which
    /// party initiated it.
    pub async fn trade(
        &mut self,
        operation_id: i64,
        order: i32,
        buyer_address: &str,
        data: &TradeData,
        ledger_closed_at: i64,
    ) -> IngestResult<()> {
        let tx = self.tx.as_mut().ok_or(IngestError::NotStarted)?;

        let sold_asset_id = assets::get_or_create_asset_id(&mut **tx, &data.asset_sold).await?;
        let bought_asset_id = assets::get_or_create_asset_id(&mut **tx, &data.asset_bought).await?;

        let seller = TradeSide {
            address: data.seller_address.clone(),
            asset_id: sold_asset_id,
            amount: data.amount_sold,
        };
        let buyer = TradeSide {
            address: buyer_address.to_string(),
            asset_id: bought_asset_id,
            amount: data.amount_bought,
        };
        let (base, counter, base_is_seller) = canonical_trade(seller, buyer);

        self.rows.push(Row::Trade(TradeRow {
            operation_id,
            order,
            ledger_closed_at: timestamp(ledger_closed_at),
            offer_id: data.offer_id,
            base_address: base.address,
            base_account_id: 0,
            base_asset_id: base.asset_id,
            base_amount: base.amount,
            counter_address: counter.address,
            counter_account_id: 0,
            counter_asset_id: counter.asset_id,
            counter_amount: counter.amount,
            base_is_seller,
        }));
        Ok(())
    }

    /// Buffer a row for the transactions table
    pub fn transaction(
        &mut self,
        id: i64,
        tx: &SourceTransaction,
        fee: Option<&FeeChanges>,
    ) -> IngestResult<()> {
        self.require_started()?;
        let now = Utc::now();

        self.rows.push(Row::Transaction(TransactionRow {
            id,
            transaction_hash: tx.transaction_hash.clone(),
            ledger_sequence: tx.ledger_sequence,
            application_order: tx.application_order,
            account: tx.source_address.clone(),
            account_sequence: tx.account_sequence,
            fee_paid: tx.fee_paid,
            operation_count: tx.operation_count,
            tx_envelope: tx.envelope.clone(),
            tx_result: tx.result.clone(),
            tx_meta: tx.result_meta.clone(),
            tx_fee_meta: fee.map(|f| f.changes.clone()).unwrap_or_default(),
            signatures: tx.signatures.clone(),
            time_bounds: tx.time_bounds,
            memo_type: tx.memo_type.clone(),
            memo: tx.memo.clone(),
            created_at: now,
            updated_at: now,
        }));
        Ok(())
    }

    /// Buffer one participant row per address for a transaction
    pub fn transaction_participants(
        &mut self,
        transaction_id: i64,
        addresses: &[String],
    ) -> IngestResult<()> {
        self.require_started()?;
        for address in addresses {
            self.rows
                .push(Row::TransactionParticipant(TransactionParticipantRow {
                    transaction_id,
                    address: address.clone(),
                    account_id: 0,
                }));
        }
        Ok(())
    }

    /// Resolve account ids for every buffered row.
    ///
    /// Collects the distinct addresses in emission order, resolves them in
    /// one batch (creating missing accounts), and pushes the complete map
    /// into every buffered row — two store round trips per flush no matter
    /// how many rows reference accounts. Rebuilt from scratch each flush:
    /// accounts may be created within the very batch being flushed, so
    /// nothing is cached across flushes.
    pub async fn update_account_ids(&mut self) -> IngestResult<()> {
        let mut seen = HashSet::new();
        let mut addresses: Vec<String> = Vec::new();
        for row in &self.rows {
            for address in row.addresses() {
                if seen.insert(address.to_string()) {
                    addresses.push(address.to_string());
                }
            }
        }

        if addresses.is_empty() {
            return Ok(());
        }

        let tx = self.tx.as_mut().ok_or(IngestError::NotStarted)?;
        let accounts = accounts::resolve_addresses(&mut **tx, &addresses).await?;

        for row in &mut self.rows {
            row.resolve_accounts(&accounts)?;
        }
        Ok(())
    }

    /// Write the buffered rows and commit.
    ///
    /// Rows are appended to their table's statement in emission order; a
    /// table's statement is executed as soon as its parameter count
    /// exceeds [`MAX_BATCH_PARAMS`], keeping every physical statement
    /// under the engine's hard cap. On success the transaction commits
    /// and a fresh one opens immediately. On failure the transaction is
    /// left open for the caller to inspect or roll back.
    pub async fn flush(&mut self) -> IngestResult<()> {
        if self.tx.is_none() {
            return Err(IngestError::NotStarted);
        }

        self.update_account_ids().await?;

        let rows = std::mem::take(&mut self.rows);
        let mut tx = self.tx.take().ok_or(IngestError::NotStarted)?;

        match Self::execute_buffered(&mut tx, &mut self.builders, &rows).await {
            Ok(statements) => {
                tx.commit().await?;
                debug!(rows = rows.len(), statements, "flush committed");
                self.start().await
            },
            Err(e) => {
                // Discard partially accumulated statements so a later
                // rollback + start + retry does not re-execute them.
                self.tx = Some(tx);
                self.builders = Table::ALL
                    .into_iter()
                    .map(|t| (t, InsertBuilder::new(t)))
                    .collect();
                Err(e)
            },
        }
    }

    async fn execute_buffered(
        tx: &mut Transaction<'static, Postgres>,
        builders: &mut HashMap<Table, InsertBuilder>,
        rows: &[Row],
    ) -> IngestResult<usize> {
        let mut statements = 0;

        for row in rows {
            let table = row.table();
            let builder = builders
                .get_mut(&table)
                .ok_or(IngestError::ConfigurationFault(table))?;
            builder.push(row);

            if builder.params > MAX_BATCH_PARAMS {
                let full = std::mem::replace(builder, InsertBuilder::new(table));
                debug!(table = %table, rows = full.rows, params = full.params, "executing full batch");
                full.execute(&mut **tx).await?;
                statements += 1;
            }
        }

        for table in Table::ALL {
            if let Some(builder) = builders.get_mut(&table) {
                if !builder.is_empty() {
                    let full = std::mem::replace(builder, InsertBuilder::new(table));
                    full.execute(&mut **tx).await?;
                    statements += 1;
                }
            }
        }

        Ok(statements)
    }

    /// Commit the open transaction without starting another; used after
    /// the last unit of work in a session.
    pub async fn close(&mut self) -> IngestResult<()> {
        let tx = self.tx.take().ok_or(IngestError::NotStarted)?;
        tx.commit().await?;
        Ok(())
    }

    /// Abort the open transaction, discarding everything written but not
    /// committed since the last commit.
    pub async fn rollback(&mut self) -> IngestResult<()> {
        let tx = self.tx.take().ok_or(IngestError::NotStarted)?;
        tx.rollback().await?;
        Ok(())
    }

    /// Remove a history id range `[start, end)` from every destination
    /// table, each keyed by its own identifying column. Runs on the open
    /// transaction, so the whole clear commits (or aborts) as one unit
    /// together with the surrounding flush/close.
    pub async fn clear(&mut self, start: i64, end: i64) -> IngestResult<()> {
        let tx = self.tx.as_mut().ok_or(IngestError::NotStarted)?;

        for table in Table::ALL {
            let sql = format!(
                "DELETE FROM {} WHERE {} >= $1 AND {} < $2",
                table.name(),
                table.delete_key(),
                table.delete_key()
            );
            sqlx::query(&sql)
                .bind(start)
                .bind(end)
                .execute(&mut **tx)
                .await
                .map_err(|e| IngestError::Clear { table, source: e })?;
        }

        debug!(start, end, "cleared history range");
        Ok(())
    }

    /// Clear the entire history database
    pub async fn clear_all(&mut self) -> IngestResult<()> {
        self.clear(0, i64::MAX).await
    }

    /// Rows currently buffered and awaiting the next flush
    pub fn pending_rows(&self) -> usize {
        self.rows.len()
    }

    fn require_started(&self) -> IngestResult<()> {
        if self.tx.is_none() {
            return Err(IngestError::NotStarted);
        }
        Ok(())
    }
}

/// Tracks the correct order while adding a run of effects for one
/// operation; the first failure latches and subsequent adds are skipped.
pub struct EffectBatch<'a> {
    dest: &'a mut Ingestion,
    operation_id: i64,
    order: i32,
    added: usize,
    err: Option<IngestError>,
}

impl EffectBatch<'_> {
    pub fn add<T: Serialize>(&mut self, address: &str, effect_type: i32, details: &T) {
        if self.err.is_some() {
            return;
        }
        self.order += 1;
        match self
            .dest
            .effect(address, self.operation_id, self.order, effect_type, details)
        {
            Ok(()) => self.added += 1,
            Err(e) => self.err = Some(e),
        }
    }

    /// Number of effects added, or the first error encountered
    pub fn finish(self) -> IngestResult<usize> {
        match self.err {
            Some(e) => Err(e),
            None => Ok(self.added),
        }
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn side(address: &str, asset_id: i64, amount: i64) -> TradeSide {
        TradeSide {
            address: address.to_string(),
            asset_id,
            amount,
        }
    }

    #[test]
    fn test_canonical_trade_seller_holds_lower_asset() {
        let (base, counter, base_is_seller) =
            canonical_trade(side("GSELLER", 3, 100), side("GBUYER", 5, 200));

        assert_eq!(base, side("GSELLER", 3, 100));
        assert_eq!(counter, side("GBUYER", 5, 200));
        assert!(base_is_seller);
    }

    #[test]
    fn test_canonical_trade_buyer_holds_lower_asset() {
        let (base, counter, base_is_seller) =
            canonical_trade(side("GSELLER", 5, 200), side("GBUYER", 3, 100));

        assert_eq!(base, side("GBUYER", 3, 100));
        assert_eq!(counter, side("GSELLER", 5, 200));
        assert!(!base_is_seller);
    }

    #[test]
    fn test_canonical_trade_is_commutative_in_roles() {
        // The same exchange of assets 3 and 5 with swapped seller/buyer
        // roles lands on identical base/counter asset ids and amounts.
        let forward = canonical_trade(side("GA", 5, 200), side("GB", 3, 100));
        let reversed = canonical_trade(side("GB", 3, 100), side("GA", 5, 200));

        assert_eq!(forward.0.asset_id, reversed.0.asset_id);
        assert_eq!(forward.0.amount, reversed.0.amount);
        assert_eq!(forward.1.asset_id, reversed.1.asset_id);
        assert_eq!(forward.1.amount, reversed.1.amount);
        assert_ne!(forward.2, reversed.2);
    }

    #[test]
    fn test_insert_builder_tracks_params() {
        let mut builder = InsertBuilder::new(Table::Operations);
        assert!(builder.is_empty());

        let row = Row::Operation(OperationRow {
            id: 1,
            transaction_id: 1,
            application_order: 1,
            source_account: "GA".to_string(),
            operation_type: 0,
            details: Value::Null,
        });

        builder.push(&row);
        builder.push(&row);
        assert_eq!(builder.rows, 2);
        assert_eq!(builder.params, 12);
    }

    #[test]
    fn test_threshold_crossing_row_count() {
        // 6 params per operation row: the running count first exceeds the
        // 65000 threshold on row 10834, so a flush of 11000 rows yields
        // one statement of 10834 rows and one of 166.
        let per_row = Table::Operations.params_per_row();
        let first_batch = MAX_BATCH_PARAMS / per_row + 1;
        assert_eq!(first_batch, 10834);
        assert!(first_batch * per_row > MAX_BATCH_PARAMS);
        assert!(first_batch * per_row <= 65_535);
    }
}
