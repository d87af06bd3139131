//! Deferred-write row model
//!
//! A [`Row`] is a pending write destined for exactly one history table.
//! The writer never inspects concrete variants beyond four capabilities:
//! which table a row targets, how wide its parameter tuple is, which
//! account addresses it references, and how to rewrite those references
//! once the address → id map is known. Adding a new derived table means
//! adding a variant here; the writer's control flow does not change.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::{Postgres, QueryBuilder};
use std::collections::HashMap;
use std::fmt;

use crate::error::{IngestError, IngestResult};
use crate::source::TimeBounds;

/// The destination tables the writer knows how to fill
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Effects,
    Ledgers,
    OperationParticipants,
    Operations,
    Trades,
    TransactionParticipants,
    Transactions,
}

impl Table {
    pub const ALL: [Table; 7] = [
        Table::Effects,
        Table::Ledgers,
        Table::OperationParticipants,
        Table::Operations,
        Table::Trades,
        Table::TransactionParticipants,
        Table::Transactions,
    ];

    /// SQL name of the table
    pub fn name(&self) -> &'static str {
        match self {
            Table::Effects => "effects",
            Table::Ledgers => "ledgers",
            Table::OperationParticipants => "operation_participants",
            Table::Operations => "operations",
            Table::Trades => "trades",
            Table::TransactionParticipants => "transaction_participants",
            Table::Transactions => "transactions",
        }
    }

    /// Insert column list, in the order rows bind their parameters
    pub fn insert_columns(&self) -> &'static str {
        match self {
            Table::Effects => r#"history_account_id, history_operation_id, "order", type, details"#,
            Table::Ledgers => {
                "importer_version, id, sequence, ledger_hash, previous_ledger_hash, \
                 total_coins, fee_pool, base_fee, base_reserve, max_tx_set_size, \
                 closed_at, created_at, updated_at, transaction_count, operation_count, \
                 protocol_version, ledger_header"
            },
            Table::OperationParticipants => "history_operation_id, history_account_id",
            Table::Operations => {
                "id, transaction_id, application_order, source_account, type, details"
            },
            Table::Trades => {
                "history_operation_id, \"order\", ledger_closed_at, offer_id, \
                 base_account_id, base_asset_id, base_amount, counter_account_id, \
                 counter_asset_id, counter_amount, base_is_seller"
            },
            Table::TransactionParticipants => "history_transaction_id, history_account_id",
            Table::Transactions => {
                "id, transaction_hash, ledger_sequence, application_order, account, \
                 account_sequence, fee_paid, operation_count, tx_envelope, tx_result, \
                 tx_meta, tx_fee_meta, signatures, time_bounds, memo_type, memo, \
                 created_at, updated_at"
            },
        }
    }

    /// The column range deletes are keyed on.
    ///
    /// Tables with a generated primary identifier are keyed on it; the
    /// dependent tables are keyed on the identifier of the row that owns
    /// them, so clearing a ledger-id range takes their rows with it.
    pub fn delete_key(&self) -> &'static str {
        match self {
            Table::Effects => "history_operation_id",
            Table::Ledgers => "id",
            Table::OperationParticipants => "history_operation_id",
            Table::Operations => "id",
            Table::Trades => "history_operation_id",
            Table::TransactionParticipants => "history_transaction_id",
            Table::Transactions => "id",
        }
    }

    /// Bound parameters per row, fixed per table
    pub fn params_per_row(&self) -> usize {
        match self {
            Table::Effects => 5,
            Table::Ledgers => 17,
            Table::OperationParticipants => 2,
            Table::Operations => 6,
            Table::Trades => 11,
            Table::TransactionParticipants => 2,
            Table::Transactions => 18,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A buffered write, one variant per destination table
#[derive(Debug, Clone)]
pub enum Row {
    Effect(EffectRow),
    Ledger(LedgerRow),
    Operation(OperationRow),
    OperationParticipant(OperationParticipantRow),
    Trade(TradeRow),
    Transaction(TransactionRow),
    TransactionParticipant(TransactionParticipantRow),
}

#[derive(Debug, Clone)]
pub struct EffectRow {
    pub address: String,
    pub account_id: i64,
    pub operation_id: i64,
    pub order: i32,
    pub effect_type: i32,
    pub details: Value,
}

#[derive(Debug, Clone)]
pub struct LedgerRow {
    pub importer_version: i32,
    pub id: i64,
    pub sequence: i32,
    pub ledger_hash: String,
    pub previous_ledger_hash: Option<String>,
    pub total_coins: i64,
    pub fee_pool: i64,
    pub base_fee: i32,
    pub base_reserve: i32,
    pub max_tx_set_size: i32,
    pub closed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub transaction_count: i32,
    pub operation_count: i32,
    pub protocol_version: i32,
    pub ledger_header: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OperationRow {
    pub id: i64,
    pub transaction_id: i64,
    pub application_order: i32,
    pub source_account: String,
    pub operation_type: i32,
    pub details: Value,
}

#[derive(Debug, Clone)]
pub struct OperationParticipantRow {
    pub operation_id: i64,
    pub address: String,
    pub account_id: i64,
}

#[derive(Debug, Clone)]
pub struct TradeRow {
    pub operation_id: i64,
    pub order: i32,
    pub ledger_closed_at: DateTime<Utc>,
    pub offer_id: i64,
    pub base_address: String,
    pub base_account_id: i64,
    pub base_asset_id: i64,
    pub base_amount: i64,
    pub counter_address: String,
    pub counter_account_id: i64,
    pub counter_asset_id: i64,
    pub counter_amount: i64,
    pub base_is_seller: bool,
}

#[derive(Debug, Clone)]
pub struct TransactionRow {
    pub id: i64,
    pub transaction_hash: String,
    pub ledger_sequence: i32,
    pub application_order: i32,
    pub account: String,
    pub account_sequence: i64,
    pub fee_paid: i32,
    pub operation_count: i32,
    pub tx_envelope: String,
    pub tx_result: String,
    pub tx_meta: String,
    pub tx_fee_meta: String,
    pub signatures: Vec<String>,
    pub time_bounds: Option<TimeBounds>,
    pub memo_type: String,
    pub memo: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct TransactionParticipantRow {
    pub transaction_id: i64,
    pub address: String,
    pub account_id: i64,
}

impl Row {
    /// The table this row is destined for
    pub fn table(&self) -> Table {
        match self {
            Row::Effect(_) => Table::Effects,
            Row::Ledger(_) => Table::Ledgers,
            Row::Operation(_) => Table::Operations,
            Row::OperationParticipant(_) => Table::OperationParticipants,
            Row::Trade(_) => Table::Trades,
            Row::Transaction(_) => Table::Transactions,
            Row::TransactionParticipant(_) => Table::TransactionParticipants,
        }
    }

    /// Width of this row's parameter tuple
    pub fn param_count(&self) -> usize {
        self.table().params_per_row()
    }

    /// Account addresses this row references, if any
    pub fn addresses(&self) -> Vec<&str> {
        match self {
            Row::Effect(r) => vec![r.address.as_str()],
            Row::OperationParticipant(r) => vec![r.address.as_str()],
            Row::TransactionParticipant(r) => vec![r.address.as_str()],
            Row::Trade(r) => vec![r.base_address.as_str(), r.counter_address.as_str()],
            Row::Ledger(_) | Row::Operation(_) | Row::Transaction(_) => Vec::new(),
        }
    }

    /// Rewrite address references into resolved account ids
    pub fn resolve_accounts(&mut self, accounts: &HashMap<String, i64>) -> IngestResult<()> {
        fn lookup(accounts: &HashMap<String, i64>, address: &str) -> IngestResult<i64> {
            accounts
                .get(address)
                .copied()
                .ok_or_else(|| IngestError::UnresolvedAddress(address.to_string()))
        }

        match self {
            Row::Effect(r) => r.account_id = lookup(accounts, &r.address)?,
            Row::OperationParticipant(r) => r.account_id = lookup(accounts, &r.address)?,
            Row::TransactionParticipant(r) => r.account_id = lookup(accounts, &r.address)?,
            Row::Trade(r) => {
                r.base_account_id = lookup(accounts, &r.base_address)?;
                r.counter_account_id = lookup(accounts, &r.counter_address)?;
            },
            Row::Ledger(_) | Row::Operation(_) | Row::Transaction(_) => {},
        }
        Ok(())
    }

    /// Append this row's parenthesized parameter tuple to an in-progress
    /// insert statement, columns in the table's declared order.
    pub fn push_tuple(&self, qb: &mut QueryBuilder<'static, Postgres>) {
        qb.push("(");
        let mut s = qb.separated(", ");
        match self {
            Row::Effect(r) => {
                s.push_bind(r.account_id);
                s.push_bind(r.operation_id);
                s.push_bind(r.order);
                s.push_bind(r.effect_type);
                s.push_bind(r.details.clone());
            },
            Row::Ledger(r) => {
                s.push_bind(r.importer_version);
                s.push_bind(r.id);
                s.push_bind(r.sequence);
                s.push_bind(r.ledger_hash.clone());
                s.push_bind(r.previous_ledger_hash.clone());
                s.push_bind(r.total_coins);
                s.push_bind(r.fee_pool);
                s.push_bind(r.base_fee);
                s.push_bind(r.base_reserve);
                s.push_bind(r.max_tx_set_size);
                s.push_bind(r.closed_at);
                s.push_bind(r.created_at);
                s.push_bind(r.updated_at);
                s.push_bind(r.transaction_count);
                s.push_bind(r.operation_count);
                s.push_bind(r.protocol_version);
                s.push_bind(r.ledger_header.clone());
            },
            Row::Operation(r) => {
                s.push_bind(r.id);
                s.push_bind(r.transaction_id);
                s.push_bind(r.application_order);
                s.push_bind(r.source_account.clone());
                s.push_bind(r.operation_type);
                s.push_bind(r.details.clone());
            },
            Row::OperationParticipant(r) => {
                s.push_bind(r.operation_id);
                s.push_bind(r.account_id);
            },
            Row::Trade(r) => {
                s.push_bind(r.operation_id);
                s.push_bind(r.order);
                s.push_bind(r.ledger_closed_at);
                s.push_bind(r.offer_id);
                s.push_bind(r.base_account_id);
                s.push_bind(r.base_asset_id);
                s.push_bind(r.base_amount);
                s.push_bind(r.counter_account_id);
                s.push_bind(r.counter_asset_id);
                s.push_bind(r.counter_amount);
                s.push_bind(r.base_is_seller);
            },
            Row::Transaction(r) => {
                s.push_bind(r.id);
                s.push_bind(r.transaction_hash.clone());
                s.push_bind(r.ledger_sequence);
                s.push_bind(r.application_order);
                s.push_bind(r.account.clone());
                s.push_bind(r.account_sequence);
                s.push_bind(r.fee_paid);
                s.push_bind(r.operation_count);
                s.push_bind(r.tx_envelope.clone());
                s.push_bind(r.tx_result.clone());
                s.push_bind(r.tx_meta.clone());
                s.push_bind(r.tx_fee_meta.clone());
                s.push_bind(r.signatures.clone());
                s.push_bind(r.time_bounds.as_ref().map(TimeBounds::range_literal));
                s.push_unseparated("::int8range");
                s.push_bind(r.memo_type.clone());
                s.push_bind(r.memo.clone());
                s.push_bind(r.created_at);
                s.push_bind(r.updated_at);
            },
            Row::TransactionParticipant(r) => {
                s.push_bind(r.transaction_id);
                s.push_bind(r.account_id);
            },
        }
        qb.push(")");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participant(address: &str) -> Row {
        Row::TransactionParticipant(TransactionParticipantRow {
            transaction_id: 1,
            address: address.to_string(),
            account_id: 0,
        })
    }

    #[test]
    fn test_rows_route_to_their_tables() {
        assert_eq!(participant("GA").table(), Table::TransactionParticipants);
        assert_eq!(participant("GA").param_count(), 2);
    }

    #[test]
    fn test_addresses_of_address_free_rows_are_empty() {
        let row = Row::Operation(OperationRow {
            id: 1,
            transaction_id: 1,
            application_order: 1,
            source_account: "GA".to_string(),
            operation_type: 0,
            details: Value::Null,
        });
        assert!(row.addresses().is_empty());
    }

    #[test]
    fn test_trade_reports_both_sides() {
        let row = Row::Trade(TradeRow {
            operation_id: 1,
            order: 0,
            ledger_closed_at: Utc::now(),
            offer_id: 9,
            base_address: "GBASE".to_string(),
            base_account_id: 0,
            base_asset_id: 3,
            base_amount: 100,
            counter_address: "GCOUNTER".to_string(),
            counter_account_id: 0,
            counter_asset_id: 5,
            counter_amount: 200,
            base_is_seller: true,
        });
        assert_eq!(row.addresses(), vec!["GBASE", "GCOUNTER"]);
    }

    #[test]
    fn test_resolve_rewrites_address_references() {
        let mut accounts = HashMap::new();
        accounts.insert("GA".to_string(), 42_i64);

        let mut row = participant("GA");
        row.resolve_accounts(&accounts).unwrap();
        match row {
            Row::TransactionParticipant(r) => assert_eq!(r.account_id, 42),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_resolve_fails_on_missing_mapping() {
        let mut row = participant("GMISSING");
        let err = row.resolve_accounts(&HashMap::new()).unwrap_err();
        assert!(matches!(err, IngestError::UnresolvedAddress(_)));
    }

    #[test]
    fn test_params_per_row_covers_every_column() {
        for table in Table::ALL {
            let columns = table.insert_columns().split(',').count();
            assert_eq!(table.params_per_row(), columns, "{}", table);
        }
    }
}
