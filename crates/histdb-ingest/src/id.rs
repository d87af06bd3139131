//! Ledger-scoped total-order identifiers
//!
//! History row ids encode their position in the chain: ledger sequence in
//! the high 32 bits, transaction application order in the next 20, and
//! operation index in the low 12. Ids therefore sort in chain order, and a
//! ledger range maps onto a contiguous id range, which is what the range
//! deletes in [`crate::ingestion::Ingestion::clear`] key on.

const LEDGER_SHIFT: u32 = 32;
const TRANSACTION_SHIFT: u32 = 12;
const TRANSACTION_MASK: i64 = 0xfffff;
const OPERATION_MASK: i64 = 0xfff;

/// Id of a ledger row; also the first id belonging to that ledger
pub fn ledger(sequence: i32) -> i64 {
    (sequence as i64) << LEDGER_SHIFT
}

/// Id of a transaction row within a ledger
pub fn transaction(sequence: i32, application_order: i32) -> i64 {
    ledger(sequence) | ((application_order as i64 & TRANSACTION_MASK) << TRANSACTION_SHIFT)
}

/// Id of an operation row within a transaction
pub fn operation(sequence: i32, application_order: i32, operation_index: i32) -> i64 {
    transaction(sequence, application_order) | (operation_index as i64 & OPERATION_MASK)
}

/// First id past everything belonging to a ledger; the exclusive end of
/// the ledger's id range. Computed in id space, so it stays valid for the
/// highest representable sequence.
pub fn ledger_end(sequence: i32) -> i64 {
    ledger(sequence) + (1_i64 << LEDGER_SHIFT)
}

/// The ledger sequence an id belongs to
pub fn sequence_of(id: i64) -> i32 {
    (id >> LEDGER_SHIFT) as i32
}
