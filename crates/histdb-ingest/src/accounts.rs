//! Account address resolution
//!
//! Maps address strings to the stable integer identifiers the history
//! tables reference. Resolution is two round trips regardless of how many
//! rows reference accounts: one set-valued lookup for existing records,
//! one batched insert for the rest. Both run on the writer's open
//! transaction so accounts created for a batch commit (or vanish) with it.

use sqlx::{PgConnection, QueryBuilder};
use std::collections::HashMap;
use tracing::debug;

use crate::error::{IngestError, IngestResult};
use crate::MAX_BATCH_PARAMS;

/// Resolve every given address to an account id, creating records for
/// addresses the store has never seen. Returns the complete map.
pub async fn resolve_addresses(
    conn: &mut PgConnection,
    addresses: &[String],
) -> IngestResult<HashMap<String, i64>> {
    let mut accounts = HashMap::with_capacity(addresses.len());
    if addresses.is_empty() {
        return Ok(accounts);
    }

    let existing: Vec<(i64, String)> =
        sqlx::query_as("SELECT id, address FROM accounts WHERE address = ANY($1)")
            .bind(addresses)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| IngestError::resolution("error loading account ids", e))?;

    for (id, address) in existing {
        accounts.insert(address, id);
    }

    let missing: Vec<&String> = addresses
        .iter()
        .filter(|a| !accounts.contains_key(*a))
        .collect();

    if missing.is_empty() {
        return Ok(accounts);
    }

    debug!(count = missing.len(), "creating account records");

    // One bound parameter per address; chunk to stay under the statement
    // parameter cap even for pathologically large batches.
    for chunk in missing.chunks(MAX_BATCH_PARAMS) {
        let mut qb = QueryBuilder::new("INSERT INTO accounts (address) ");
        qb.push_values(chunk, |mut b, address| {
            b.push_bind((*address).clone());
        });
        qb.push(" RETURNING id, address");

        let created: Vec<(i64, String)> = qb
            .build_query_as()
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| IngestError::resolution("error creating accounts", e))?;

        for (id, address) in created {
            accounts.insert(address, id);
        }
    }

    Ok(accounts)
}
