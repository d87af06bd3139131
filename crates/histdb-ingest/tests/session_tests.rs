//! Session and system orchestration against a real store

use async_trait::async_trait;
use histdb_common::{Asset, AssetsModified};
use histdb_ingest::id;
use histdb_ingest::ingestion::Ingestion;
use histdb_ingest::error::IngestError;
use histdb_ingest::session::{LedgerProcessor, SessionError};
use histdb_ingest::source::{LedgerBundle, LedgerHeader, LedgerReader, SourceTransaction};
use histdb_ingest::system::{SessionOpts, System, SystemError};
use sqlx::PgPool;
use std::sync::Arc;

fn bundle(sequence: i32) -> LedgerBundle {
    LedgerBundle {
        sequence,
        header: LedgerHeader {
            sequence,
            ledger_hash: format!("hash-{}", sequence),
            previous_ledger_hash: format!("hash-{}", sequence - 1),
            total_coins: 1_000_000_000,
            fee_pool: 0,
            base_fee: 100,
            base_reserve: 10,
            max_tx_set_size: 50,
            close_time: 1_700_000_000 + sequence as i64,
            protocol_version: 12,
            encoded: None,
        },
        transactions: vec![SourceTransaction {
            transaction_hash: format!("tx-{}", sequence),
            ledger_sequence: sequence,
            application_order: 1,
            source_address: "GSOURCE".to_string(),
            account_sequence: sequence as i64,
            fee_paid: 100,
            operation_count: 0,
            envelope: "envelope".to_string(),
            result: "result".to_string(),
            result_meta: "meta".to_string(),
            signatures: vec![],
            time_bounds: None,
            memo_type: "none".to_string(),
            memo: None,
        }],
        fee_changes: vec![],
    }
}

/// Reader with a fixed number of closed ledgers, one transaction each
struct FixedReader {
    closed_through: i32,
}

#[async_trait]
impl LedgerReader for FixedReader {
    async fn read_ledger(&self, sequence: i32) -> anyhow::Result<Option<LedgerBundle>> {
        if sequence > self.closed_through {
            return Ok(None);
        }
        Ok(Some(bundle(sequence)))
    }
}

/// Reader that fails at one sequence and serves the rest
struct FlakyReader {
    fail_at: i32,
}

#[async_trait]
impl LedgerReader for FlakyReader {
    async fn read_ledger(&self, sequence: i32) -> anyhow::Result<Option<LedgerBundle>> {
        if sequence == self.fail_at {
            anyhow::bail!("source connection reset");
        }
        Ok(Some(bundle(sequence)))
    }
}

/// Writes the ledger row and its transactions for each bundle
struct BasicProcessor;

#[async_trait]
impl LedgerProcessor for BasicProcessor {
    async fn process(
        &mut self,
        ingestion: &mut Ingestion,
        bundle: &LedgerBundle,
        assets_modified: &mut AssetsModified,
    ) -> anyhow::Result<()> {
        assets_modified.insert(Asset::Native);
        ingestion.ledger(
            id::ledger(bundle.sequence),
            &bundle.header,
            bundle.transactions.len() as i32,
            bundle.operation_count(),
        )?;
        for tx in &bundle.transactions {
            let tx_id = id::transaction(bundle.sequence, tx.application_order);
            ingestion.transaction(tx_id, tx, bundle.fee_for(&tx.transaction_hash))?;
            ingestion.transaction_participants(tx_id, &[tx.source_address.clone()])?;
        }
        Ok(())
    }
}

fn opts(first: i32, last: i32) -> SessionOpts {
    SessionOpts {
        first,
        last,
        clear_existing: false,
        skip_progress_report: true,
    }
}

#[sqlx::test]
async fn test_session_ingests_full_range(pool: PgPool) -> sqlx::Result<()> {
    let system = System::new(pool.clone(), pool.clone(), "Test Network");
    let mut session = system
        .try_start_session(opts(1, 3), Arc::new(FixedReader { closed_through: 10 }), Box::new(BasicProcessor))
        .unwrap();
    session.run().await;

    assert_eq!(session.result().unwrap(), 3);
    assert_eq!(system.metrics().ingested_count(), 3);
    // Assets noted by the processor accumulate across the whole run.
    assert!(session.cursor.assets_modified().contains(&Asset::Native));
    assert_eq!(session.cursor.assets_modified().len(), 1);

    let sequences: Vec<i32> = sqlx::query_scalar("SELECT sequence FROM ledgers ORDER BY sequence")
        .fetch_all(&pool)
        .await?;
    assert_eq!(sequences, vec![1, 2, 3]);

    let txs: i64 = sqlx::query_scalar("SELECT count(*) FROM transactions")
        .fetch_one(&pool)
        .await?;
    assert_eq!(txs, 3);

    // One account record regardless of how many ledgers referenced it.
    let accounts: i64 = sqlx::query_scalar("SELECT count(*) FROM accounts")
        .fetch_one(&pool)
        .await?;
    assert_eq!(accounts, 1);

    Ok(())
}

#[sqlx::test]
async fn test_session_stops_at_unclosed_ledger(pool: PgPool) -> sqlx::Result<()> {
    let system = System::new(pool.clone(), pool.clone(), "Test Network");
    let mut session = system
        .try_start_session(opts(1, 10), Arc::new(FixedReader { closed_through: 4 }), Box::new(BasicProcessor))
        .unwrap();
    session.run().await;

    // Ledgers past the source's tip end the range rather than failing.
    assert_eq!(session.result().unwrap(), 4);

    let count: i64 = sqlx::query_scalar("SELECT count(*) FROM ledgers")
        .fetch_one(&pool)
        .await?;
    assert_eq!(count, 4);

    Ok(())
}

#[sqlx::test]
async fn test_read_error_commits_prior_ledgers_and_closes(pool: PgPool) -> sqlx::Result<()> {
    let system = System::new(pool.clone(), pool.clone(), "Test Network");
    let mut session = system
        .try_start_session(opts(1, 5), Arc::new(FlakyReader { fail_at: 3 }), Box::new(BasicProcessor))
        .unwrap();
    session.run().await;

    assert!(matches!(
        session.result(),
        Err(SessionError::Load { sequence: 3, .. })
    ));
    assert_eq!(session.ingested(), 2);

    // Everything flushed before the failure is committed.
    let sequences: Vec<i32> = sqlx::query_scalar("SELECT sequence FROM ledgers ORDER BY sequence")
        .fetch_all(&pool)
        .await?;
    assert_eq!(sequences, vec![1, 2]);

    // A read error closes the writer like normal exhaustion; no
    // transaction is left open behind the failed session.
    assert!(matches!(
        session.ingestion.close().await,
        Err(IngestError::NotStarted)
    ));

    Ok(())
}

#[sqlx::test]
async fn test_second_session_is_rejected_while_first_runs(pool: PgPool) -> sqlx::Result<()> {
    let system = System::new(pool.clone(), pool.clone(), "Test Network");
    let reader = Arc::new(FixedReader { closed_through: 10 });

    let session = system
        .try_start_session(opts(1, 3), reader.clone(), Box::new(BasicProcessor))
        .unwrap();
    assert_eq!(system.current_session().as_deref(), Some("ledgers [1, 3]"));

    match system.try_start_session(opts(4, 6), reader.clone(), Box::new(BasicProcessor)) {
        Err(SystemError::Busy { active }) => assert_eq!(active, "ledgers [1, 3]"),
        _ => panic!("expected busy"),
    }

    // Dropping the session releases the writer lock.
    drop(session);
    assert!(system
        .try_start_session(opts(4, 6), reader, Box::new(BasicProcessor))
        .is_ok());

    Ok(())
}

#[sqlx::test]
async fn test_clear_existing_reingests_range(pool: PgPool) -> sqlx::Result<()> {
    let system = System::new(pool.clone(), pool.clone(), "Test Network");
    let reader = Arc::new(FixedReader { closed_through: 10 });

    let mut session = system
        .try_start_session(opts(1, 3), reader.clone(), Box::new(BasicProcessor))
        .unwrap();
    session.run().await;
    drop(session);

    let mut session = system
        .try_start_session(
            SessionOpts {
                first: 2,
                last: 3,
                clear_existing: true,
                skip_progress_report: true,
            },
            reader,
            Box::new(BasicProcessor),
        )
        .unwrap();
    session.run().await;
    assert_eq!(session.result().unwrap(), 2);

    // No duplicate ledger rows after re-ingesting the overlap.
    let sequences: Vec<i32> = sqlx::query_scalar("SELECT sequence FROM ledgers ORDER BY sequence")
        .fetch_all(&pool)
        .await?;
    assert_eq!(sequences, vec![1, 2, 3]);

    Ok(())
}

#[sqlx::test]
async fn test_retention_drops_history_below_floor(pool: PgPool) -> sqlx::Result<()> {
    let mut system = System::new(pool.clone(), pool.clone(), "Test Network");
    system.retention_count = 2;

    let mut session = system
        .try_start_session(opts(1, 5), Arc::new(FixedReader { closed_through: 10 }), Box::new(BasicProcessor))
        .unwrap();
    session.run().await;
    drop(session);

    // Latest is 5; keeping 2 ledgers means the floor is 4.
    system.enforce_retention(5).await.unwrap();

    let sequences: Vec<i32> = sqlx::query_scalar("SELECT sequence FROM ledgers ORDER BY sequence")
        .fetch_all(&pool)
        .await?;
    assert_eq!(sequences, vec![4, 5]);

    let txs: Vec<i32> =
        sqlx::query_scalar("SELECT ledger_sequence FROM transactions ORDER BY ledger_sequence")
            .fetch_all(&pool)
            .await?;
    assert_eq!(txs, vec![4, 5]);

    Ok(())
}
