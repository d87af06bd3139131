//! Asset identifier resolution
//!
//! Assets get stable integer identifiers the same way accounts do; the
//! trade emitter resolves both sides of an exchange through here before
//! deciding which side is base and which is counter.

use histdb_common::Asset;
use sqlx::PgConnection;

use crate::error::{IngestError, IngestResult};

/// Resolve an asset descriptor to its store identifier, creating the
/// asset record if it does not exist yet. Runs on the writer's open
/// transaction.
pub async fn get_or_create_asset_id(conn: &mut PgConnection, asset: &Asset) -> IngestResult<i64> {
    let existing: Option<i64> = sqlx::query_scalar(
        "SELECT id FROM assets WHERE asset_type = $1 AND asset_code = $2 AND asset_issuer = $3",
    )
    .bind(asset.asset_type())
    .bind(asset.code())
    .bind(asset.issuer())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| IngestError::resolution(format!("error loading asset {}", asset.canonical_name()), e))?;

    if let Some(id) = existing {
        return Ok(id);
    }

    sqlx::query_scalar(
        "INSERT INTO assets (asset_type, asset_code, asset_issuer) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(asset.asset_type())
    .bind(asset.code())
    .bind(asset.issuer())
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| {
        IngestError::resolution(format!("error creating asset {}", asset.canonical_name()), e)
    })
}
