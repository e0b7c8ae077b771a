use cag_common::Money;
use chrono::{DateTime, Utc};
use log::trace;
use sqlx::{FromRow, QueryBuilder, SqliteConnection};

use crate::{
    db_types::{ClickId, ConfidenceTier, PurchaseId, PurchaseRecord, SyncRecord, SyncStatus},
    traits::{EligibleConversion, StoreError},
};

/// Creates the PENDING bookkeeping row for a purchase if it does not exist yet. Called inside the purchase
/// insert transaction so a purchase and its sync record always exist together.
pub async fn ensure_exists(purchase_id: &PurchaseId, conn: &mut SqliteConnection) -> Result<(), StoreError> {
    sqlx::query("INSERT INTO sync_records (purchase_id) VALUES ($1) ON CONFLICT (purchase_id) DO NOTHING")
        .bind(purchase_id.as_str())
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn fetch_by_purchase_id(
    purchase_id: &PurchaseId,
    conn: &mut SqliteConnection,
) -> Result<Option<SyncRecord>, sqlx::Error> {
    let record = sqlx::query_as("SELECT * FROM sync_records WHERE purchase_id = $1")
        .bind(purchase_id.as_str())
        .fetch_optional(conn)
        .await?;
    Ok(record)
}

/// One row of the eligibility join, flattened because the purchase, sync and click tables share column names.
#[derive(FromRow)]
struct EligibleRow {
    id: i64,
    purchase_id: PurchaseId,
    gclid: Option<String>,
    email: Option<String>,
    phone: Option<String>,
    ip: Option<String>,
    purchased_at: DateTime<Utc>,
    value: Money,
    currency: String,
    matched_click_id: Option<ClickId>,
    confidence: ConfidenceTier,
    matched_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    sync_id: i64,
    attempts: i64,
    last_attempt_at: Option<DateTime<Utc>>,
    next_attempt_at: Option<DateTime<Utc>>,
    status: SyncStatus,
    platform_ref: Option<String>,
    error_tag: Option<String>,
    sync_updated_at: DateTime<Utc>,
    click_gclid: Option<String>,
}

impl From<EligibleRow> for EligibleConversion {
    fn from(row: EligibleRow) -> Self {
        EligibleConversion {
            purchase: PurchaseRecord {
                id: row.id,
                purchase_id: row.purchase_id.clone(),
                gclid: row.gclid,
                email: row.email,
                phone: row.phone,
                ip: row.ip,
                purchased_at: row.purchased_at,
                value: row.value,
                currency: row.currency,
                matched_click_id: row.matched_click_id,
                confidence: row.confidence,
                matched_at: row.matched_at,
                created_at: row.created_at,
                updated_at: row.updated_at,
            },
            sync: SyncRecord {
                id: row.sync_id,
                purchase_id: row.purchase_id,
                attempts: row.attempts,
                last_attempt_at: row.last_attempt_at,
                next_attempt_at: row.next_attempt_at,
                status: row.status,
                platform_ref: row.platform_ref,
                error_tag: row.error_tag,
                updated_at: row.sync_updated_at,
            },
            gclid: row.click_gclid,
        }
    }
}

/// Selects up to `limit` purchases due for upload, oldest first.
///
/// The selection itself encodes the idempotence rules: `SYNCED` and `FAILED_PERMANENT` never qualify, `PENDING`
/// always does, and `FAILED_RETRYABLE` only below the attempt cap and once its persisted backoff cursor has
/// passed. The matched click is joined in for its platform click id.
pub async fn fetch_sync_eligible(
    min_tier: ConfidenceTier,
    max_attempts: i64,
    limit: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<EligibleConversion>, StoreError> {
    let mut builder = QueryBuilder::new(
        r#"
    SELECT
        p.id as id,
        p.purchase_id as purchase_id,
        p.gclid as gclid,
        p.email as email,
        p.phone as phone,
        p.ip as ip,
        p.purchased_at as purchased_at,
        p.value as value,
        p.currency as currency,
        p.matched_click_id as matched_click_id,
        p.confidence as confidence,
        p.matched_at as matched_at,
        p.created_at as created_at,
        p.updated_at as updated_at,
        s.id as sync_id,
        s.attempts as attempts,
        s.last_attempt_at as last_attempt_at,
        s.next_attempt_at as next_attempt_at,
        s.status as status,
        s.platform_ref as platform_ref,
        s.error_tag as error_tag,
        s.updated_at as sync_updated_at,
        c.gclid as click_gclid
    FROM purchases p
    JOIN sync_records s ON s.purchase_id = p.purchase_id
    LEFT JOIN clicks c ON c.id = p.matched_click_id
    WHERE p.confidence IN (
    "#,
    );
    let mut tiers = builder.separated(", ");
    for tier in eligible_tiers(min_tier) {
        tiers.push_bind(tier);
    }
    builder.push(
        r#") AND (
        s.status = 'PENDING'
        OR (
            s.status = 'FAILED_RETRYABLE'
            AND s.attempts < "#,
    );
    builder.push_bind(max_attempts);
    builder.push(
        r#"
            AND (s.next_attempt_at IS NULL OR unixepoch(s.next_attempt_at) <= unixepoch(CURRENT_TIMESTAMP))
        )
    )
    ORDER BY p.purchased_at ASC
    LIMIT "#,
    );
    builder.push_bind(limit);
    trace!("🗃️ Executing query: {}", builder.sql());
    let rows = builder.build_query_as::<EligibleRow>().fetch_all(conn).await?;
    Ok(rows.into_iter().map(EligibleConversion::from).collect())
}

fn eligible_tiers(min_tier: ConfidenceTier) -> Vec<ConfidenceTier> {
    use ConfidenceTier::*;
    [Probabilistic, Identity, ExactId].into_iter().filter(|t| *t >= min_tier).collect()
}

/// Marks the purchase as delivered. Refuses to touch a record that is already `SYNCED`.
pub async fn mark_synced(
    purchase_id: &PurchaseId,
    platform_ref: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<SyncRecord, StoreError> {
    let record: Option<SyncRecord> = sqlx::query_as(
        r#"
            UPDATE sync_records SET
                status = 'SYNCED',
                attempts = attempts + 1,
                last_attempt_at = CURRENT_TIMESTAMP,
                next_attempt_at = NULL,
                platform_ref = $2,
                error_tag = NULL,
                updated_at = CURRENT_TIMESTAMP
            WHERE purchase_id = $1 AND status != 'SYNCED'
            RETURNING *;
        "#,
    )
    .bind(purchase_id.as_str())
    .bind(platform_ref)
    .fetch_optional(&mut *conn)
    .await?;
    match record {
        Some(record) => Ok(record),
        None => match fetch_by_purchase_id(purchase_id, conn).await? {
            Some(_) => Err(StoreError::IllegalSyncTransition(format!(
                "Purchase {purchase_id} is already synced; SYNCED is terminal"
            ))),
            None => Err(StoreError::PurchaseNotFound(purchase_id.clone())),
        },
    }
}

/// Records a failed attempt. `status` must be one of the two failure states; `SYNCED` rows are never touched.
pub async fn mark_failed(
    purchase_id: &PurchaseId,
    status: SyncStatus,
    error_tag: &str,
    next_attempt_at: Option<DateTime<Utc>>,
    conn: &mut SqliteConnection,
) -> Result<SyncRecord, StoreError> {
    if !matches!(status, SyncStatus::FailedRetryable | SyncStatus::FailedPermanent) {
        return Err(StoreError::IllegalSyncTransition(format!(
            "mark_failed only accepts failure states, not {status}"
        )));
    }
    let record: Option<SyncRecord> = sqlx::query_as(
        r#"
            UPDATE sync_records SET
                status = $2,
                attempts = attempts + 1,
                last_attempt_at = CURRENT_TIMESTAMP,
                next_attempt_at = $3,
                error_tag = $4,
                updated_at = CURRENT_TIMESTAMP
            WHERE purchase_id = $1 AND status != 'SYNCED'
            RETURNING *;
        "#,
    )
    .bind(purchase_id.as_str())
    .bind(status)
    .bind(next_attempt_at)
    .bind(error_tag)
    .fetch_optional(&mut *conn)
    .await?;
    match record {
        Some(record) => Ok(record),
        None => match fetch_by_purchase_id(purchase_id, conn).await? {
            Some(_) => Err(StoreError::IllegalSyncTransition(format!(
                "Purchase {purchase_id} is already synced; SYNCED is terminal"
            ))),
            None => Err(StoreError::PurchaseNotFound(purchase_id.clone())),
        },
    }
}
