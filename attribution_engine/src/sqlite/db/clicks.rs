use log::trace;
use sqlx::{QueryBuilder, SqliteConnection};

use crate::{
    db_types::{ClickEvent, ClickId, NewClick, PurchaseId},
    traits::{ClaimOutcome, StoreError, TimeRange},
};

/// Inserts a click event. The engine itself never creates clicks; this is the entry point for the ingestion
/// pipeline (and for tests).
pub async fn insert_click(click: NewClick, conn: &mut SqliteConnection) -> Result<ClickEvent, StoreError> {
    let click = sqlx::query_as(
        r#"
            INSERT INTO clicks (
                id,
                gclid,
                email_hash,
                phone_hash,
                ip,
                created_at
            ) VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *;
        "#,
    )
    .bind(click.id)
    .bind(click.gclid)
    .bind(click.email_hash)
    .bind(click.phone_hash)
    .bind(click.ip)
    .bind(click.created_at)
    .fetch_one(conn)
    .await?;
    Ok(click)
}

pub async fn fetch_click_by_id(id: &ClickId, conn: &mut SqliteConnection) -> Result<Option<ClickEvent>, sqlx::Error> {
    let click = sqlx::query_as("SELECT * FROM clicks WHERE id = $1").bind(id.as_str()).fetch_optional(conn).await?;
    Ok(click)
}

/// Fetches every click carrying one of the given platform click ids, claimed or not. The caller decides what an
/// already-claimed click means for the stage it is evaluating.
pub async fn fetch_clicks_by_gclid(
    gclids: &[String],
    conn: &mut SqliteConnection,
) -> Result<Vec<ClickEvent>, sqlx::Error> {
    if gclids.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder = QueryBuilder::new("SELECT * FROM clicks WHERE gclid IN (");
    let mut in_list = builder.separated(", ");
    for gclid in gclids {
        in_list.push_bind(gclid);
    }
    builder.push(")");
    trace!("🗃️ Executing query: {}", builder.sql());
    let clicks = builder.build_query_as::<ClickEvent>().fetch_all(conn).await?;
    Ok(clicks)
}

/// Fetches clicks whose email or phone digest is in `hashes`, within the window.
///
/// Ordered most recent first, ties broken by ascending click id, matching the engine's last-touch rule.
pub async fn candidate_clicks_for_identity(
    hashes: &[String],
    window: TimeRange,
    conn: &mut SqliteConnection,
) -> Result<Vec<ClickEvent>, sqlx::Error> {
    if hashes.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder = QueryBuilder::new("SELECT * FROM clicks WHERE (email_hash IN (");
    let mut email_list = builder.separated(", ");
    for hash in hashes {
        email_list.push_bind(hash);
    }
    builder.push(") OR phone_hash IN (");
    let mut phone_list = builder.separated(", ");
    for hash in hashes {
        phone_list.push_bind(hash);
    }
    builder.push(")) AND created_at >= ");
    builder.push_bind(window.since);
    builder.push(" AND created_at <= ");
    builder.push_bind(window.until);
    builder.push(" ORDER BY created_at DESC, id ASC");
    trace!("🗃️ Executing query: {}", builder.sql());
    let clicks = builder.build_query_as::<ClickEvent>().fetch_all(conn).await?;
    Ok(clicks)
}

/// Fetches clicks originating from any of the given IPs, within the window. Same ordering as
/// [`candidate_clicks_for_identity`].
pub async fn candidate_clicks_for_ips(
    ips: &[String],
    window: TimeRange,
    conn: &mut SqliteConnection,
) -> Result<Vec<ClickEvent>, sqlx::Error> {
    if ips.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder = QueryBuilder::new("SELECT * FROM clicks WHERE ip IN (");
    let mut in_list = builder.separated(", ");
    for ip in ips {
        in_list.push_bind(ip);
    }
    builder.push(") AND created_at >= ");
    builder.push_bind(window.since);
    builder.push(" AND created_at <= ");
    builder.push_bind(window.until);
    builder.push(" ORDER BY created_at DESC, id ASC");
    trace!("🗃️ Executing query: {}", builder.sql());
    let clicks = builder.build_query_as::<ClickEvent>().fetch_all(conn).await?;
    Ok(clicks)
}

/// The conditional claim. A single statement that succeeds only if the click is unclaimed (or already claimed by
/// this very purchase, which makes re-matching idempotent). The row is never read first, so concurrent matchers
/// racing on the same click serialize here, in the database.
pub async fn mark_click_matched(
    click_id: &ClickId,
    purchase_id: &PurchaseId,
    conn: &mut SqliteConnection,
) -> Result<ClaimOutcome, StoreError> {
    let result = sqlx::query(
        "UPDATE clicks SET matched_purchase_id = $2 WHERE id = $1 AND (matched_purchase_id IS NULL OR \
         matched_purchase_id = $2)",
    )
    .bind(click_id.as_str())
    .bind(purchase_id.as_str())
    .execute(&mut *conn)
    .await?;
    if result.rows_affected() == 1 {
        return Ok(ClaimOutcome::Claimed);
    }
    match fetch_click_by_id(click_id, conn).await? {
        Some(_) => Ok(ClaimOutcome::AlreadyClaimed),
        None => Err(StoreError::ClickNotFound(click_id.clone())),
    }
}

/// Releases a claim, but only if it is held by the given purchase.
pub async fn release_click(
    click_id: &ClickId,
    purchase_id: &PurchaseId,
    conn: &mut SqliteConnection,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE clicks SET matched_purchase_id = NULL WHERE id = $1 AND matched_purchase_id = $2")
        .bind(click_id.as_str())
        .bind(purchase_id.as_str())
        .execute(conn)
        .await?;
    Ok(())
}
