use log::debug;
use sqlx::SqliteConnection;

use crate::{
    db_types::{MatchResult, NewPurchase, PurchaseId, PurchaseRecord},
    traits::StoreError,
};

/// Inserts the purchase, returning `false` in the second position if it already existed.
///
/// An existing purchase is not replaced, but its signal fields are enriched: fields the earlier submission left
/// empty are filled in from this one. That is what lets a later re-submission carry a freshly captured identity
/// into the upgrade path without ever overwriting captured data.
pub async fn idempotent_insert(
    purchase: NewPurchase,
    conn: &mut SqliteConnection,
) -> Result<(PurchaseRecord, bool), StoreError> {
    let inserted = match fetch_purchase_by_purchase_id(&purchase.purchase_id, conn).await? {
        Some(_) => {
            let enriched = enrich_signals(purchase, conn).await?;
            (enriched, false)
        },
        None => {
            let purchase = insert_purchase(purchase, conn).await?;
            debug!("🗃️ Purchase [{}] inserted with id {}", purchase.purchase_id, purchase.id);
            (purchase, true)
        },
    };
    Ok(inserted)
}

/// Inserts a new purchase using the given connection. This is not atomic on its own. You can embed this call
/// inside a transaction if you need to ensure atomicity, and pass `&mut *tx` as the connection argument.
async fn insert_purchase(purchase: NewPurchase, conn: &mut SqliteConnection) -> Result<PurchaseRecord, StoreError> {
    let purchase = sqlx::query_as(
        r#"
            INSERT INTO purchases (
                purchase_id,
                gclid,
                email,
                phone,
                ip,
                purchased_at,
                value,
                currency
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *;
        "#,
    )
    .bind(purchase.purchase_id)
    .bind(purchase.gclid)
    .bind(purchase.email)
    .bind(purchase.phone)
    .bind(purchase.ip)
    .bind(purchase.purchased_at)
    .bind(purchase.value.value())
    .bind(purchase.currency)
    .fetch_one(conn)
    .await?;
    Ok(purchase)
}

/// Fills in signal fields the stored purchase is missing from a fresh submission. Stored values always win.
async fn enrich_signals(purchase: NewPurchase, conn: &mut SqliteConnection) -> Result<PurchaseRecord, StoreError> {
    let record: Option<PurchaseRecord> = sqlx::query_as(
        r#"
            UPDATE purchases SET
                gclid = COALESCE(gclid, $2),
                email = COALESCE(email, $3),
                phone = COALESCE(phone, $4),
                ip = COALESCE(ip, $5),
                updated_at = CURRENT_TIMESTAMP
            WHERE purchase_id = $1
            RETURNING *;
        "#,
    )
    .bind(purchase.purchase_id.as_str())
    .bind(purchase.gclid)
    .bind(purchase.email)
    .bind(purchase.phone)
    .bind(purchase.ip)
    .fetch_optional(conn)
    .await?;
    record.ok_or(StoreError::PurchaseNotFound(purchase.purchase_id))
}

pub async fn fetch_purchase_by_purchase_id(
    purchase_id: &PurchaseId,
    conn: &mut SqliteConnection,
) -> Result<Option<PurchaseRecord>, sqlx::Error> {
    let purchase = sqlx::query_as("SELECT * FROM purchases WHERE purchase_id = $1")
        .bind(purchase_id.as_str())
        .fetch_optional(conn)
        .await?;
    Ok(purchase)
}

/// Writes the match fields of a `MatchResult` onto the purchase.
pub(crate) async fn update_match_fields(
    result: &MatchResult,
    conn: &mut SqliteConnection,
) -> Result<PurchaseRecord, StoreError> {
    let record: Option<PurchaseRecord> = sqlx::query_as(
        r#"
            UPDATE purchases SET
                matched_click_id = $2,
                confidence = $3,
                matched_at = $4,
                updated_at = CURRENT_TIMESTAMP
            WHERE purchase_id = $1
            RETURNING *;
        "#,
    )
    .bind(result.purchase_id.as_str())
    .bind(result.click_id.as_ref().map(|c| c.as_str()))
    .bind(result.confidence)
    .bind(result.matched_at)
    .fetch_optional(conn)
    .await?;
    record.ok_or_else(|| StoreError::PurchaseNotFound(result.purchase_id.clone()))
}
