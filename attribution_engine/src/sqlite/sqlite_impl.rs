//! `SqliteDatabase` is a concrete implementation of an attribution gateway backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements all the traits defined in the [`crate::traits`]
//! module.
use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;
use sqlx::SqlitePool;

use super::db::{clicks, db_url, new_pool, purchases, sync_records};
use crate::{
    db_types::{
        ClickEvent, ClickId, ConfidenceTier, MatchResult, NewClick, NewPurchase, PurchaseId, PurchaseRecord,
        SyncRecord, SyncStatus,
    },
    traits::{
        ClaimOutcome, CommitOutcome, EligibleConversion, MatchStore, StoreError, SyncStore, TimeRange,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database api pointing to the database at `CAG_DATABASE_URL`.
    pub async fn new(max_connections: u32) -> Result<Self, StoreError> {
        let url = db_url();
        Self::new_with_url(&url, max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = new_pool(url, max_connections).await?;
        Ok(Self { url: url.to_string(), pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Stores a click event on behalf of the ingestion pipeline. Not part of the engine-facing traits; the
    /// engine treats clicks as read-only apart from the claim marker.
    pub async fn insert_click(&self, click: NewClick) -> Result<ClickEvent, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let click = clicks::insert_click(click, &mut conn).await?;
        debug!("🗃️ Click [{}] stored", click.id);
        Ok(click)
    }
}

impl MatchStore for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    async fn fetch_click(&self, id: &ClickId) -> Result<Option<ClickEvent>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let click = clicks::fetch_click_by_id(id, &mut conn).await?;
        Ok(click)
    }

    async fn fetch_clicks_by_gclid(&self, gclids: &[String]) -> Result<Vec<ClickEvent>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let clicks = clicks::fetch_clicks_by_gclid(gclids, &mut conn).await?;
        Ok(clicks)
    }

    async fn candidate_clicks_for_identity(
        &self,
        hashes: &[String],
        window: TimeRange,
    ) -> Result<Vec<ClickEvent>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let clicks = clicks::candidate_clicks_for_identity(hashes, window, &mut conn).await?;
        Ok(clicks)
    }

    async fn candidate_clicks_for_ips(&self, ips: &[String], window: TimeRange) -> Result<Vec<ClickEvent>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let clicks = clicks::candidate_clicks_for_ips(ips, window, &mut conn).await?;
        Ok(clicks)
    }

    async fn mark_click_matched(
        &self,
        click_id: &ClickId,
        purchase_id: &PurchaseId,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut conn = self.pool.acquire().await?;
        clicks::mark_click_matched(click_id, purchase_id, &mut conn).await
    }

    async fn release_click(&self, click_id: &ClickId, purchase_id: &PurchaseId) -> Result<(), StoreError> {
        let mut conn = self.pool.acquire().await?;
        clicks::release_click(click_id, purchase_id, &mut conn).await
    }

    /// Stores the purchase and its PENDING sync record in a single atomic transaction. This call is idempotent.
    async fn upsert_purchase(&self, purchase: NewPurchase) -> Result<(PurchaseRecord, bool), StoreError> {
        let mut tx = self.pool.begin().await?;
        let (record, created) = purchases::idempotent_insert(purchase, &mut tx).await?;
        sync_records::ensure_exists(&record.purchase_id, &mut tx).await?;
        tx.commit().await?;
        Ok((record, created))
    }

    async fn fetch_purchase(&self, id: &PurchaseId) -> Result<Option<PurchaseRecord>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let purchase = purchases::fetch_purchase_by_purchase_id(id, &mut conn).await?;
        Ok(purchase)
    }

    /// Claims the click, writes the match fields and releases any superseded claim, all in one transaction. On a
    /// claim conflict the transaction is dropped without committing, so nothing is written.
    async fn commit_match(
        &self,
        result: &MatchResult,
        superseded_click: Option<&ClickId>,
    ) -> Result<CommitOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        if let Some(click_id) = &result.click_id {
            match clicks::mark_click_matched(click_id, &result.purchase_id, &mut tx).await? {
                ClaimOutcome::Claimed => {},
                ClaimOutcome::AlreadyClaimed => {
                    debug!(
                        "🗃️ Click [{click_id}] is already claimed; match for [{}] not committed",
                        result.purchase_id
                    );
                    return Ok(CommitOutcome::Conflict);
                },
            }
        }
        let record = purchases::update_match_fields(result, &mut tx).await?;
        if let Some(prior) = superseded_click {
            clicks::release_click(prior, &result.purchase_id, &mut tx).await?;
            trace!("🗃️ Released superseded claim on click [{prior}] for [{}]", result.purchase_id);
        }
        tx.commit().await?;
        debug!(
            "🗃️ Match committed for purchase [{}]: {} at {}",
            record.purchase_id,
            result.click_id.as_ref().map(|c| c.to_string()).unwrap_or_else(|| "no click".to_string()),
            result.confidence
        );
        Ok(CommitOutcome::Committed(record))
    }
}

impl SyncStore for SqliteDatabase {
    async fn fetch_sync_eligible(
        &self,
        min_tier: ConfidenceTier,
        max_attempts: i64,
        limit: i64,
    ) -> Result<Vec<EligibleConversion>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        sync_records::fetch_sync_eligible(min_tier, max_attempts, limit, &mut conn).await
    }

    async fn fetch_sync_record(&self, purchase_id: &PurchaseId) -> Result<Option<SyncRecord>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let record = sync_records::fetch_by_purchase_id(purchase_id, &mut conn).await?;
        Ok(record)
    }

    async fn mark_synced(
        &self,
        purchase_id: &PurchaseId,
        platform_ref: Option<&str>,
    ) -> Result<SyncRecord, StoreError> {
        let mut conn = self.pool.acquire().await?;
        sync_records::mark_synced(purchase_id, platform_ref, &mut conn).await
    }

    async fn mark_sync_failed(
        &self,
        purchase_id: &PurchaseId,
        status: SyncStatus,
        error_tag: &str,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<SyncRecord, StoreError> {
        let mut conn = self.pool.acquire().await?;
        sync_records::mark_failed(purchase_id, status, error_tag, next_attempt_at, &mut conn).await
    }
}
