use chrono::{DateTime, Utc};

use crate::{
    db_types::{ConfidenceTier, PurchaseId, SyncRecord, SyncStatus},
    traits::{data_objects::EligibleConversion, match_store::StoreError},
};

/// The sync pipeline's view of the store.
///
/// Selection applies the confidence gate and the retry rules in the store so that a crashed or repeated pipeline
/// run can never pick up a record twice: `Synced` and `FailedPermanent` rows are excluded by the query itself, and
/// `FailedRetryable` rows only qualify once their persisted `next_attempt_at` has passed and their attempt count
/// is below the cap.
#[allow(async_fn_in_trait)]
pub trait SyncStore: Clone {
    /// Selects up to `limit` purchases eligible for upload: confidence ≥ `min_tier`, status `Pending`, or
    /// `FailedRetryable` with `attempts < max_attempts` and `next_attempt_at` due. Oldest purchases first.
    async fn fetch_sync_eligible(
        &self,
        min_tier: ConfidenceTier,
        max_attempts: i64,
        limit: i64,
    ) -> Result<Vec<EligibleConversion>, StoreError>;

    /// Fetches the delivery bookkeeping row for a purchase.
    async fn fetch_sync_record(&self, purchase_id: &PurchaseId) -> Result<Option<SyncRecord>, StoreError>;

    /// Marks the purchase as delivered. Terminal: fails with [`StoreError::IllegalSyncTransition`] if the record
    /// is already `Synced`. Increments the attempt count and stamps the attempt time.
    async fn mark_synced(&self, purchase_id: &PurchaseId, platform_ref: Option<&str>)
        -> Result<SyncRecord, StoreError>;

    /// Records a failed attempt: increments the attempt count, stamps the attempt time, stores the error tag and
    /// (for retryable failures) the backoff cursor. `status` must be `FailedRetryable` or `FailedPermanent`;
    /// `Synced` records are never touched.
    async fn mark_sync_failed(
        &self,
        purchase_id: &PurchaseId,
        status: SyncStatus,
        error_tag: &str,
        next_attempt_at: Option<DateTime<Utc>>,
    ) -> Result<SyncRecord, StoreError>;
}
