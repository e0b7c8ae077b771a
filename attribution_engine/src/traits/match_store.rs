use thiserror::Error;

use crate::{
    db_types::{ClickEvent, ClickId, MatchResult, NewPurchase, PurchaseId, PurchaseRecord},
    traits::data_objects::{ClaimOutcome, CommitOutcome, TimeRange},
};

/// The matching engine's view of the store.
///
/// Candidate lookups are read-only and may be issued concurrently. The only writes are the conditional click claim
/// and the purchase match-field update, and both are specified so that a conflict reports cleanly instead of
/// double-attributing: matching may run from several process instances at once, and `mark_click_matched` /
/// `commit_match` are the only serialization points.
#[allow(async_fn_in_trait)]
pub trait MatchStore: Clone {
    /// The URL of the backing database.
    fn url(&self) -> &str;

    /// Fetches a single click event by its capture-time identifier.
    async fn fetch_click(&self, id: &ClickId) -> Result<Option<ClickEvent>, StoreError>;

    /// Fetches all clicks carrying any of the given platform click ids. Batched so that `bulk_match` costs one
    /// round trip for the whole input set.
    async fn fetch_clicks_by_gclid(&self, gclids: &[String]) -> Result<Vec<ClickEvent>, StoreError>;

    /// Fetches clicks whose captured email or phone digest is in `hashes`, within the window.
    ///
    /// Results are ordered most recent first, ties broken by ascending click id.
    async fn candidate_clicks_for_identity(
        &self,
        hashes: &[String],
        window: TimeRange,
    ) -> Result<Vec<ClickEvent>, StoreError>;

    /// Fetches clicks originating from any of the given IPs, within the window. Same ordering contract as
    /// [`candidate_clicks_for_identity`].
    async fn candidate_clicks_for_ips(&self, ips: &[String], window: TimeRange) -> Result<Vec<ClickEvent>, StoreError>;

    /// Claims the click for the given purchase.
    ///
    /// The claim must be a single conditional write: it succeeds only if the click is currently unclaimed, and
    /// reports [`ClaimOutcome::AlreadyClaimed`] otherwise. This is the concurrency linchpin that keeps a click
    /// attributed to at most one purchase.
    async fn mark_click_matched(
        &self,
        click_id: &ClickId,
        purchase_id: &PurchaseId,
    ) -> Result<ClaimOutcome, StoreError>;

    /// Releases a claim, but only if it is held by the given purchase. Used when a re-match upgrade supersedes a
    /// prior probabilistic match.
    async fn release_click(&self, click_id: &ClickId, purchase_id: &PurchaseId) -> Result<(), StoreError>;

    /// Stores the purchase, creating its companion PENDING sync record in the same transaction. Idempotent:
    /// returns `false` in the second position if the purchase already existed (the stored record is returned
    /// unchanged).
    async fn upsert_purchase(&self, purchase: NewPurchase) -> Result<(PurchaseRecord, bool), StoreError>;

    /// Fetches a purchase by its source-system id.
    async fn fetch_purchase(&self, id: &PurchaseId) -> Result<Option<PurchaseRecord>, StoreError>;

    /// Atomically claims the matched click (when the result carries one), writes the match fields onto the
    /// purchase, and releases `superseded_click` (when a prior claim is being upgraded away).
    ///
    /// On a claim conflict nothing is written and [`CommitOutcome::Conflict`] is returned, so the engine can fall
    /// back to its next candidate. The whole operation is one transaction: a `MatchResult` is either fully
    /// persisted or not at all.
    async fn commit_match(
        &self,
        result: &MatchResult,
        superseded_click: Option<&ClickId>,
    ) -> Result<CommitOutcome, StoreError>;
}

#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("We have an internal database engine error (configuration/uptime etc.): {0}")]
    DatabaseError(String),
    #[error("The requested purchase {0} does not exist")]
    PurchaseNotFound(PurchaseId),
    #[error("The requested click {0} does not exist")]
    ClickNotFound(ClickId),
    #[error("Illegal sync status change. {0}")]
    IllegalSyncTransition(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}
