use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db_types::{PurchaseRecord, SyncRecord};

//--------------------------------------       TimeRange       -------------------------------------------------------
/// A closed time interval used for candidate click queries. `until` is the purchase timestamp; clicks after it are
/// never plausible causes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub since: DateTime<Utc>,
    pub until: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        Self { since, until }
    }

    /// The window of the given length ending at `until`.
    pub fn ending_at(until: DateTime<Utc>, length: chrono::Duration) -> Self {
        Self { since: until - length, until }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.since && ts <= self.until
    }

    /// Smallest range covering both `self` and `other`.
    pub fn union(&self, other: &TimeRange) -> Self {
        Self { since: self.since.min(other.since), until: self.until.max(other.until) }
    }
}

//--------------------------------------      ClaimOutcome     -------------------------------------------------------
/// Result of the conditional click claim. `AlreadyClaimed` is not an error; the engine reacts by trying the
/// next-best candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed,
    AlreadyClaimed,
}

//--------------------------------------      CommitOutcome    -------------------------------------------------------
/// Result of atomically claiming a click and persisting the purchase's match fields.
#[derive(Debug, Clone)]
pub enum CommitOutcome {
    /// The claim (if any) succeeded and the match fields were written. Carries the updated purchase.
    Committed(PurchaseRecord),
    /// Another purchase claimed the click first; nothing was written.
    Conflict,
}

//--------------------------------------   EligibleConversion  -------------------------------------------------------
/// A purchase selected for upload, joined with its delivery bookkeeping and the platform click id of the click it
/// was attributed to. `gclid` is `None` when the matched click was not an advertising click after all — the
/// pipeline marks such records as permanently failed rather than dropping them.
#[derive(Debug, Clone)]
pub struct EligibleConversion {
    pub purchase: PurchaseRecord,
    pub sync: SyncRecord,
    pub gclid: Option<String>,
}

//--------------------------------------    SyncBatchReport    -------------------------------------------------------
/// Outcome counts for one `sync_batch` invocation. Built per call; there is no process-wide tally.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncBatchReport {
    /// Records picked up and driven to a persisted outcome this cycle.
    pub attempted: usize,
    /// Records now in `Synced`.
    pub succeeded: usize,
    /// Records marked `FailedRetryable` or `FailedPermanent` this cycle.
    pub failed: usize,
    /// Records selected but left untouched (early termination).
    pub skipped: usize,
}

impl SyncBatchReport {
    pub fn total(&self) -> usize {
        self.attempted + self.skipped
    }
}

impl std::fmt::Display for SyncBatchReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} attempted, {} succeeded, {} failed, {} skipped",
            self.attempted, self.succeeded, self.failed, self.skipped
        )
    }
}
