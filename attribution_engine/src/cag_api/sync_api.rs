use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use log::*;

use crate::{
    cag_api::errors::EngineError,
    db_types::{ConfidenceTier, PurchaseRecord, SyncStatus},
    helpers::{email_digest, phone_digest, ShutdownFlag},
    traits::{
        ConversionPayload, ConversionUploader, EligibleConversion, SyncBatchReport, SyncStore, UploadStatus,
    },
};

/// Error tags recorded on sync records, so operators can tell failure classes apart in the store.
pub mod error_tags {
    /// The record reached the formatter with no advertising click id on its matched click.
    pub const MISSING_CLICK_ID: &str = "missing-click-id";
    /// Retryable failures exhausted the attempt cap.
    pub const ATTEMPTS_EXHAUSTED: &str = "attempts-exhausted";
    /// The platform response carried no outcome for the record.
    pub const NO_OUTCOME: &str = "no-outcome";
    /// The upload call itself failed before any per-record outcome existed.
    pub const TRANSPORT: &str = "transport";
    /// The platform rejected the record without further detail.
    pub const PLATFORM_REJECTED: &str = "platform-rejected";
}

const DEFAULT_MAX_ATTEMPTS: i64 = 5;
const DEFAULT_BACKOFF_BASE_SECS: i64 = 60;
// Beyond this the doubling would overflow long before any deployment cares.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Tunables for the sync pipeline.
#[derive(Debug, Clone, Copy)]
pub struct SyncConfig {
    /// Minimum match confidence a purchase needs before it is uploaded at all.
    pub min_tier: ConfidenceTier,
    /// Upload attempts per record before a retryable failure becomes permanent.
    pub max_attempts: i64,
    /// First retry delay; doubles with every failed attempt.
    pub backoff_base: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            min_tier: ConfidenceTier::Identity,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff_base: Duration::seconds(DEFAULT_BACKOFF_BASE_SECS),
        }
    }
}

/// `SyncApi` drives matched purchases out to the advertising platform, at most once each.
///
/// Each `sync_batch` call selects eligible records, formats them (hashing contact identity at this boundary — raw
/// email/phone never leave the component), makes a single upload call for the whole batch and persists a per-record
/// outcome before returning. `Synced` is terminal and excluded by selection, so repeated or crash-restarted runs
/// can never deliver a record twice; the upload itself is keyed by an idempotency token derived from the purchase
/// id, which makes retrying ambiguous outcomes safe.
pub struct SyncApi<B, U> {
    db: B,
    uploader: U,
    config: SyncConfig,
    shutdown: ShutdownFlag,
}

impl<B, U> SyncApi<B, U> {
    pub fn new(db: B, uploader: U, config: SyncConfig) -> Self {
        Self { db, uploader, config, shutdown: ShutdownFlag::new() }
    }

    /// Installs a shared shutdown flag, checked before the upload call and between per-record writes.
    pub fn with_shutdown_flag(mut self, shutdown: ShutdownFlag) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }
}

impl<B, U> SyncApi<B, U>
where
    B: SyncStore,
    U: ConversionUploader,
{
    /// Runs one sync cycle over at most `max_size` records and reports what happened. Partial failure never
    /// raises: every selected record ends the cycle with a persisted outcome (or untouched and counted as
    /// skipped, when shutdown interrupts the cycle). Only store unavailability propagates as an error.
    pub async fn sync_batch(&self, max_size: usize) -> Result<SyncBatchReport, EngineError> {
        let mut report = SyncBatchReport::default();
        let eligible = self
            .db
            .fetch_sync_eligible(self.config.min_tier, self.config.max_attempts, max_size as i64)
            .await?;
        if eligible.is_empty() {
            trace!("📤️ Nothing to sync");
            return Ok(report);
        }
        debug!("📤️ Selected {} conversion(s) for upload", eligible.len());

        if self.shutdown.is_triggered() {
            report.skipped = eligible.len();
            return Ok(report);
        }

        // Formatting. Records that cannot be formatted get a terminal outcome here and are never uploaded.
        let mut payloads = Vec::with_capacity(eligible.len());
        let mut pending: HashMap<String, EligibleConversion> = HashMap::with_capacity(eligible.len());
        for conversion in eligible {
            match build_payload(&conversion) {
                Some(payload) => {
                    pending.insert(payload.order_ref.clone(), conversion);
                    payloads.push(payload);
                },
                None => {
                    warn!(
                        "📤️ Purchase [{}] is matched at {} but its click has no advertising click id. Marking it \
                         permanently failed.",
                        conversion.purchase.purchase_id, conversion.purchase.confidence
                    );
                    self.db
                        .mark_sync_failed(
                            &conversion.purchase.purchase_id,
                            SyncStatus::FailedPermanent,
                            error_tags::MISSING_CLICK_ID,
                            None,
                        )
                        .await?;
                    report.attempted += 1;
                    report.failed += 1;
                },
            }
        }
        if payloads.is_empty() {
            return Ok(report);
        }
        if self.shutdown.is_triggered() {
            report.skipped = payloads.len();
            return Ok(report);
        }

        // One platform call for the whole batch.
        match self.uploader.upload_conversions(&payloads).await {
            Ok(outcomes) => {
                for outcome in outcomes {
                    let Some(conversion) = pending.remove(&outcome.record_ref) else {
                        warn!("📤️ Platform reported an outcome for unknown record [{}]; ignoring", outcome.record_ref);
                        continue;
                    };
                    report.attempted += 1;
                    match outcome.status {
                        UploadStatus::Success => {
                            self.db
                                .mark_synced(&conversion.purchase.purchase_id, outcome.detail.as_deref())
                                .await?;
                            report.succeeded += 1;
                        },
                        UploadStatus::RetryableFailure => {
                            let tag = outcome.detail.as_deref().unwrap_or(error_tags::PLATFORM_REJECTED);
                            self.record_retryable(&conversion, tag).await?;
                            report.failed += 1;
                        },
                        UploadStatus::PermanentFailure => {
                            let tag = outcome.detail.as_deref().unwrap_or(error_tags::PLATFORM_REJECTED);
                            self.db
                                .mark_sync_failed(
                                    &conversion.purchase.purchase_id,
                                    SyncStatus::FailedPermanent,
                                    tag,
                                    None,
                                )
                                .await?;
                            report.failed += 1;
                        },
                    }
                }
                // Records the platform said nothing about stay retryable; they will be selected again.
                for conversion in pending.values() {
                    warn!(
                        "📤️ Platform response carried no outcome for purchase [{}]; treating as retryable",
                        conversion.purchase.purchase_id
                    );
                    self.record_retryable(conversion, error_tags::NO_OUTCOME).await?;
                    report.attempted += 1;
                    report.failed += 1;
                }
            },
            Err(e) => {
                // Nothing (or nothing attributable) came back. The upload is idempotent, so the safe move is to
                // mark the whole batch retryable and let the next cycle repeat it.
                warn!("📤️ Conversion upload failed before any per-record outcome was returned: {e}");
                for conversion in pending.values() {
                    self.record_retryable(conversion, error_tags::TRANSPORT).await?;
                    report.attempted += 1;
                    report.failed += 1;
                }
            },
        }
        info!("📤️ Sync cycle complete: {report}");
        Ok(report)
    }

    /// Marks a retryable failure, flipping to permanent once this attempt reaches the cap.
    async fn record_retryable(&self, conversion: &EligibleConversion, tag: &str) -> Result<(), EngineError> {
        let attempts_after = conversion.sync.attempts + 1;
        if attempts_after >= self.config.max_attempts {
            debug!(
                "📤️ Purchase [{}] failed its final attempt ({attempts_after}/{}); marking permanently failed",
                conversion.purchase.purchase_id, self.config.max_attempts
            );
            self.db
                .mark_sync_failed(
                    &conversion.purchase.purchase_id,
                    SyncStatus::FailedPermanent,
                    error_tags::ATTEMPTS_EXHAUSTED,
                    None,
                )
                .await?;
        } else {
            let next_attempt_at = next_attempt_time(Utc::now(), self.config.backoff_base, conversion.sync.attempts);
            self.db
                .mark_sync_failed(
                    &conversion.purchase.purchase_id,
                    SyncStatus::FailedRetryable,
                    tag,
                    Some(next_attempt_at),
                )
                .await?;
        }
        Ok(())
    }
}

/// Builds the platform payload for one eligible conversion, or `None` when its matched click carries no
/// advertising click id. Hashing happens here and nowhere later: raw contact fields never cross this line.
fn build_payload(conversion: &EligibleConversion) -> Option<ConversionPayload> {
    let gclid = conversion.gclid.clone().filter(|g| !g.is_empty())?;
    let purchase: &PurchaseRecord = &conversion.purchase;
    Some(ConversionPayload {
        order_ref: purchase.purchase_id.as_str().to_string(),
        gclid,
        conversion_time: purchase.purchased_at,
        value: purchase.value,
        currency: purchase.currency.clone(),
        hashed_email: purchase.email.as_deref().and_then(email_digest),
        hashed_phone: purchase.phone.as_deref().and_then(phone_digest),
    })
}

/// Exponential backoff: `base * 2^attempts`, exponent capped so the arithmetic can never overflow.
fn next_attempt_time(now: DateTime<Utc>, base: Duration, attempts_so_far: i64) -> DateTime<Utc> {
    let exponent = attempts_so_far.clamp(0, MAX_BACKOFF_EXPONENT as i64) as u32;
    let factor = 1i64 << exponent;
    now + Duration::seconds(base.num_seconds().saturating_mul(factor))
}

#[cfg(test)]
mod test {
    use cag_common::Money;
    use chrono::{Duration, Utc};

    use super::*;
    use crate::db_types::{ConfidenceTier, PurchaseId, PurchaseRecord, SyncRecord, SyncStatus};

    fn eligible(gclid: Option<&str>) -> EligibleConversion {
        let now = Utc::now();
        EligibleConversion {
            purchase: PurchaseRecord {
                id: 1,
                purchase_id: PurchaseId::from("p1"),
                gclid: None,
                email: Some(" Buyer@Example.COM".to_string()),
                phone: None,
                ip: None,
                purchased_at: now,
                value: Money::from(1999),
                currency: "USD".to_string(),
                matched_click_id: Some("c1".into()),
                confidence: ConfidenceTier::Identity,
                matched_at: Some(now),
                created_at: now,
                updated_at: now,
            },
            sync: SyncRecord {
                id: 1,
                purchase_id: PurchaseId::from("p1"),
                attempts: 0,
                last_attempt_at: None,
                next_attempt_at: None,
                status: SyncStatus::Pending,
                platform_ref: None,
                error_tag: None,
                updated_at: now,
            },
            gclid: gclid.map(str::to_string),
        }
    }

    #[test]
    fn payload_carries_hashed_identity_never_raw() {
        let payload = build_payload(&eligible(Some("G-1"))).unwrap();
        assert_eq!(payload.order_ref, "p1");
        assert_eq!(payload.gclid, "G-1");
        let expected = crate::helpers::email_digest("buyer@example.com").unwrap();
        assert_eq!(payload.hashed_email.as_deref(), Some(expected.as_str()));
        assert!(payload.hashed_phone.is_none());
    }

    #[test]
    fn payload_requires_a_click_id() {
        assert!(build_payload(&eligible(None)).is_none());
        assert!(build_payload(&eligible(Some(""))).is_none());
    }

    #[test]
    fn backoff_doubles_per_attempt() {
        let now = Utc::now();
        let base = Duration::seconds(60);
        assert_eq!(next_attempt_time(now, base, 0) - now, Duration::seconds(60));
        assert_eq!(next_attempt_time(now, base, 1) - now, Duration::seconds(120));
        assert_eq!(next_attempt_time(now, base, 3) - now, Duration::seconds(480));
    }

    #[test]
    fn backoff_exponent_is_capped() {
        let now = Utc::now();
        let base = Duration::seconds(60);
        let capped = next_attempt_time(now, base, 10_000) - now;
        assert_eq!(capped, Duration::seconds(60 * (1 << 16)));
    }
}
