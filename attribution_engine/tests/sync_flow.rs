//! End-to-end sync pipeline tests over a real SQLite store, with a scripted uploader standing in for the
//! advertising platform: partial failure, retry/backoff, terminal states and the at-most-once guarantee.
use std::sync::{Arc, Mutex};

use attribution_engine::{
    cag_api::sync_api::error_tags,
    db_types::{ConfidenceTier, NewClick, NewPurchase, SyncStatus},
    helpers::email_digest,
    traits::{ConversionPayload, ConversionUploader, UploadError, UploadOutcome, UploadStatus},
    MatchingApi, MatchingConfig, SyncApi, SyncConfig, SyncStore,
};
use cag_common::Money;
use chrono::{Duration, Utc};
use tokio::runtime::Runtime;

mod support;

use support::prepare_env::{prepare_test_db, random_db_path};

fn run_async<F: std::future::Future>(f: F) -> F::Output {
    let sys = Runtime::new().unwrap();
    sys.block_on(f)
}

/// A scripted platform double: returns the programmed responses in order and records every batch it was handed.
#[derive(Clone, Default)]
struct StubUploader {
    responses: Arc<Mutex<Vec<Result<Vec<UploadOutcome>, UploadError>>>>,
    batches: Arc<Mutex<Vec<Vec<ConversionPayload>>>>,
}

impl StubUploader {
    fn respond_with(responses: Vec<Result<Vec<UploadOutcome>, UploadError>>) -> Self {
        Self { responses: Arc::new(Mutex::new(responses)), batches: Arc::new(Mutex::new(Vec::new())) }
    }

    /// Succeed every record of every batch.
    fn always_succeeds() -> Self {
        Self::default()
    }

    fn batches(&self) -> Vec<Vec<ConversionPayload>> {
        self.batches.lock().unwrap().clone()
    }
}

impl ConversionUploader for StubUploader {
    async fn upload_conversions(&self, batch: &[ConversionPayload]) -> Result<Vec<UploadOutcome>, UploadError> {
        self.batches.lock().unwrap().push(batch.to_vec());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Ok(batch.iter().map(|p| UploadOutcome::success(&p.order_ref, None)).collect());
        }
        responses.remove(0)
    }
}

fn outcome(record_ref: &str, status: UploadStatus, detail: Option<&str>) -> UploadOutcome {
    UploadOutcome { record_ref: record_ref.to_string(), status, detail: detail.map(str::to_string) }
}

/// Seeds a click with a gclid and a matching purchase, returning once the purchase is matched at IDENTITY or
/// better so it is sync-eligible under the default gate.
async fn seed_matched_purchase(db: &attribution_engine::SqliteDatabase, tag: &str, value_minor: i64) {
    let now = Utc::now();
    let email = format!("{tag}@example.com");
    let hash = email_digest(&email).unwrap();
    db.insert_click(
        NewClick::new(format!("click-{tag}"), "10.0.0.1", now - Duration::hours(6))
            .with_gclid(&format!("G-{tag}"))
            .with_email_hash(&hash),
    )
    .await
    .unwrap();
    let api = MatchingApi::new(db.clone(), MatchingConfig::default());
    let result = api
        .match_purchase(
            NewPurchase::new(format!("purchase-{tag}"), now).with_email(&email).with_value(Money::from(value_minor)),
        )
        .await
        .unwrap();
    assert!(result.confidence >= ConfidenceTier::Identity);
}

fn fast_retry_config() -> SyncConfig {
    SyncConfig { max_attempts: 2, backoff_base: Duration::seconds(0), ..SyncConfig::default() }
}

#[test]
fn sync_delivers_each_conversion_exactly_once() {
    run_async(async {
        let db = prepare_test_db(&random_db_path("sync_once")).await;
        seed_matched_purchase(&db, "a", 1999).await;
        seed_matched_purchase(&db, "b", 500).await;
        let uploader = StubUploader::always_succeeds();
        let api = SyncApi::new(db.clone(), uploader.clone(), SyncConfig::default());

        let report = api.sync_batch(50).await.unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 0);

        // SYNCED is terminal: a second cycle selects nothing and the platform sees exactly one batch.
        let again = api.sync_batch(50).await.unwrap();
        assert_eq!(again.attempted, 0);
        assert_eq!(uploader.batches().len(), 1);

        let record = db.fetch_sync_record(&"purchase-a".into()).await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Synced);
        assert_eq!(record.attempts, 1);
    });
}

#[test]
fn payloads_carry_hashed_identity_and_the_click_id() {
    run_async(async {
        let db = prepare_test_db(&random_db_path("sync_payload")).await;
        seed_matched_purchase(&db, "hash", 2500).await;
        let uploader = StubUploader::always_succeeds();
        let api = SyncApi::new(db.clone(), uploader.clone(), SyncConfig::default());
        api.sync_batch(10).await.unwrap();

        let batches = uploader.batches();
        assert_eq!(batches.len(), 1);
        let payload = &batches[0][0];
        assert_eq!(payload.order_ref, "purchase-hash");
        assert_eq!(payload.gclid, "G-hash");
        assert_eq!(payload.value, Money::from(2500));
        let expected = email_digest("hash@example.com").unwrap();
        assert_eq!(payload.hashed_email.as_deref(), Some(expected.as_str()));
    });
}

#[test]
fn partial_failure_is_handled_per_record() {
    run_async(async {
        let db = prepare_test_db(&random_db_path("sync_partial")).await;
        seed_matched_purchase(&db, "ok", 100).await;
        seed_matched_purchase(&db, "flaky", 200).await;
        seed_matched_purchase(&db, "bad", 300).await;
        let uploader = StubUploader::respond_with(vec![Ok(vec![
            outcome("purchase-ok", UploadStatus::Success, Some("resource/123")),
            outcome("purchase-flaky", UploadStatus::RetryableFailure, Some("INTERNAL_ERROR")),
            outcome("purchase-bad", UploadStatus::PermanentFailure, Some("UNPARSEABLE_GCLID")),
        ])]);
        let api = SyncApi::new(db.clone(), uploader, SyncConfig::default());

        let report = api.sync_batch(10).await.unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 2);

        let ok = db.fetch_sync_record(&"purchase-ok".into()).await.unwrap().unwrap();
        assert_eq!(ok.status, SyncStatus::Synced);
        assert_eq!(ok.platform_ref.as_deref(), Some("resource/123"));

        let flaky = db.fetch_sync_record(&"purchase-flaky".into()).await.unwrap().unwrap();
        assert_eq!(flaky.status, SyncStatus::FailedRetryable);
        assert_eq!(flaky.attempts, 1);
        assert!(flaky.next_attempt_at.is_some());

        let bad = db.fetch_sync_record(&"purchase-bad".into()).await.unwrap().unwrap();
        assert_eq!(bad.status, SyncStatus::FailedPermanent);
        assert_eq!(bad.error_tag.as_deref(), Some("UNPARSEABLE_GCLID"));
    });
}

#[test]
fn retryable_failures_become_permanent_at_the_attempt_cap() {
    run_async(async {
        let db = prepare_test_db(&random_db_path("sync_cap")).await;
        seed_matched_purchase(&db, "doomed", 100).await;
        let uploader = StubUploader::respond_with(vec![
            Ok(vec![outcome("purchase-doomed", UploadStatus::RetryableFailure, Some("RATE_LIMITED"))]),
            Ok(vec![outcome("purchase-doomed", UploadStatus::RetryableFailure, Some("RATE_LIMITED"))]),
        ]);
        let api = SyncApi::new(db.clone(), uploader, fast_retry_config());

        let first = api.sync_batch(10).await.unwrap();
        assert_eq!(first.failed, 1);
        let record = db.fetch_sync_record(&"purchase-doomed".into()).await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::FailedRetryable);
        assert_eq!(record.attempts, 1);

        // Second attempt reaches the cap of 2 and flips to permanent.
        let second = api.sync_batch(10).await.unwrap();
        assert_eq!(second.failed, 1);
        let record = db.fetch_sync_record(&"purchase-doomed".into()).await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::FailedPermanent);
        assert_eq!(record.attempts, 2);
        assert_eq!(record.error_tag.as_deref(), Some(error_tags::ATTEMPTS_EXHAUSTED));

        // Permanently failed records are excluded from all future selections.
        let third = api.sync_batch(10).await.unwrap();
        assert_eq!(third.attempted, 0);
    });
}

#[test]
fn transport_failure_marks_the_whole_batch_retryable() {
    run_async(async {
        let db = prepare_test_db(&random_db_path("sync_transport")).await;
        seed_matched_purchase(&db, "t1", 100).await;
        seed_matched_purchase(&db, "t2", 200).await;
        let uploader =
            StubUploader::respond_with(vec![Err(UploadError::Transport("connection timed out".to_string()))]);
        let api = SyncApi::new(db.clone(), uploader, SyncConfig::default());

        let report = api.sync_batch(10).await.unwrap();
        assert_eq!(report.attempted, 2);
        assert_eq!(report.failed, 2);
        for tag in ["t1", "t2"] {
            let record =
                db.fetch_sync_record(&format!("purchase-{tag}").into()).await.unwrap().unwrap();
            assert_eq!(record.status, SyncStatus::FailedRetryable);
            assert_eq!(record.error_tag.as_deref(), Some(error_tags::TRANSPORT));
            assert_eq!(record.attempts, 1);
        }
    });
}

#[test]
fn low_confidence_matches_are_not_uploaded() {
    run_async(async {
        let db = prepare_test_db(&random_db_path("sync_gate")).await;
        // An anonymous purchase matched only by IP stays below the default IDENTITY gate.
        let now = Utc::now();
        db.insert_click(NewClick::new("c-ip", "203.0.113.4", now - Duration::hours(1)).with_gclid("G-ip"))
            .await
            .unwrap();
        let matcher = MatchingApi::new(db.clone(), MatchingConfig::default());
        let result = matcher.match_purchase(NewPurchase::new("p-anon", now).with_ip("203.0.113.4")).await.unwrap();
        assert_eq!(result.confidence, ConfidenceTier::Probabilistic);

        let uploader = StubUploader::always_succeeds();
        let api = SyncApi::new(db.clone(), uploader.clone(), SyncConfig::default());
        let report = api.sync_batch(10).await.unwrap();
        assert_eq!(report.attempted, 0);
        assert!(uploader.batches().is_empty());

        let record = db.fetch_sync_record(&"p-anon".into()).await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Pending);
    });
}

#[test]
fn matched_click_without_gclid_is_a_permanent_defect() {
    run_async(async {
        let db = prepare_test_db(&random_db_path("sync_defect")).await;
        let now = Utc::now();
        // An identity click that was not an advertising click: no gclid to report.
        let hash = email_digest("organic@example.com").unwrap();
        db.insert_click(NewClick::new("c-organic", "10.0.0.5", now - Duration::hours(2)).with_email_hash(&hash))
            .await
            .unwrap();
        let matcher = MatchingApi::new(db.clone(), MatchingConfig::default());
        let result =
            matcher.match_purchase(NewPurchase::new("p-organic", now).with_email("organic@example.com")).await.unwrap();
        assert_eq!(result.confidence, ConfidenceTier::Identity);

        let uploader = StubUploader::always_succeeds();
        let api = SyncApi::new(db.clone(), uploader.clone(), SyncConfig::default());
        let report = api.sync_batch(10).await.unwrap();
        assert_eq!(report.attempted, 1);
        assert_eq!(report.failed, 1);
        assert!(uploader.batches().is_empty());

        let record = db.fetch_sync_record(&"p-organic".into()).await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::FailedPermanent);
        assert_eq!(record.error_tag.as_deref(), Some(error_tags::MISSING_CLICK_ID));
    });
}

#[test]
fn batch_size_caps_a_cycle() {
    run_async(async {
        let db = prepare_test_db(&random_db_path("sync_batch_size")).await;
        for i in 0..5 {
            seed_matched_purchase(&db, &format!("s{i}"), 100 * (i + 1)).await;
        }
        let uploader = StubUploader::always_succeeds();
        let api = SyncApi::new(db.clone(), uploader.clone(), SyncConfig::default());

        let report = api.sync_batch(3).await.unwrap();
        assert_eq!(report.attempted, 3);
        assert_eq!(report.succeeded, 3);
        assert_eq!(uploader.batches()[0].len(), 3);

        // The remainder is picked up by the next cycle.
        let rest = api.sync_batch(3).await.unwrap();
        assert_eq!(rest.attempted, 2);
        assert_eq!(rest.succeeded, 2);
    });
}

#[test]
fn shutdown_before_upload_leaves_records_untouched() {
    run_async(async {
        let db = prepare_test_db(&random_db_path("sync_shutdown")).await;
        seed_matched_purchase(&db, "halt", 100).await;
        let uploader = StubUploader::always_succeeds();
        let shutdown = attribution_engine::helpers::ShutdownFlag::new();
        let api =
            SyncApi::new(db.clone(), uploader.clone(), SyncConfig::default()).with_shutdown_flag(shutdown.clone());
        shutdown.trigger();

        let report = api.sync_batch(10).await.unwrap();
        assert_eq!(report.skipped, 1);
        assert_eq!(report.attempted, 0);
        assert!(uploader.batches().is_empty());
        let record = db.fetch_sync_record(&"purchase-halt".into()).await.unwrap().unwrap();
        assert_eq!(record.status, SyncStatus::Pending);
        assert_eq!(record.attempts, 0);
    });
}
