use actix_web::{test, test::TestRequest, web, App};
use attribution_engine::{
    db_types::{ConfidenceTier, NewClick, NewPurchase},
    helpers::email_digest,
    traits::UploadOutcome,
    MatchingApi,
    MatchingConfig,
    SqliteDatabase,
    SyncApi,
    SyncConfig,
};
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use crate::{
    config::SyncOptions,
    endpoint_tests::{helpers::setup_db, mocks::MockUploader},
    routes::trigger_sync,
};

/// Seeds one purchase matched at IDENTITY against a click that carries a gclid, so it is sync-eligible.
async fn seed_eligible_purchase(db: &SqliteDatabase) {
    let now = Utc::now();
    let hash = email_digest("buyer@example.com").unwrap();
    db.insert_click(
        NewClick::new("c1", "10.0.0.1", now - Duration::hours(4)).with_gclid("G-1").with_email_hash(&hash),
    )
    .await
    .unwrap();
    let api = MatchingApi::new(db.clone(), MatchingConfig::default());
    let result = api.match_purchase(NewPurchase::new("p1", now).with_email("buyer@example.com")).await.unwrap();
    assert_eq!(result.confidence, ConfidenceTier::Identity);
}

#[actix_web::test]
async fn sync_endpoint_returns_the_cycle_report() {
    let db = setup_db("sync_report").await;
    seed_eligible_purchase(&db).await;

    let mut uploader = MockUploader::new();
    uploader
        .expect_upload_conversions()
        .times(1)
        .returning(|batch| Ok(batch.iter().map(|p| UploadOutcome::success(&p.order_ref, None)).collect()));
    let api = SyncApi::new(db.clone(), uploader, SyncConfig::default());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(api))
            .app_data(web::Data::new(SyncOptions { default_batch_size: 50 }))
            .service(web::resource("/api/sync").route(web::post().to(trigger_sync::<SqliteDatabase, MockUploader>))),
    )
    .await;

    let req = TestRequest::post().uri("/api/sync").set_json(json!({})).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["attempted"], 1);
    assert_eq!(body["succeeded"], 1);
    assert_eq!(body["failed"], 0);
    assert_eq!(body["skipped"], 0);
}

#[actix_web::test]
async fn sync_endpoint_with_nothing_eligible_reports_zeroes() {
    let db = setup_db("sync_empty").await;

    // Nothing eligible: the uploader must never be called.
    let uploader = MockUploader::new();
    let api = SyncApi::new(db.clone(), uploader, SyncConfig::default());
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(api))
            .app_data(web::Data::new(SyncOptions { default_batch_size: 50 }))
            .service(web::resource("/api/sync").route(web::post().to(trigger_sync::<SqliteDatabase, MockUploader>))),
    )
    .await;

    let req = TestRequest::post().uri("/api/sync").set_json(json!({"maxSize": 5})).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["attempted"], 0);
    assert_eq!(body["succeeded"], 0);
}
