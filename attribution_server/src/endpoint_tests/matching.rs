use actix_web::{test, test::TestRequest, web, App};
use attribution_engine::{db_types::NewClick, MatchingApi, MatchingConfig, SqliteDatabase};
use chrono::{Duration, Utc};
use serde_json::{json, Value};

use crate::{endpoint_tests::helpers::setup_db, errors::ServerError, routes::submit_match};

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default().error_handler(|err, _req| ServerError::InvalidRequestBody(err.to_string()).into())
}

#[actix_web::test]
async fn single_match_returns_one_result() {
    let db = setup_db("match_single").await;
    db.insert_click(NewClick::new("c1", "10.0.0.1", Utc::now() - Duration::hours(1)).with_gclid("G-55"))
        .await
        .unwrap();
    let api = MatchingApi::new(db.clone(), MatchingConfig::default());
    let app = test::init_service(
        App::new()
            .app_data(json_config())
            .app_data(web::Data::new(api))
            .service(web::resource("/api/match").route(web::post().to(submit_match::<SqliteDatabase>))),
    )
    .await;

    let payload = json!({"purchaseId": "p1", "gclid": "G-55", "purchasedAt": Utc::now()});
    let req = TestRequest::post().uri("/api/match").set_json(&payload).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["purchaseId"], "p1");
    assert_eq!(body["matchedClickId"], "c1");
    assert_eq!(body["confidence"], "EXACT_ID");
}

#[actix_web::test]
async fn bulk_match_preserves_input_order() {
    let db = setup_db("match_bulk").await;
    db.insert_click(NewClick::new("c1", "10.0.0.1", Utc::now() - Duration::hours(2)).with_gclid("G-1"))
        .await
        .unwrap();
    let api = MatchingApi::new(db.clone(), MatchingConfig::default());
    let app = test::init_service(
        App::new()
            .app_data(json_config())
            .app_data(web::Data::new(api))
            .service(web::resource("/api/match").route(web::post().to(submit_match::<SqliteDatabase>))),
    )
    .await;

    let payload = json!({"purchases": [
        {"purchaseId": "p-signal-free", "purchasedAt": Utc::now()},
        {"purchaseId": "p-exact", "gclid": "G-1", "purchasedAt": Utc::now()}
    ]});
    let req = TestRequest::post().uri("/api/match").set_json(&payload).to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    let results = body.as_array().expect("bulk response must be an array");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0]["purchaseId"], "p-signal-free");
    assert_eq!(results[0]["confidence"], "NONE");
    assert_eq!(results[0]["matchedClickId"], Value::Null);
    assert_eq!(results[1]["purchaseId"], "p-exact");
    assert_eq!(results[1]["confidence"], "EXACT_ID");
}

#[actix_web::test]
async fn malformed_body_is_a_client_error() {
    let db = setup_db("match_invalid").await;
    let api = MatchingApi::new(db, MatchingConfig::default());
    let app = test::init_service(
        App::new()
            .app_data(json_config())
            .app_data(web::Data::new(api))
            .service(web::resource("/api/match").route(web::post().to(submit_match::<SqliteDatabase>))),
    )
    .await;

    let req = TestRequest::post().uri("/api/match").set_json(json!({"nonsense": true})).to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), actix_web::http::StatusCode::BAD_REQUEST);
}
