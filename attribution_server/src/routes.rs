//! Request handler definitions
//!
//! Define each route and its handler here.
//! Handlers that are more than a line or two MUST go into a separate module. Keep this module neat and tidy 🙏
//!
//! Handlers are generic over the store and uploader traits and are registered with concrete types in
//! [`crate::server`]; tests register the same handlers over test doubles.
use actix_web::{get, web, HttpResponse, Responder};
use attribution_engine::{
    traits::ConversionUploader,
    MatchStore,
    MatchingApi,
    SyncApi,
    SyncStore,
};
use log::*;

use crate::{
    config::SyncOptions,
    data_objects::{MatchRequest, MatchResponse, SyncRequest},
    errors::ServerError,
};

// ----------------------------------------------   Health  ----------------------------------------------------
#[get("/health")]
pub async fn health() -> impl Responder {
    trace!("💻️ Received health check request");
    HttpResponse::Ok().body("👍️\n")
}

// ----------------------------------------------   Match   ----------------------------------------------------
/// Route handler for `POST /api/match`.
///
/// Accepts either a single purchase object or `{"purchases": [...]}`. Responds with one match result, or an
/// array of results in input order, respectively. Invalid submissions return 400; store unavailability 500.
pub async fn submit_match<B: MatchStore>(
    api: web::Data<MatchingApi<B>>,
    body: web::Json<MatchRequest>,
) -> Result<HttpResponse, ServerError> {
    match body.into_inner() {
        MatchRequest::Single(purchase) => {
            debug!("💻️ Match request for purchase [{}]", purchase.purchase_id);
            let result = api.match_purchase(purchase.into()).await?;
            Ok(HttpResponse::Ok().json(MatchResponse::from(result)))
        },
        MatchRequest::Bulk { purchases } => {
            debug!("💻️ Match request for a batch of {} purchase(s)", purchases.len());
            let purchases = purchases.into_iter().map(Into::into).collect();
            let results = api.bulk_match(purchases).await?;
            let responses: Vec<MatchResponse> = results.into_iter().map(MatchResponse::from).collect();
            Ok(HttpResponse::Ok().json(responses))
        },
    }
}

// ----------------------------------------------   Sync    ----------------------------------------------------
/// Route handler for `POST /api/sync`.
///
/// Runs one sync cycle and returns its report. Partial failure is reported in the counts, never as an error
/// status; only store unavailability maps to 500.
pub async fn trigger_sync<B, U>(
    api: web::Data<SyncApi<B, U>>,
    options: web::Data<SyncOptions>,
    body: web::Json<SyncRequest>,
) -> Result<HttpResponse, ServerError>
where
    B: SyncStore,
    U: ConversionUploader,
{
    let max_size = body.max_size.unwrap_or(options.default_batch_size);
    debug!("💻️ Sync requested with batch size {max_size}");
    let report = api.sync_batch(max_size).await?;
    Ok(HttpResponse::Ok().json(report))
}
