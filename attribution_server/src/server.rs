use actix_web::{dev::Server, http::KeepAlive, middleware::Logger, web, App, HttpServer};
use attribution_engine::{helpers::ShutdownFlag, MatchingApi, SqliteDatabase, SyncApi};
use gads_tools::GadsApi;
use log::*;
use tokio::task::JoinHandle;

use crate::{
    config::{ServerConfig, SyncOptions},
    errors::ServerError,
    integrations::gads::GadsUploader,
    routes::{health, submit_match, trigger_sync},
    sync_worker::start_sync_worker,
};

pub async fn run_server(config: ServerConfig) -> Result<(), ServerError> {
    let db = SqliteDatabase::new_with_url(&config.database_url, 25)
        .await
        .map_err(|e| ServerError::InitializeError(e.to_string()))?;
    let uploader = build_uploader(&config)?;
    let shutdown = ShutdownFlag::new();
    let worker = if config.sync_worker_enabled {
        Some(start_sync_worker(
            db.clone(),
            uploader.clone(),
            config.sync,
            config.sync_interval,
            config.sync_batch_size,
            shutdown.clone(),
        ))
    } else {
        info!("🕰️ The background sync worker is disabled; an external scheduler must drive POST /api/sync");
        None
    };
    let srv = create_server_instance(config, db, uploader, shutdown.clone())?;
    let result = srv.await.map_err(|e| ServerError::Unspecified(e.to_string()));
    // The HTTP server is down; stop the worker before reporting.
    shutdown.trigger();
    if let Some(worker) = worker {
        stop_worker(worker).await;
    }
    result
}

pub fn build_uploader(config: &ServerConfig) -> Result<GadsUploader, ServerError> {
    let api = GadsApi::new(config.gads_config.clone()).map_err(|e| ServerError::InitializeError(e.to_string()))?;
    Ok(GadsUploader::new(api))
}

pub fn create_server_instance(
    config: ServerConfig,
    db: SqliteDatabase,
    uploader: GadsUploader,
    shutdown: ShutdownFlag,
) -> Result<Server, ServerError> {
    let host = config.host.clone();
    let port = config.port;
    let srv = HttpServer::new(move || {
        let matching_api =
            MatchingApi::new(db.clone(), config.matching).with_shutdown_flag(shutdown.clone());
        let sync_api =
            SyncApi::new(db.clone(), uploader.clone(), config.sync).with_shutdown_flag(shutdown.clone());
        let options = SyncOptions::from_config(&config);
        let json_config = web::JsonConfig::default().error_handler(|err, _req| {
            ServerError::InvalidRequestBody(err.to_string()).into()
        });
        App::new()
            .wrap(Logger::new("%t (%D ms) %s %a %{Host}i %U").log_target("cag::access_log"))
            .app_data(json_config)
            .app_data(web::Data::new(matching_api))
            .app_data(web::Data::new(sync_api))
            .app_data(web::Data::new(options))
            .service(health)
            .service(
                web::scope("/api")
                    .service(web::resource("/match").route(web::post().to(submit_match::<SqliteDatabase>)))
                    .service(
                        web::resource("/sync")
                            .route(web::post().to(trigger_sync::<SqliteDatabase, GadsUploader>)),
                    ),
            )
    })
    .keep_alive(KeepAlive::Timeout(std::time::Duration::from_secs(600)))
    .bind((host.as_str(), port))?
    .run();
    Ok(srv)
}

async fn stop_worker(worker: JoinHandle<()>) {
    if let Err(e) = worker.await {
        warn!("🕰️ Sync worker did not shut down cleanly: {e}");
    }
}
