use attribution_engine::{helpers::ShutdownFlag, SqliteDatabase, SyncApi, SyncConfig};
use log::*;
use tokio::task::JoinHandle;

use crate::integrations::gads::GadsUploader;

const HEARTBEAT: std::time::Duration = std::time::Duration::from_secs(1);

/// Starts the periodic sync worker. It runs one sync cycle every `interval` and exits promptly once the shutdown
/// flag is triggered. The flag is also wired into the sync API itself, so a cycle in flight stops cleanly at its
/// next record boundary.
pub fn start_sync_worker(
    db: SqliteDatabase,
    uploader: GadsUploader,
    config: SyncConfig,
    interval: std::time::Duration,
    batch_size: usize,
    shutdown: ShutdownFlag,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let api = SyncApi::new(db, uploader, config).with_shutdown_flag(shutdown.clone());
        info!("🕰️ Conversion sync worker started ({}s interval)", interval.as_secs());
        let mut elapsed = interval; // run the first cycle immediately
        loop {
            // Heartbeat sleep so shutdown is observed within a second, not after a whole interval.
            if elapsed >= interval {
                elapsed = std::time::Duration::ZERO;
                info!("🕰️ Running conversion sync cycle");
                match api.sync_batch(batch_size).await {
                    Ok(report) => {
                        info!("🕰️ Sync cycle finished ({} record(s) selected): {report}", report.total())
                    },
                    Err(e) => error!("🕰️ Error running conversion sync cycle: {e}"),
                }
            }
            if shutdown.is_triggered() {
                info!("🕰️ Conversion sync worker shutting down");
                return;
            }
            tokio::time::sleep(HEARTBEAT).await;
            elapsed += HEARTBEAT;
        }
    })
}
