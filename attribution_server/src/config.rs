use std::env;

use attribution_engine::{
    db_types::ConfidenceTier,
    MatchingConfig,
    SyncConfig,
};
use cag_common::helpers::parse_boolean_flag;
use chrono::Duration;
use gads_tools::GadsConfig;
use log::*;

const DEFAULT_CAG_HOST: &str = "127.0.0.1";
const DEFAULT_CAG_PORT: u16 = 8370;
const DEFAULT_SYNC_INTERVAL_SECS: u64 = 300;
const DEFAULT_SYNC_BATCH_SIZE: usize = 200;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Matching engine tunables (attribution windows, claim retry bound).
    pub matching: MatchingConfig,
    /// Sync pipeline tunables (confidence gate, attempt cap, backoff).
    pub sync: SyncConfig,
    /// How often the background worker runs a sync cycle.
    pub sync_interval: std::time::Duration,
    /// Set to false when an external scheduler drives `POST /api/sync` instead of the built-in worker.
    pub sync_worker_enabled: bool,
    /// How many records one sync cycle may pick up.
    pub sync_batch_size: usize,
    /// Google Ads API configuration.
    pub gads_config: GadsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_CAG_HOST.to_string(),
            port: DEFAULT_CAG_PORT,
            database_url: String::default(),
            matching: MatchingConfig::default(),
            sync: SyncConfig::default(),
            sync_interval: std::time::Duration::from_secs(DEFAULT_SYNC_INTERVAL_SECS),
            sync_worker_enabled: true,
            sync_batch_size: DEFAULT_SYNC_BATCH_SIZE,
            gads_config: GadsConfig::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(host: &str, port: u16) -> Self {
        Self { host: host.to_string(), port, ..Default::default() }
    }

    pub fn from_env_or_default() -> Self {
        let host = env::var("CAG_HOST").ok().unwrap_or_else(|| DEFAULT_CAG_HOST.into());
        let port = env::var("CAG_PORT")
            .map(|s| {
                s.parse::<u16>().unwrap_or_else(|e| {
                    error!(
                        "🪛️ {s} is not a valid port for CAG_PORT. {e} Using the default, {DEFAULT_CAG_PORT}, instead."
                    );
                    DEFAULT_CAG_PORT
                })
            })
            .ok()
            .unwrap_or(DEFAULT_CAG_PORT);
        let database_url = env::var("CAG_DATABASE_URL").ok().unwrap_or_else(|| {
            error!("🪛️ CAG_DATABASE_URL is not set. Please set it to the URL for the CAG database.");
            String::default()
        });
        let matching = configure_matching();
        let sync = configure_sync();
        let sync_interval = env_u64("CAG_SYNC_INTERVAL_SECS", DEFAULT_SYNC_INTERVAL_SECS);
        let sync_worker_enabled = parse_boolean_flag(env::var("CAG_SYNC_WORKER_ENABLED").ok(), true);
        let sync_batch_size = env_u64("CAG_SYNC_BATCH_SIZE", DEFAULT_SYNC_BATCH_SIZE as u64) as usize;
        let gads_config = GadsConfig::new_from_env_or_default();
        Self {
            host,
            port,
            database_url,
            matching,
            sync,
            sync_interval: std::time::Duration::from_secs(sync_interval),
            sync_worker_enabled,
            sync_batch_size,
            gads_config,
        }
    }
}

fn configure_matching() -> MatchingConfig {
    let defaults = MatchingConfig::default();
    let identity_window = env_i64("CAG_IDENTITY_WINDOW_DAYS", defaults.identity_window.num_days());
    let ip_window = env_i64("CAG_IP_WINDOW_HOURS", defaults.ip_window.num_hours());
    let claim_retries = env_u64("CAG_CLAIM_RETRIES", defaults.claim_retries as u64) as u32;
    MatchingConfig {
        identity_window: Duration::days(identity_window),
        ip_window: Duration::hours(ip_window),
        claim_retries,
    }
}

fn configure_sync() -> SyncConfig {
    let defaults = SyncConfig::default();
    let min_tier = env::var("CAG_MIN_SYNC_TIER")
        .ok()
        .and_then(|s| {
            s.parse::<ConfidenceTier>()
                .map_err(|e| warn!("🪛️ Invalid configuration value for CAG_MIN_SYNC_TIER. {e}"))
                .ok()
        })
        .unwrap_or(defaults.min_tier);
    let max_attempts = env_i64("CAG_MAX_SYNC_ATTEMPTS", defaults.max_attempts);
    let backoff_base = env_i64("CAG_SYNC_BACKOFF_SECS", defaults.backoff_base.num_seconds());
    SyncConfig { min_tier, max_attempts, backoff_base: Duration::seconds(backoff_base) }
}

fn env_i64(var: &str, default: i64) -> i64 {
    env::var(var)
        .map_err(|_| info!("🪛️ {var} is not set. Using the default value of {default}."))
        .and_then(|s| {
            s.parse::<i64>().map_err(|e| warn!("🪛️ Invalid configuration value for {var}. {e}"))
        })
        .ok()
        .unwrap_or(default)
}

fn env_u64(var: &str, default: u64) -> u64 {
    env::var(var)
        .map_err(|_| info!("🪛️ {var} is not set. Using the default value of {default}."))
        .and_then(|s| {
            s.parse::<u64>().map_err(|e| warn!("🪛️ Invalid configuration value for {var}. {e}"))
        })
        .ok()
        .unwrap_or(default)
}

//-------------------------------------------------  SyncOptions  ------------------------------------------------------
/// The subset of the configuration the sync route needs at request time. Kept small so no secrets travel with it.
#[derive(Clone, Copy, Debug)]
pub struct SyncOptions {
    pub default_batch_size: usize,
}

impl SyncOptions {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self { default_batch_size: config.sync_batch_size }
    }
}
