use std::time::Duration;

use cag_common::Secret;
use log::*;

const DEFAULT_API_URL: &str = "https://googleads.googleapis.com/v16";
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct GadsConfig {
    /// Base URL of the Google Ads API, including the version segment.
    pub api_url: String,
    /// The Google Ads customer id the conversions belong to (digits only, no dashes).
    pub customer_id: String,
    /// Resource name of the conversion action the uploads are recorded against.
    pub conversion_action: String,
    pub developer_token: Secret<String>,
    /// A ready-to-use OAuth access token. Acquiring and refreshing it happens outside this crate.
    pub access_token: Secret<String>,
    /// Request timeout. An upload that exceeds it surfaces as a transport error and is retried by the caller.
    pub timeout: Duration,
}

impl Default for GadsConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            customer_id: String::default(),
            conversion_action: String::default(),
            developer_token: Secret::default(),
            access_token: Secret::default(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }
}

impl GadsConfig {
    pub fn new_from_env_or_default() -> Self {
        let api_url = std::env::var("CAG_GADS_API_URL").unwrap_or_else(|_| {
            info!("CAG_GADS_API_URL not set, using {DEFAULT_API_URL}");
            DEFAULT_API_URL.to_string()
        });
        let customer_id = std::env::var("CAG_GADS_CUSTOMER_ID").unwrap_or_else(|_| {
            warn!("CAG_GADS_CUSTOMER_ID not set. Conversion uploads will fail until it is configured.");
            String::default()
        });
        let conversion_action = std::env::var("CAG_GADS_CONVERSION_ACTION").unwrap_or_else(|_| {
            warn!("CAG_GADS_CONVERSION_ACTION not set. Conversion uploads will fail until it is configured.");
            String::default()
        });
        let developer_token = Secret::new(std::env::var("CAG_GADS_DEVELOPER_TOKEN").unwrap_or_else(|_| {
            warn!("CAG_GADS_DEVELOPER_TOKEN not set, using (probably useless) default");
            String::default()
        }));
        let access_token = Secret::new(std::env::var("CAG_GADS_ACCESS_TOKEN").unwrap_or_else(|_| {
            warn!("CAG_GADS_ACCESS_TOKEN not set, using (probably useless) default");
            String::default()
        }));
        let timeout = std::env::var("CAG_GADS_TIMEOUT_SECS")
            .ok()
            .and_then(|s| {
                s.parse::<u64>()
                    .map_err(|e| warn!("Invalid value for CAG_GADS_TIMEOUT_SECS: {e}"))
                    .ok()
            })
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        Self { api_url, customer_id, conversion_action, developer_token, access_token, timeout }
    }
}
