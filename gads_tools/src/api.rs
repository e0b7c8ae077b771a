use std::sync::Arc;

use log::*;
use reqwest::{
    header::{HeaderMap, HeaderValue},
    Client,
    Method,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    config::GadsConfig,
    data_objects::{ClickConversion, UploadClickConversionsResponse},
    GadsApiError,
};

#[derive(Clone)]
pub struct GadsApi {
    config: GadsConfig,
    client: Arc<Client>,
}

impl GadsApi {
    pub fn new(config: GadsConfig) -> Result<Self, GadsApiError> {
        let mut headers = HeaderMap::with_capacity(3);
        let token = HeaderValue::from_str(&format!("Bearer {}", config.access_token.reveal()))
            .map_err(|e| GadsApiError::Initialization(e.to_string()))?;
        headers.insert("Authorization", token);
        let dev_token = HeaderValue::from_str(config.developer_token.reveal().as_str())
            .map_err(|e| GadsApiError::Initialization(e.to_string()))?;
        headers.insert("developer-token", dev_token);
        headers.insert("Content-Type", HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()
            .map_err(|e| GadsApiError::Initialization(e.to_string()))?;
        Ok(Self { config, client: Arc::new(client) })
    }

    pub fn config(&self) -> &GadsConfig {
        &self.config
    }

    pub async fn rest_query<T: DeserializeOwned, B: Serialize>(
        &self,
        method: Method,
        path: &str,
        body: Option<B>,
    ) -> Result<T, GadsApiError> {
        let url = self.url(path);
        trace!("Sending REST query: {url}");
        let mut req = self.client.request(method, url);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let response = req.send().await.map_err(|e| GadsApiError::RestResponseError(e.to_string()))?;
        if response.status().is_success() {
            trace!("REST query successful. {}", response.status());
            response.json::<T>().await.map_err(|e| GadsApiError::JsonError(e.to_string()))
        } else {
            let status = response.status().as_u16();
            let message = response.text().await.map_err(|e| GadsApiError::RestResponseError(e.to_string()))?;
            Err(GadsApiError::QueryError { status, message })
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.config.api_url)
    }

    /// Uploads a batch of click conversions with `partialFailure` enabled, so one bad record never sinks the
    /// batch. The response carries a result slot per uploaded conversion plus a partial-failure status whose
    /// errors point back at batch indices.
    pub async fn upload_click_conversions(
        &self,
        conversions: &[ClickConversion],
    ) -> Result<UploadClickConversionsResponse, GadsApiError> {
        let path = format!("/customers/{}:uploadClickConversions", self.config.customer_id);
        let body = serde_json::json!({
            "conversions": conversions,
            "partialFailure": true,
        });
        debug!("Uploading {} click conversion(s)", conversions.len());
        let response =
            self.rest_query::<UploadClickConversionsResponse, serde_json::Value>(Method::POST, &path, Some(body))
                .await?;
        info!(
            "Uploaded {} click conversion(s). {} result(s), partial failure: {}",
            conversions.len(),
            response.results.len(),
            response.partial_failure_error.is_some()
        );
        Ok(response)
    }
}
