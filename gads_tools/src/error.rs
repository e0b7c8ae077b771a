use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum GadsApiError {
    #[error("Error initializing the Google Ads API client: {0}")]
    Initialization(String),
    #[error("Error sending request to the Google Ads API: {0}")]
    RestResponseError(String),
    #[error("Could not deserialize response from the Google Ads API: {0}")]
    JsonError(String),
    #[error("The Google Ads API returned an error. Status: {status}, Message: {message}")]
    QueryError { status: u16, message: String },
    #[error("The Google Ads API returned an empty response")]
    EmptyResponse,
}

impl GadsApiError {
    /// True when the whole request can be retried verbatim: auth failures, throttling and server-side errors.
    /// A 4xx other than 401/408/429 means the request itself is wrong and retrying cannot help.
    pub fn is_retryable(&self) -> bool {
        match self {
            GadsApiError::QueryError { status, .. } => {
                matches!(*status, 401 | 408 | 429) || *status >= 500
            },
            GadsApiError::RestResponseError(_) | GadsApiError::EmptyResponse => true,
            GadsApiError::Initialization(_) | GadsApiError::JsonError(_) => false,
        }
    }
}
