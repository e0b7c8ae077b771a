use cag_common::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One conversion, formatted for delivery. Identity fields are already hashed; raw contact data never reaches an
/// uploader implementation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversionPayload {
    /// Stable idempotency token, derived from the purchase id. The platform dedupes repeated uploads on it, which
    /// is what makes retrying an ambiguous outcome safe.
    pub order_ref: String,
    pub gclid: String,
    pub conversion_time: DateTime<Utc>,
    pub value: Money,
    pub currency: String,
    pub hashed_email: Option<String>,
    pub hashed_phone: Option<String>,
}

/// Per-record upload outcome classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadStatus {
    Success,
    /// Transient platform-side failure; the record may be retried.
    RetryableFailure,
    /// The platform rejected the record (malformed, duplicate, unknown click id). Retrying cannot help.
    PermanentFailure,
}

/// The platform's verdict for a single record of an upload batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadOutcome {
    /// Echo of [`ConversionPayload::order_ref`].
    pub record_ref: String,
    pub status: UploadStatus,
    pub detail: Option<String>,
}

impl UploadOutcome {
    pub fn success(record_ref: &str, detail: Option<String>) -> Self {
        Self { record_ref: record_ref.to_string(), status: UploadStatus::Success, detail }
    }
}

/// Batch-level upload failure: nothing reached the platform, or its response was unusable. The sync pipeline
/// treats every record of the batch as retryable.
#[derive(Debug, Clone, Error)]
pub enum UploadError {
    #[error("Could not reach the advertising platform: {0}")]
    Transport(String),
    #[error("The advertising platform rejected our credentials: {0}")]
    Unauthorized(String),
    #[error("Could not interpret the advertising platform response: {0}")]
    InvalidResponse(String),
}

/// Transport contract for the advertising platform's conversion upload call.
///
/// One call delivers a whole batch; the platform reports per-record outcomes (partial failure), never a single
/// batch boolean. Implementations must carry a timeout — a hung upload surfaces as
/// [`UploadError::Transport`], which the pipeline classifies as retryable.
#[allow(async_fn_in_trait)]
pub trait ConversionUploader {
    async fn upload_conversions(&self, batch: &[ConversionPayload]) -> Result<Vec<UploadOutcome>, UploadError>;
}
