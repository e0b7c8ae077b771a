use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// One conversion in the wire format of `customers/{id}:uploadClickConversions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClickConversion {
    pub gclid: String,
    /// Resource name of the conversion action this conversion is recorded against.
    pub conversion_action: String,
    /// `yyyy-mm-dd hh:mm:ss+00:00`; see [`crate::helpers::format_conversion_time`].
    pub conversion_date_time: String,
    pub conversion_value: f64,
    pub currency_code: String,
    /// The uploader's stable idempotency token. The platform dedupes repeated uploads on it.
    pub order_id: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub user_identifiers: Vec<UserIdentifier>,
}

/// Hashed contact identifiers for enhanced conversions. Only ever populated with SHA-256 digests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UserIdentifier {
    HashedEmail(String),
    HashedPhoneNumber(String),
}

/// The per-record result list of an upload. A successful record echoes its conversion back; a record that failed
/// partial-failure validation comes back as an empty object, with the failure described in
/// [`UploadClickConversionsResponse::partial_failure_error`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionResult {
    #[serde(default)]
    pub gclid: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub conversion_action: Option<String>,
}

impl ConversionResult {
    /// Empty results are placeholders for records rejected by partial-failure validation.
    pub fn is_accepted(&self) -> bool {
        self.gclid.is_some() || self.order_id.is_some()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadClickConversionsResponse {
    #[serde(default)]
    pub results: Vec<ConversionResult>,
    #[serde(default)]
    pub partial_failure_error: Option<GoogleRpcStatus>,
}

/// `google.rpc.Status` as embedded in partial-failure responses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleRpcStatus {
    #[serde(default)]
    pub code: i32,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub details: Vec<GoogleAdsFailureDetail>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleAdsFailureDetail {
    #[serde(default)]
    pub errors: Vec<GoogleAdsError>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleAdsError {
    /// Map of error category to error code, e.g. `{"conversionUploadError": "CLICK_NOT_FOUND"}`.
    #[serde(default)]
    pub error_code: HashMap<String, String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub location: Option<ErrorLocation>,
}

impl GoogleAdsError {
    /// The bare error code, category stripped.
    pub fn code(&self) -> Option<&str> {
        self.error_code.values().next().map(String::as_str)
    }

    /// Index of the conversion this error refers to within the uploaded batch, parsed from the field path
    /// (`conversions[3].gclid` style).
    pub fn conversion_index(&self) -> Option<usize> {
        self.location
            .as_ref()?
            .field_path_elements
            .iter()
            .find(|e| e.field_name == "conversions")
            .and_then(|e| e.index)
            .map(|i| i as usize)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorLocation {
    #[serde(default)]
    pub field_path_elements: Vec<FieldPathElement>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldPathElement {
    #[serde(default)]
    pub field_name: String,
    #[serde(default)]
    pub index: Option<i64>,
}

/// A per-record failure extracted from the partial-failure status.
#[derive(Debug, Clone)]
pub struct RecordError {
    pub code: String,
    pub message: String,
}

impl UploadClickConversionsResponse {
    /// Collects the partial-failure errors by batch index. Errors without a parseable index are returned under
    /// `None` by the caller's choice — here they are simply skipped, since they cannot be pinned to a record.
    pub fn record_errors(&self) -> HashMap<usize, RecordError> {
        let mut errors = HashMap::new();
        let Some(status) = &self.partial_failure_error else {
            return errors;
        };
        for detail in &status.details {
            for error in &detail.errors {
                let Some(index) = error.conversion_index() else {
                    continue;
                };
                let code = error.code().unwrap_or("UNKNOWN").to_string();
                // First error per record wins; later ones are usually follow-on validation noise.
                errors.entry(index).or_insert_with(|| RecordError { code, message: error.message.clone() });
            }
        }
        errors
    }
}
