use attribution_engine::db_types::{ConfidenceTier, MatchResult, NewPurchase};
use cag_common::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A purchase as submitted over the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseSubmission {
    pub purchase_id: String,
    #[serde(default)]
    pub gclid: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub ip: Option<String>,
    pub purchased_at: DateTime<Utc>,
    /// Purchase value in minor currency units. Defaults to zero when the feed does not supply one.
    #[serde(default)]
    pub value: Money,
    #[serde(default = "default_currency")]
    pub currency: String,
}

fn default_currency() -> String {
    "USD".to_string()
}

impl From<PurchaseSubmission> for NewPurchase {
    fn from(submission: PurchaseSubmission) -> Self {
        NewPurchase {
            purchase_id: submission.purchase_id.into(),
            gclid: submission.gclid,
            email: submission.email,
            phone: submission.phone,
            ip: submission.ip,
            purchased_at: submission.purchased_at,
            value: submission.value,
            currency: submission.currency,
        }
    }
}

/// The match endpoint accepts either one purchase or a batch. Kept as one endpoint so callers do not have to
/// care; the response mirrors the request shape.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MatchRequest {
    Bulk { purchases: Vec<PurchaseSubmission> },
    Single(PurchaseSubmission),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResponse {
    pub purchase_id: String,
    pub matched_click_id: Option<String>,
    pub confidence: ConfidenceTier,
}

impl From<MatchResult> for MatchResponse {
    fn from(result: MatchResult) -> Self {
        Self {
            purchase_id: result.purchase_id.to_string(),
            matched_click_id: result.click_id.map(|c| c.to_string()),
            confidence: result.confidence,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Upper bound for this cycle. Falls back to the configured batch size.
    #[serde(default)]
    pub max_size: Option<usize>,
}
