use std::{fmt::Display, str::FromStr};

use cag_common::Money;
use chrono::{DateTime, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};
use thiserror::Error;

//--------------------------------------        ClickId        -------------------------------------------------------
/// Opaque identifier assigned to a click event at capture time. The identifiers sort lexicographically, which gives
/// the engine a total order for deterministic tie-breaking between candidates with equal timestamps.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct ClickId(pub String);

impl FromStr for ClickId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for ClickId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ClickId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Display for ClickId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl ClickId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------      PurchaseId       -------------------------------------------------------
/// The purchase identifier as assigned by the source commerce system.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct PurchaseId(pub String);

impl FromStr for PurchaseId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for PurchaseId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for PurchaseId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl Display for PurchaseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PurchaseId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

//--------------------------------------    ConfidenceTier     -------------------------------------------------------
/// How confident the matching engine is that a purchase was caused by the click it is attributed to.
///
/// The declaration order gives `None < Probabilistic < Identity < ExactId`, which the engine relies on for
/// tie-breaking, for upgrade-only re-matching and for the sync eligibility gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceTier {
    /// No plausible click was found for the purchase.
    None,
    /// The purchase shares only an IP address with the click, within a tight window.
    Probabilistic,
    /// The purchase and the click share a hashed contact identity.
    Identity,
    /// The purchase carried the platform-issued click id itself.
    ExactId,
}

impl Display for ConfidenceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfidenceTier::None => write!(f, "NONE"),
            ConfidenceTier::Probabilistic => write!(f, "PROBABILISTIC"),
            ConfidenceTier::Identity => write!(f, "IDENTITY"),
            ConfidenceTier::ExactId => write!(f, "EXACT_ID"),
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("Invalid conversion: {0}")]
pub struct ConversionError(pub String);

impl FromStr for ConfidenceTier {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NONE" => Ok(Self::None),
            "PROBABILISTIC" => Ok(Self::Probabilistic),
            "IDENTITY" => Ok(Self::Identity),
            "EXACT_ID" => Ok(Self::ExactId),
            s => Err(ConversionError(format!("Invalid confidence tier: {s}"))),
        }
    }
}

impl From<String> for ConfidenceTier {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid confidence tier: {value}. But this conversion cannot fail. Defaulting to NONE");
            ConfidenceTier::None
        })
    }
}

//--------------------------------------      SyncStatus       -------------------------------------------------------
/// The delivery state of a purchase with respect to the advertising platform. `Synced` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
#[sqlx(rename_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    /// The purchase has never been uploaded.
    Pending,
    /// The purchase has been delivered to the platform. Terminal.
    Synced,
    /// The last upload attempt failed transiently and the record is eligible for retry after backoff.
    FailedRetryable,
    /// The platform rejected the record, or the attempt cap was reached. Terminal.
    FailedPermanent,
}

impl Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncStatus::Pending => write!(f, "PENDING"),
            SyncStatus::Synced => write!(f, "SYNCED"),
            SyncStatus::FailedRetryable => write!(f, "FAILED_RETRYABLE"),
            SyncStatus::FailedPermanent => write!(f, "FAILED_PERMANENT"),
        }
    }
}

impl FromStr for SyncStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "SYNCED" => Ok(Self::Synced),
            "FAILED_RETRYABLE" => Ok(Self::FailedRetryable),
            "FAILED_PERMANENT" => Ok(Self::FailedPermanent),
            s => Err(ConversionError(format!("Invalid sync status: {s}"))),
        }
    }
}

impl From<String> for SyncStatus {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid sync status: {value}. But this conversion cannot fail. Defaulting to PENDING");
            SyncStatus::Pending
        })
    }
}

//--------------------------------------      ClickEvent       -------------------------------------------------------
/// A click captured by the tracking pixel. Created by the ingestion pipeline; the engine only ever writes the
/// `matched_purchase_id` claim marker.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ClickEvent {
    pub id: ClickId,
    /// The click identifier issued by the advertising platform, if the landing URL carried one.
    pub gclid: Option<String>,
    /// Lowercase hex SHA-256 of the normalized email captured by the pixel, if any.
    pub email_hash: Option<String>,
    /// Lowercase hex SHA-256 of the normalized phone number captured by the pixel, if any.
    pub phone_hash: Option<String>,
    pub ip: String,
    pub created_at: DateTime<Utc>,
    /// Set by the geo-enrichment pipeline. Read-only here.
    pub processed: bool,
    /// The purchase this click has been attributed to. NULL means the click is unclaimed.
    pub matched_purchase_id: Option<PurchaseId>,
}

impl ClickEvent {
    pub fn is_unmatched(&self) -> bool {
        self.matched_purchase_id.is_none()
    }
}

//--------------------------------------       NewClick        -------------------------------------------------------
/// A click event as delivered by the ingestion pipeline. Identity fields arrive already normalized and hashed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewClick {
    pub id: ClickId,
    pub gclid: Option<String>,
    pub email_hash: Option<String>,
    pub phone_hash: Option<String>,
    pub ip: String,
    pub created_at: DateTime<Utc>,
}

impl NewClick {
    pub fn new<S: Into<ClickId>>(id: S, ip: &str, created_at: DateTime<Utc>) -> Self {
        Self { id: id.into(), gclid: None, email_hash: None, phone_hash: None, ip: ip.to_string(), created_at }
    }

    pub fn with_gclid(mut self, gclid: &str) -> Self {
        self.gclid = Some(gclid.to_string());
        self
    }

    pub fn with_email_hash(mut self, hash: &str) -> Self {
        self.email_hash = Some(hash.to_string());
        self
    }

    pub fn with_phone_hash(mut self, hash: &str) -> Self {
        self.phone_hash = Some(hash.to_string());
        self
    }
}

//--------------------------------------    PurchaseRecord     -------------------------------------------------------
/// A purchase as stored by the gateway, together with the match and audit fields the engine maintains.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub id: i64,
    pub purchase_id: PurchaseId,
    /// Pass-through advertising click id, when the source system captured one.
    pub gclid: Option<String>,
    /// Raw contact email from the purchase feed. Hashed at the sync boundary; never uploaded raw.
    pub email: Option<String>,
    pub phone: Option<String>,
    /// Originating IP of the purchase session, if the feed provides one.
    pub ip: Option<String>,
    pub purchased_at: DateTime<Utc>,
    pub value: Money,
    pub currency: String,
    pub matched_click_id: Option<ClickId>,
    pub confidence: ConfidenceTier,
    pub matched_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PurchaseRecord {
    /// The stored match fields as a `MatchResult`, if the purchase has ever been through the engine.
    pub fn stored_match(&self) -> MatchResult {
        MatchResult {
            purchase_id: self.purchase_id.clone(),
            click_id: self.matched_click_id.clone(),
            confidence: self.confidence,
            matched_at: self.matched_at.unwrap_or(self.updated_at),
        }
    }
}

//--------------------------------------      NewPurchase      -------------------------------------------------------
/// A purchase record as delivered by the external purchase feed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPurchase {
    pub purchase_id: PurchaseId,
    pub gclid: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub ip: Option<String>,
    pub purchased_at: DateTime<Utc>,
    /// The monetary value of the purchase. Defaults to zero when the feed omits it.
    pub value: Money,
    pub currency: String,
}

impl NewPurchase {
    pub fn new<S: Into<PurchaseId>>(purchase_id: S, purchased_at: DateTime<Utc>) -> Self {
        Self {
            purchase_id: purchase_id.into(),
            gclid: None,
            email: None,
            phone: None,
            ip: None,
            purchased_at,
            value: Money::default(),
            currency: "USD".to_string(),
        }
    }

    pub fn with_gclid(mut self, gclid: &str) -> Self {
        self.gclid = Some(gclid.to_string());
        self
    }

    pub fn with_email(mut self, email: &str) -> Self {
        self.email = Some(email.to_string());
        self
    }

    pub fn with_phone(mut self, phone: &str) -> Self {
        self.phone = Some(phone.to_string());
        self
    }

    pub fn with_ip(mut self, ip: &str) -> Self {
        self.ip = Some(ip.to_string());
        self
    }

    pub fn with_value(mut self, value: Money) -> Self {
        self.value = value;
        self
    }

    /// True if the purchase carries any contact identity at all (before normalization).
    pub fn has_identity(&self) -> bool {
        self.email.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false)
            || self.phone.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false)
    }

    /// True if the purchase carries no signal the engine could ever match on.
    pub fn is_undeterminable(&self) -> bool {
        self.gclid.is_none() && !self.has_identity() && self.ip.as_deref().map(str::is_empty).unwrap_or(true)
    }
}

//--------------------------------------      MatchResult      -------------------------------------------------------
/// The outcome of running a purchase through the matching engine. Never mutated; a re-match produces a new
/// `MatchResult` which supersedes the stored match fields on the purchase.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchResult {
    pub purchase_id: PurchaseId,
    pub click_id: Option<ClickId>,
    pub confidence: ConfidenceTier,
    pub matched_at: DateTime<Utc>,
}

impl MatchResult {
    pub fn new(purchase_id: PurchaseId, click_id: ClickId, confidence: ConfidenceTier, matched_at: DateTime<Utc>) -> Self {
        Self { purchase_id, click_id: Some(click_id), confidence, matched_at }
    }

    pub fn none(purchase_id: PurchaseId, matched_at: DateTime<Utc>) -> Self {
        Self { purchase_id, click_id: None, confidence: ConfidenceTier::None, matched_at }
    }

    pub fn is_match(&self) -> bool {
        self.click_id.is_some()
    }
}

//--------------------------------------      SyncRecord       -------------------------------------------------------
/// Per-purchase delivery bookkeeping. One row per purchase, created alongside it.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SyncRecord {
    pub id: i64,
    pub purchase_id: PurchaseId,
    pub attempts: i64,
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Earliest time the next attempt may run. Persisted so backoff survives restarts.
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    /// Opaque reference returned by the platform for a successful upload.
    pub platform_ref: Option<String>,
    pub error_tag: Option<String>,
    pub updated_at: DateTime<Utc>,
}
