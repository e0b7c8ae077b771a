//! Bridges the engine's [`ConversionUploader`] contract onto the Google Ads client crate.
//!
//! The engine only understands per-record tagged outcomes; the Google Ads API reports success through result
//! slots and failure through a partial-failure status whose errors point back at batch indices. This module
//! translates between the two and classifies the platform's error codes into retryable and permanent.
use attribution_engine::traits::{
    ConversionPayload, ConversionUploader, UploadError, UploadOutcome, UploadStatus,
};
use gads_tools::{
    helpers::{conversion_value, format_conversion_time},
    ClickConversion,
    GadsApi,
    GadsApiError,
    UserIdentifier,
};
use log::*;

/// Error codes where the record itself is at fault. Everything else is treated as retryable, per the platform's
/// own guidance that unknown codes should be retried.
const PERMANENT_ERROR_CODES: [&str; 6] = [
    "UNPARSEABLE_GCLID",
    "EXPIRED_CLICK",
    "DUPLICATE_ORDER_ID",
    "CONVERSION_PRECEDES_CLICK",
    "INVALID_CONVERSION_ACTION",
    "UNSUPPORTED_CURRENCY",
];

#[derive(Clone)]
pub struct GadsUploader {
    api: GadsApi,
}

impl GadsUploader {
    pub fn new(api: GadsApi) -> Self {
        Self { api }
    }
}

impl ConversionUploader for GadsUploader {
    async fn upload_conversions(&self, batch: &[ConversionPayload]) -> Result<Vec<UploadOutcome>, UploadError> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let action = self.api.config().conversion_action.clone();
        let conversions: Vec<ClickConversion> = batch.iter().map(|p| to_click_conversion(p, &action)).collect();
        let response = self.api.upload_click_conversions(&conversions).await.map_err(map_api_error)?;
        let record_errors = response.record_errors();

        let mut outcomes = Vec::with_capacity(batch.len());
        for (index, payload) in batch.iter().enumerate() {
            let outcome = if let Some(error) = record_errors.get(&index) {
                UploadOutcome {
                    record_ref: payload.order_ref.clone(),
                    status: classify_error_code(&error.code),
                    detail: Some(error.code.clone()),
                }
            } else if response.results.get(index).map(|r| r.is_accepted()).unwrap_or(false) {
                UploadOutcome::success(&payload.order_ref, response.results[index].conversion_action.clone())
            } else {
                // An empty result slot without a matching partial-failure error is ambiguous; leave the record
                // retryable rather than guessing.
                warn!("No usable outcome for conversion [{}] at index {index}", payload.order_ref);
                UploadOutcome {
                    record_ref: payload.order_ref.clone(),
                    status: UploadStatus::RetryableFailure,
                    detail: Some("EMPTY_RESULT".to_string()),
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

fn to_click_conversion(payload: &ConversionPayload, conversion_action: &str) -> ClickConversion {
    let mut user_identifiers = Vec::with_capacity(2);
    if let Some(email) = &payload.hashed_email {
        user_identifiers.push(UserIdentifier::HashedEmail(email.clone()));
    }
    if let Some(phone) = &payload.hashed_phone {
        user_identifiers.push(UserIdentifier::HashedPhoneNumber(phone.clone()));
    }
    ClickConversion {
        gclid: payload.gclid.clone(),
        conversion_action: conversion_action.to_string(),
        conversion_date_time: format_conversion_time(payload.conversion_time),
        conversion_value: conversion_value(payload.value),
        currency_code: payload.currency.clone(),
        order_id: payload.order_ref.clone(),
        user_identifiers,
    }
}

fn map_api_error(e: GadsApiError) -> UploadError {
    match e {
        GadsApiError::QueryError { status: 401, message } => UploadError::Unauthorized(message),
        GadsApiError::JsonError(message) => UploadError::InvalidResponse(message),
        e if e.is_retryable() => UploadError::Transport(e.to_string()),
        e => UploadError::InvalidResponse(e.to_string()),
    }
}

fn classify_error_code(code: &str) -> UploadStatus {
    if PERMANENT_ERROR_CODES.contains(&code) {
        UploadStatus::PermanentFailure
    } else {
        UploadStatus::RetryableFailure
    }
}

#[cfg(test)]
mod test {
    use cag_common::Money;
    use chrono::Utc;

    use super::*;

    #[test]
    fn known_rejection_codes_are_permanent_everything_else_retries() {
        assert_eq!(classify_error_code("UNPARSEABLE_GCLID"), UploadStatus::PermanentFailure);
        assert_eq!(classify_error_code("DUPLICATE_ORDER_ID"), UploadStatus::PermanentFailure);
        assert_eq!(classify_error_code("INTERNAL_ERROR"), UploadStatus::RetryableFailure);
        assert_eq!(classify_error_code("SOMETHING_NEW"), UploadStatus::RetryableFailure);
    }

    #[test]
    fn conversion_carries_identifiers_and_idempotency_token() {
        let payload = ConversionPayload {
            order_ref: "p1".to_string(),
            gclid: "G-1".to_string(),
            conversion_time: Utc::now(),
            value: Money::from(1250),
            currency: "USD".to_string(),
            hashed_email: Some("feedface".to_string()),
            hashed_phone: None,
        };
        let conversion = to_click_conversion(&payload, "customers/1/conversionActions/2");
        assert_eq!(conversion.order_id, "p1");
        assert_eq!(conversion.gclid, "G-1");
        assert_eq!(conversion.conversion_value, 12.5);
        assert_eq!(conversion.user_identifiers.len(), 1);
    }
}
