//! A thin client for the Google Ads conversion upload API.
//!
//! Only the surface the attribution gateway needs is wrapped: uploading click conversions with partial-failure
//! reporting. Token acquisition is out of scope; a ready-to-use access token arrives via [`GadsConfig`].
mod api;
mod config;
mod data_objects;
mod error;

pub mod helpers;

pub use api::GadsApi;
pub use config::GadsConfig;
pub use data_objects::{
    ClickConversion,
    ConversionResult,
    ErrorLocation,
    FieldPathElement,
    GoogleAdsError,
    GoogleAdsFailureDetail,
    GoogleRpcStatus,
    RecordError,
    UploadClickConversionsResponse,
    UserIdentifier,
};
pub use error::GadsApiError;
