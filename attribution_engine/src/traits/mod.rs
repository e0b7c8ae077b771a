//! # Store and collaborator contracts.
//!
//! This module defines the interface contracts the attribution engine expects its collaborators to satisfy.
//!
//! ## Stores
//! The engine never talks to a database directly. Two traits describe what it needs from a backend:
//!
//! * [`MatchStore`] is the matching engine's view of the store: candidate click lookups, the conditional
//!   click-claim write, and purchase match-field persistence. The claim (`mark_click_matched`) is specified as a
//!   conditional update so that attribution stays single-assignment even when several process instances run the
//!   matcher concurrently.
//! * [`SyncStore`] is the sync pipeline's view: eligibility selection (confidence gate, retry backoff, attempt
//!   cap) and per-record delivery state transitions.
//!
//! ## Platform
//! [`ConversionUploader`] is the outbound contract for the advertising platform client. The engine only ever sees
//! per-record tagged outcomes, never a batch-level boolean.
mod conversion_uploader;
mod data_objects;
mod match_store;
mod sync_store;

pub use conversion_uploader::{ConversionPayload, ConversionUploader, UploadError, UploadOutcome, UploadStatus};
pub use data_objects::{ClaimOutcome, CommitOutcome, EligibleConversion, SyncBatchReport, TimeRange};
pub use match_store::{MatchStore, StoreError};
pub use sync_store::SyncStore;
