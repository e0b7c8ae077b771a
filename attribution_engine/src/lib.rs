//! Attribution Engine
//!
//! The attribution engine is the core of the conversion attribution gateway: it decides which captured click
//! event caused which purchase, and it delivers matched purchases to the advertising platform as hashed
//! conversions, exactly once each.
//!
//! The library is divided into three main sections:
//! 1. Data types ([`mod@db_types`]) shared by every layer: click events, purchase records, match results,
//!    confidence tiers and sync bookkeeping.
//! 2. Contracts ([`mod@traits`]): the store traits a backend must implement ([`MatchStore`], [`SyncStore`]) and
//!    the outbound platform contract ([`traits::ConversionUploader`]). SQLite is the bundled backend
//!    ([`SqliteDatabase`]); the traits are what the APIs are written against.
//! 3. The engine APIs ([`mod@cag_api`]): [`MatchingApi`] (tiered matching with conditional click claiming) and
//!    [`SyncApi`] (batched, idempotent conversion delivery).
pub mod cag_api;
pub mod db_types;
pub mod helpers;
pub mod traits;

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "test_utils")]
pub mod test_utils;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDatabase;
pub use cag_api::{EngineError, MatchingApi, MatchingConfig, SyncApi, SyncConfig};
pub use traits::{MatchStore, StoreError, SyncStore};
