//! The engine's public API surface: the matching engine and the conversion sync pipeline, both generic over the
//! store traits so any backend (and any test double) can sit underneath them.
pub mod errors;
pub mod matching_api;
pub mod strategies;
pub mod sync_api;

pub use errors::EngineError;
pub use matching_api::{MatchingApi, MatchingConfig};
pub use sync_api::{SyncApi, SyncConfig};
