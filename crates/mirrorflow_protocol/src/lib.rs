//! Shared vocabulary for the Mirrorflow crates.
//!
//! - `ids`: operation identifiers
//! - `types`: operation status, catalog keys and operator entries
//! - `paths`: on-disk layout under the Mirrorflow home directory
//! - `config`: `config.toml` loading with defaults for every field
//! - `api`: request/response payloads and stable error codes for API surfaces

pub mod api;
pub mod config;
pub mod defaults;
pub mod ids;
pub mod paths;
pub mod types;

pub use api::{ErrorCode, ErrorResponse};
pub use config::{CatalogConfig, ConfigError, MirrorflowConfig, OperationsConfig};
pub use ids::{IdParseError, OperationId};
pub use types::{
    CatalogKey, CatalogSourceType, ChannelKey, OperationStatus, OperatorEntry, PlatformVersion,
    TypeParseError,
};
