//! API payload types.
//!
//! These are the request/response bodies an API surface (CLI `--json`, an HTTP
//! layer) exchanges with the engine. Errors always travel as [`ErrorResponse`]
//! carrying a stable [`ErrorCode`].

use crate::types::{CatalogSourceType, OperationStatus, OperatorEntry, PlatformVersion};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Error Response
// ============================================================================

/// Stable, machine-readable error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    NotFound,
    ValidationError,
    ProcessSpawnError,
    ExternalToolFailure,
    CacheLoadError,
    FetchJobError,
    ParseError,
    CapacityExceeded,
    NotRunning,
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::ValidationError => "VALIDATION_ERROR",
            ErrorCode::ProcessSpawnError => "PROCESS_SPAWN_ERROR",
            ErrorCode::ExternalToolFailure => "EXTERNAL_TOOL_FAILURE",
            ErrorCode::CacheLoadError => "CACHE_LOAD_ERROR",
            ErrorCode::FetchJobError => "FETCH_JOB_ERROR",
            ErrorCode::ParseError => "PARSE_ERROR",
            ErrorCode::CapacityExceeded => "CAPACITY_EXCEEDED",
            ErrorCode::NotRunning => "NOT_RUNNING",
            ErrorCode::Internal => "INTERNAL",
        }
    }

    /// HTTP status an HTTP layer should answer with.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::NotFound => 404,
            ErrorCode::ValidationError => 400,
            ErrorCode::NotRunning => 409,
            ErrorCode::CapacityExceeded => 429,
            ErrorCode::ProcessSpawnError
            | ErrorCode::ExternalToolFailure
            | ErrorCode::FetchJobError => 502,
            ErrorCode::CacheLoadError | ErrorCode::ParseError | ErrorCode::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Implemented by every engine error that can reach an API caller.
pub trait ApiError: std::error::Error {
    fn error_code(&self) -> ErrorCode;

    fn to_response(&self) -> ErrorResponse {
        ErrorResponse::new(self.to_string(), self.error_code())
    }
}

/// Standard error response for the API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, code: ErrorCode) -> Self {
        Self {
            error: error.into(),
            code,
            details: None,
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

// ============================================================================
// Operations
// ============================================================================

/// Body of a start request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartOperationRequest {
    pub name: String,
    pub config_ref: String,
}

/// Query of a list request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListOperationsQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<OperationStatus>,
}

/// One event of a live log stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogChunkEvent {
    /// Byte offset of `data` within the log artifact
    pub offset: u64,
    pub data: String,
}

// ============================================================================
// Catalogs
// ============================================================================

/// Fetch state of one catalog version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogVersionInfo {
    pub version: PlatformVersion,
    pub image: String,
    pub prefetched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operator_count: Option<usize>,
}

/// One catalog source with the versions known for it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSummary {
    pub source: CatalogSourceType,
    pub display_name: String,
    pub description: String,
    pub url: String,
    pub versions: Vec<CatalogVersionInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListCatalogsResponse {
    pub catalogs: Vec<CatalogSummary>,
}

/// Operators of one catalog, tagged with where they were resolved from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogOperators {
    pub source: CatalogSourceType,
    pub version: PlatformVersion,
    pub origin: LookupOrigin,
    pub operators: Vec<OperatorEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListOperatorsResponse {
    pub catalogs: Vec<CatalogOperators>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListChannelsResponse {
    pub operator: String,
    pub origin: LookupOrigin,
    pub channels: Vec<String>,
}

/// Which layer of the resolution chain answered a lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LookupOrigin {
    Prefetched,
    StaticFallback,
    Default,
}
