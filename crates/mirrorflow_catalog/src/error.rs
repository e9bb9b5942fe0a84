use mirrorflow_protocol::api::{ApiError, ErrorCode};
use mirrorflow_protocol::CatalogKey;
use thiserror::Error;

/// Errors raised by the catalog pipeline and cache.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Pre-fetched index missing or unreadable. Callers fall back, never fail.
    #[error("Cache load error: {0}")]
    CacheLoad(String),

    /// Pull/extract failed after retries; isolated to one job.
    #[error("Fetch job {key} failed after {attempts} attempt(s): {message}")]
    FetchJob {
        key: CatalogKey,
        attempts: u32,
        message: String,
    },

    /// One operator entry could not be normalised; isolated to that entry.
    #[error("Parse error in '{operator}': {message}")]
    Parse { operator: String, message: String },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

impl From<crate::parser::ParseError> for CatalogError {
    fn from(err: crate::parser::ParseError) -> Self {
        CatalogError::Parse {
            operator: err.operator,
            message: err.message,
        }
    }
}

impl ApiError for CatalogError {
    fn error_code(&self) -> ErrorCode {
        match self {
            CatalogError::CacheLoad(_) => ErrorCode::CacheLoadError,
            CatalogError::FetchJob { .. } => ErrorCode::FetchJobError,
            CatalogError::Parse { .. } => ErrorCode::ParseError,
            CatalogError::Validation(_) => ErrorCode::ValidationError,
            CatalogError::Io(_) | CatalogError::Serialization(_) => ErrorCode::Internal,
        }
    }
}
