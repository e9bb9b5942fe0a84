use mirrorflow_protocol::api::{ApiError, ErrorCode, ErrorResponse};
use mirrorflow_protocol::OperationId;
use thiserror::Error;

/// Errors raised by the operation supervisor and log tailer.
#[derive(Debug, Error)]
pub enum OpsError {
    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("Validation error: {0}")]
    Validation(String),

    /// The mirroring tool could not be started. The operation is recorded as failed.
    #[error("Failed to start operation {id}: {message}")]
    ProcessSpawn { id: OperationId, message: String },

    #[error("Mirroring tool failed: {0}")]
    ExternalToolFailure(String),

    #[error("Too many running operations (limit {max})")]
    CapacityExceeded { max: usize },

    #[error("Operation {0} is not running")]
    NotRunning(OperationId),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, OpsError>;

impl OpsError {
    pub fn operation_not_found(id: &OperationId) -> Self {
        OpsError::NotFound {
            kind: "Operation",
            name: id.to_string(),
        }
    }
}

impl ApiError for OpsError {
    fn error_code(&self) -> ErrorCode {
        match self {
            OpsError::NotFound { .. } => ErrorCode::NotFound,
            OpsError::Validation(_) => ErrorCode::ValidationError,
            OpsError::ProcessSpawn { .. } => ErrorCode::ProcessSpawnError,
            OpsError::ExternalToolFailure(_) => ErrorCode::ExternalToolFailure,
            OpsError::CapacityExceeded { .. } => ErrorCode::CapacityExceeded,
            OpsError::NotRunning(_) => ErrorCode::NotRunning,
            OpsError::Io(_) | OpsError::Internal(_) => ErrorCode::Internal,
        }
    }

    fn to_response(&self) -> ErrorResponse {
        let response = ErrorResponse::new(self.to_string(), self.error_code());
        match self {
            OpsError::CapacityExceeded { max } => {
                response.with_details(serde_json::json!({ "max_concurrent": max }))
            }
            OpsError::ProcessSpawn { id, .. } => {
                response.with_details(serde_json::json!({ "operation_id": id }))
            }
            _ => response,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_response_carries_limit() {
        let resp = OpsError::CapacityExceeded { max: 2 }.to_response();
        assert_eq!(resp.code, ErrorCode::CapacityExceeded);
        assert_eq!(resp.details.unwrap()["max_concurrent"], 2);
    }

    #[test]
    fn test_not_found_message() {
        let err = OpsError::NotFound {
            kind: "Configuration",
            name: "nightly".into(),
        };
        assert_eq!(err.to_string(), "Configuration not found: nightly");
        assert_eq!(err.error_code().http_status(), 404);
    }
}
