//! Helpful error types for CLI commands
//!
//! Every error includes:
//! - What went wrong
//! - Context about the situation
//! - Suggestions for how to fix it
//!
//! Typed library errors keep their wire shape: in `--json` mode they are
//! printed as an [`ErrorResponse`].

use mirrorflow_catalog::CatalogError;
use mirrorflow_ops::OpsError;
use mirrorflow_protocol::api::{ApiError, ErrorCode, ErrorResponse};
use mirrorflow_protocol::paths::Layout;
use std::fmt;

/// An error with helpful context and suggestions
#[derive(Debug)]
pub struct HelpfulError {
    pub message: String,
    pub context: Option<String>,
    pub suggestions: Vec<String>,
    /// Stable code reported in JSON output
    pub code: ErrorCode,
}

impl HelpfulError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            context: None,
            suggestions: Vec::new(),
            code: ErrorCode::Internal,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }

    pub fn with_suggestions(
        mut self,
        suggestions: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.suggestions
            .extend(suggestions.into_iter().map(|s| s.into()));
        self
    }

    pub fn with_code(mut self, code: ErrorCode) -> Self {
        self.code = code;
        self
    }

    // === Common error constructors ===

    /// Start rejected because the mirroring configuration does not exist
    pub fn config_not_found(config_ref: &str, layout: &Layout) -> Self {
        Self::new(format!("Mirroring configuration not found: {}", config_ref))
            .with_code(ErrorCode::NotFound)
            .with_context(format!(
                "Configurations are read from {}",
                layout.configs_dir().display()
            ))
            .with_suggestions([
                format!("TRY: ls {}", layout.configs_dir().display()),
                format!(
                    "TRY: Save the ImageSetConfiguration as {}/{}.yaml",
                    layout.configs_dir().display(),
                    config_ref
                ),
            ])
    }

    /// The operation id does not match a record
    pub fn operation_not_found(id: &str) -> Self {
        Self::new(format!("Operation not found: {}", id))
            .with_code(ErrorCode::NotFound)
            .with_suggestion("TRY: mirrorflow op list   # Show known operations")
    }

    /// Every operation slot is taken
    pub fn capacity_exceeded(max: usize) -> Self {
        Self::new(format!("Too many running operations (limit {})", max))
            .with_code(ErrorCode::CapacityExceeded)
            .with_suggestions([
                "TRY: mirrorflow op list --status running".to_string(),
                "TRY: Raise [operations].max_concurrent in config.toml".to_string(),
            ])
    }

    /// The mirroring tool finished unsuccessfully
    pub fn operation_failed(id: &str, message: Option<&str>) -> Self {
        Self::new(format!("Operation {} failed", id))
            .with_code(ErrorCode::ExternalToolFailure)
            .with_context(message.unwrap_or("no error output captured").to_string())
            .with_suggestion(format!("TRY: mirrorflow op logs {}", id))
    }

    /// Some catalog fetch jobs failed
    pub fn fetch_failed(failed: usize, total: usize) -> Self {
        Self::new(format!("{} of {} catalog fetch job(s) failed", failed, total))
            .with_code(ErrorCode::FetchJobError)
            .with_suggestions([
                "TRY: mirrorflow catalog fetch --force   # Retry every job".to_string(),
                "TRY: Check registry credentials ([catalog].authfile)".to_string(),
            ])
    }
}

impl fmt::Display for HelpfulError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ERROR: {}", self.message)?;

        if let Some(ctx) = &self.context {
            writeln!(f, "CONTEXT: {}", ctx)?;
        }

        if !self.suggestions.is_empty() {
            writeln!(f)?;
            for suggestion in &self.suggestions {
                writeln!(f, "  {}", suggestion)?;
            }
        }

        Ok(())
    }
}

impl std::error::Error for HelpfulError {}

impl From<OpsError> for HelpfulError {
    fn from(err: OpsError) -> Self {
        let code = err.error_code();
        let helpful = match &err {
            OpsError::NotFound { kind: "Operation", name } => Self::operation_not_found(name),
            OpsError::CapacityExceeded { max } => Self::capacity_exceeded(*max),
            OpsError::NotRunning(id) => Self::new(err.to_string())
                .with_suggestion(format!("TRY: mirrorflow op logs {}   # Full log", id)),
            _ => Self::new(err.to_string()),
        };
        helpful.with_code(code)
    }
}

/// Render a command failure as the wire error payload.
pub fn error_response(err: &anyhow::Error) -> ErrorResponse {
    if let Some(helpful) = err.downcast_ref::<HelpfulError>() {
        let mut response = ErrorResponse::new(helpful.message.clone(), helpful.code);
        if let Some(ctx) = &helpful.context {
            response = response.with_details(serde_json::json!({ "context": ctx }));
        }
        return response;
    }
    if let Some(ops) = err.downcast_ref::<OpsError>() {
        return ops.to_response();
    }
    if let Some(catalog) = err.downcast_ref::<CatalogError>() {
        return catalog.to_response();
    }
    ErrorResponse::new(format!("{:#}", err), ErrorCode::Internal)
}

pub fn print_json_error(err: &anyhow::Error) {
    match serde_json::to_string_pretty(&error_response(err)) {
        Ok(json) => println!("{}", json),
        Err(_) => eprintln!("{:?}", err),
    }
}
