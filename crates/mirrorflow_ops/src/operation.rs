//! Operation records
//!
//! One record per run of the mirroring tool. A record is created `Running` and
//! moves to exactly one terminal status, after which it is never rewritten by
//! an automatic determination.

use chrono::{DateTime, Utc};
use mirrorflow_protocol::{OperationId, OperationStatus};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub id: OperationId,
    pub name: String,
    /// Mirroring configuration, referenced by name
    pub config_ref: String,
    pub status: OperationStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    /// `completed_at - started_at`, set together with `completed_at`
    #[serde(default)]
    pub duration_seconds: Option<f64>,
    #[serde(default)]
    pub error_message: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    /// Process (and process group) id of the tool while it runs
    #[serde(default)]
    pub pid: Option<u32>,
    pub log_path: PathBuf,
    /// Mirror output directory
    pub destination: PathBuf,
}

impl Operation {
    pub fn new(
        id: OperationId,
        name: impl Into<String>,
        config_ref: impl Into<String>,
        log_path: PathBuf,
        destination: PathBuf,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            config_ref: config_ref.into(),
            status: OperationStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            duration_seconds: None,
            error_message: None,
            exit_code: None,
            pid: None,
            log_path,
            destination,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == OperationStatus::Running
    }

    /// Move to a terminal status, deriving the duration.
    pub fn finish(
        &mut self,
        status: OperationStatus,
        at: DateTime<Utc>,
        error_message: Option<String>,
        exit_code: Option<i32>,
    ) {
        debug_assert!(status.is_terminal());
        let at = at.max(self.started_at);
        self.status = status;
        self.completed_at = Some(at);
        self.duration_seconds = Some(duration_between(self.started_at, at));
        self.error_message = error_message;
        self.exit_code = exit_code;
    }

    /// Duration so far for running operations, final duration otherwise.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> f64 {
        self.duration_seconds
            .unwrap_or_else(|| duration_between(self.started_at, now.max(self.started_at)))
    }
}

pub fn duration_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / 1000.0
}

/// Size facts about a mirror destination, measured on disk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DestinationStats {
    pub exists: bool,
    pub file_count: u64,
    pub total_bytes: u64,
}

/// Manifest-level statistics (images, layers, ...).
///
/// Nothing reads the tool's output formats yet, so this is always
/// `Unavailable` rather than made-up numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ManifestSummary {
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationDetails {
    pub operation: Operation,
    pub elapsed_seconds: f64,
    pub log_size_bytes: u64,
    pub destination: DestinationStats,
    pub manifest: ManifestSummary,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op() -> Operation {
        Operation::new(
            OperationId::new(),
            "nightly",
            "ocp-4.16",
            PathBuf::from("/tmp/x.log"),
            PathBuf::from("/tmp/x"),
        )
    }

    #[test]
    fn test_finish_derives_duration() {
        let mut op = op();
        let done = op.started_at + chrono::Duration::milliseconds(2_500);
        op.finish(OperationStatus::Success, done, None, Some(0));

        assert_eq!(op.completed_at, Some(done));
        assert_eq!(op.duration_seconds, Some(2.5));
        assert!(!op.is_running());
    }

    #[test]
    fn test_completion_never_precedes_start() {
        let mut op = op();
        let before = op.started_at - chrono::Duration::seconds(5);
        op.finish(OperationStatus::Stopped, before, None, None);
        assert_eq!(op.duration_seconds, Some(0.0));
    }

    #[test]
    fn test_record_json_shape() {
        let json = serde_json::to_value(op()).unwrap();
        assert_eq!(json["status"], "running");
        assert!(json["completed_at"].is_null());
        let summary = ManifestSummary::Unavailable {
            reason: "not parsed".into(),
        };
        assert_eq!(
            serde_json::to_value(summary).unwrap()["state"],
            "unavailable"
        );
    }
}
