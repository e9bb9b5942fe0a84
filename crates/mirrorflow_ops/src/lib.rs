//! Supervision of mirroring tool runs.
//!
//! [`Supervisor`] owns the operation lifecycle (start, exit determination, stop,
//! delete, listing) on top of an [`OperationStore`] of JSON records.
//! [`LogTail`] follows an operation's log file incrementally.

pub mod error;
pub mod operation;
pub mod store;
pub mod supervisor;
pub mod tailer;

pub use error::{OpsError, Result};
pub use operation::{DestinationStats, ManifestSummary, Operation, OperationDetails};
pub use store::OperationStore;
pub use supervisor::{first_error_line, Supervisor};
pub use tailer::{LogChunk, LogStream, LogTail};
