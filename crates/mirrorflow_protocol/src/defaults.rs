//! Canonical default values shared across the supervisor, orchestrator and CLI.

/// Operations allowed to run at the same time.
pub const DEFAULT_MAX_CONCURRENT_OPERATIONS: usize = 2;
/// Mirroring tool executable.
pub const DEFAULT_MIRROR_BINARY: &str = "oc-mirror";
/// Grace period between SIGTERM and SIGKILL when stopping an operation.
pub const DEFAULT_STOP_GRACE_SECS: u64 = 5;

/// Fetch jobs executing at the same time.
pub const DEFAULT_FETCH_CONCURRENCY: usize = 3;
/// Age after which previously fetched catalog data is re-fetched.
pub const DEFAULT_FRESHNESS_HOURS: u64 = 24;
/// Largest accepted freshness window (ten years).
pub const MAX_FRESHNESS_HOURS: u64 = 10 * 365 * 24;
/// Pull attempts per fetch job (first try included).
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
/// Fixed delay between pull attempts.
pub const DEFAULT_RETRY_DELAY_SECS: u64 = 2;
/// Container CLI used to pull and unpack catalog images.
pub const DEFAULT_CONTAINER_BINARY: &str = "podman";
/// Response cache time-to-live.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3600;
/// Platform versions fetched when config does not list any.
pub const DEFAULT_PLATFORM_VERSIONS: &[&str] = &["4.15", "4.16", "4.17", "4.18", "4.19"];

/// Poll interval for live log streams.
pub const DEFAULT_LOG_POLL_INTERVAL_MS: u64 = 1_000;

/// Channel returned when neither fetched nor static data knows an operator.
pub const FALLBACK_CHANNEL: &str = "stable";

/// Message stored on operations stopped by the user.
pub const STOPPED_BY_USER_MESSAGE: &str = "Stopped by user";
/// Message stored on operations found running after a restart.
pub const INTERRUPTED_MESSAGE: &str = "interrupted: supervisor restarted while operation was running";
