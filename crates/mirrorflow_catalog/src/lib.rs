//! Operator catalog pipeline for Mirrorflow.
//!
//! Two halves share the on-disk [`CatalogStore`]:
//!
//! - **fetch**: [`FetchOrchestrator`] fans the source × version matrix out to
//!   [`FetchJobRunner`]s (pull, extract, [`parser`]) on a bounded pool and
//!   writes the master index.
//! - **lookup**: [`CatalogCache`] loads that index lazily and answers operator
//!   and channel queries, falling back to compiled-in data.

pub mod cache;
pub mod clock;
pub mod error;
pub mod fallback;
pub mod orchestrator;
pub mod parser;
pub mod puller;
pub mod retry;
pub mod runner;
pub mod store;
pub mod ttl;

pub use cache::{CatalogCache, CatalogIndex, OperatorQuery};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{CatalogError, Result};
pub use orchestrator::FetchOrchestrator;
pub use parser::{parse_configs_dir, CatalogLayout, ParseError, ParseReport};
pub use puller::{CatalogPuller, ContainerPuller, PullError};
pub use retry::{Backoff, RetryOutcome, RetryPolicy};
pub use runner::FetchJobRunner;
pub use store::{CatalogStore, FetchJobDescriptor, JobOutcome, MasterIndex};

use mirrorflow_protocol::CatalogConfig;
use std::sync::Arc;

/// Wire an orchestrator from configuration.
pub fn orchestrator_from_config<P: CatalogPuller>(
    puller: P,
    store: CatalogStore,
    config: &CatalogConfig,
    clock: Arc<dyn Clock>,
) -> FetchOrchestrator<P> {
    let retry = RetryPolicy::fixed(config.retry_attempts, config.retry_delay());
    let runner = FetchJobRunner::new(Arc::new(puller), store, retry, Arc::clone(&clock))
        .with_authfile(config.authfile.clone())
        .with_delete_artifacts(config.delete_artifacts);
    FetchOrchestrator::new(runner, clock)
        .with_sources(config.sources.clone())
        .with_versions(config.versions.clone())
        .with_concurrency(config.concurrency)
        .with_freshness(config.freshness())
}
