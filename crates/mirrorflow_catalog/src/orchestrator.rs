//! Catalog Fetch Orchestrator
//!
//! Expands the configured sources × versions into fetch jobs, skips jobs whose
//! previous extraction is still fresh, runs the rest on a bounded pool and
//! writes the master index.

use crate::clock::Clock;
use crate::puller::CatalogPuller;
use crate::runner::FetchJobRunner;
use crate::store::{FetchJobDescriptor, JobOutcome, MasterIndex};
use anyhow::Result;
use mirrorflow_protocol::{CatalogKey, CatalogSourceType, PlatformVersion};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

pub struct FetchOrchestrator<P: CatalogPuller> {
    runner: Arc<FetchJobRunner<P>>,
    clock: Arc<dyn Clock>,
    sources: Vec<CatalogSourceType>,
    versions: Vec<PlatformVersion>,
    concurrency: usize,
    freshness: chrono::Duration,
    force: bool,
}

impl<P: CatalogPuller> FetchOrchestrator<P> {
    pub fn new(runner: FetchJobRunner<P>, clock: Arc<dyn Clock>) -> Self {
        Self {
            runner: Arc::new(runner),
            clock,
            sources: CatalogSourceType::ALL.to_vec(),
            versions: Vec::new(),
            concurrency: mirrorflow_protocol::defaults::DEFAULT_FETCH_CONCURRENCY,
            freshness: chrono::Duration::hours(
                mirrorflow_protocol::defaults::DEFAULT_FRESHNESS_HOURS as i64,
            ),
            force: false,
        }
    }

    pub fn with_sources(mut self, sources: Vec<CatalogSourceType>) -> Self {
        self.sources = sources;
        self
    }

    pub fn with_versions(mut self, versions: Vec<PlatformVersion>) -> Self {
        self.versions = versions;
        self
    }

    /// Jobs running at once; clamped to at least one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_freshness(mut self, freshness: chrono::Duration) -> Self {
        self.freshness = freshness;
        self
    }

    /// Re-fetch every job regardless of freshness.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// The job matrix, deduplicated and in key order.
    pub fn jobs(&self) -> Vec<CatalogKey> {
        let keys: BTreeSet<CatalogKey> = self
            .versions
            .iter()
            .flat_map(|v| self.sources.iter().map(move |s| CatalogKey::new(*s, *v)))
            .collect();
        keys.into_iter().collect()
    }

    fn is_fresh(&self, key: &CatalogKey, previous: &FetchJobDescriptor) -> bool {
        if self.force {
            return false;
        }
        let Some(extracted_at) = previous.last_extracted_at else {
            return false;
        };
        self.clock.now() - extracted_at < self.freshness && self.runner.store().has_operators(key)
    }

    /// Run every job and persist the master index.
    ///
    /// Individual job failures are recorded, never returned; only failing to
    /// write the index is an error.
    pub async fn run(&self) -> Result<MasterIndex> {
        let store = self.runner.store();
        let mut results: Vec<FetchJobDescriptor> = Vec::new();
        let mut queue: VecDeque<(CatalogKey, Option<FetchJobDescriptor>)> = VecDeque::new();

        for key in self.jobs() {
            let previous = match store.load_descriptor(&key) {
                Ok(previous) => previous,
                Err(e) => {
                    warn!("Ignoring unreadable descriptor for {}: {:#}", key, e);
                    None
                }
            };

            match previous {
                Some(previous) if self.is_fresh(&key, &previous) => {
                    debug!("Catalog {} is fresh, skipping", key);
                    results.push(FetchJobDescriptor {
                        outcome: JobOutcome::Skipped,
                        attempts: 0,
                        error: None,
                        finished_at: self.clock.now(),
                        ..previous
                    });
                }
                previous => queue.push_back((key, previous)),
            }
        }

        let planned = queue.len() + results.len();
        info!(
            "Catalog fetch: {} jobs, {} fresh, concurrency {}",
            planned,
            results.len(),
            self.concurrency
        );

        let mut pending: HashMap<CatalogKey, Option<FetchJobDescriptor>> = HashMap::new();
        let mut set: JoinSet<FetchJobDescriptor> = JoinSet::new();

        while let Some((key, previous)) = queue.pop_front() {
            while set.len() >= self.concurrency {
                if let Some(joined) = set.join_next().await {
                    collect(joined, &mut pending, &mut results);
                }
            }

            let runner = Arc::clone(&self.runner);
            let prev = previous.clone();
            pending.insert(key, previous);
            set.spawn(async move { runner.run(key, prev.as_ref()).await });
        }

        while let Some(joined) = set.join_next().await {
            collect(joined, &mut pending, &mut results);
        }

        // A job task that panicked never reported back.
        let now = self.clock.now();
        for (key, previous) in pending {
            error!("Fetch job {} aborted", key);
            results.push(FetchJobDescriptor {
                source: key.source,
                version: key.version,
                image: key.source.image_ref(&key.version),
                outcome: JobOutcome::Failed,
                attempts: 0,
                last_extracted_at: previous.as_ref().and_then(|p| p.last_extracted_at),
                operator_count: previous.as_ref().and_then(|p| p.operator_count),
                skipped_entries: 0,
                error: Some("fetch job aborted unexpectedly".to_string()),
                finished_at: now,
            });
        }

        let index = MasterIndex::from_jobs(self.clock.now(), results);
        debug_assert_eq!(index.total, planned);
        store.save_index(&index)?;

        info!(
            "Catalog fetch finished: {} total, {} success, {} failed, {} skipped",
            index.total, index.success, index.failed, index.skipped
        );
        Ok(index)
    }
}

fn collect(
    joined: Result<FetchJobDescriptor, tokio::task::JoinError>,
    pending: &mut HashMap<CatalogKey, Option<FetchJobDescriptor>>,
    results: &mut Vec<FetchJobDescriptor>,
) {
    match joined {
        Ok(descriptor) => {
            pending.remove(&descriptor.key());
            results.push(descriptor);
        }
        Err(e) => error!("Fetch job task failed: {}", e),
    }
}
