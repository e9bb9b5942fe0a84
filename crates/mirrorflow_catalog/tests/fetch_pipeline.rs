//! End-to-end tests of the fetch pipeline against an in-memory puller.

use anyhow::Result;
use chrono::{TimeZone, Utc};
use mirrorflow_catalog::{
    CatalogCache, CatalogPuller, CatalogStore, Clock, FetchJobRunner, FetchOrchestrator,
    FixedClock, JobOutcome, PullError, RetryPolicy,
};
use mirrorflow_protocol::api::LookupOrigin;
use mirrorflow_protocol::{CatalogConfig, CatalogKey, CatalogSourceType, PlatformVersion};
use proptest::prelude::*;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Counts calls and tracks how many pulls run at once.
#[derive(Default)]
struct FakePuller {
    pulls: AtomicUsize,
    extracts: AtomicUsize,
    removes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    pull_delay: Duration,
    /// Images whose pull always fails transiently
    failing: HashSet<String>,
    /// Images whose pull fails transiently this many times, then succeeds
    flaky: Mutex<std::collections::HashMap<String, usize>>,
}

impl FakePuller {
    fn with_delay(delay: Duration) -> Self {
        Self {
            pull_delay: delay,
            ..Self::default()
        }
    }

    fn failing(mut self, images: impl IntoIterator<Item = String>) -> Self {
        self.failing.extend(images);
        self
    }
}

impl CatalogPuller for FakePuller {
    async fn pull(&self, image: &str, _authfile: Option<&Path>) -> Result<(), PullError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.pull_delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.contains(image) {
            return Err(PullError::Transient(format!("{}: connection reset", image)));
        }
        let mut flaky = self.flaky.lock().unwrap();
        if let Some(remaining) = flaky.get_mut(image) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(PullError::Transient("i/o timeout".into()));
            }
        }
        Ok(())
    }

    async fn extract(&self, image: &str, dest: &Path) -> Result<(), PullError> {
        self.extracts.fetch_add(1, Ordering::SeqCst);
        let tag = image.rsplit(':').next().unwrap_or("latest");
        let op_dir = dest.join("demo-operator");
        std::fs::create_dir_all(&op_dir).unwrap();
        std::fs::write(
            op_dir.join("catalog.yaml"),
            format!(
                "schema: olm.package\nname: demo-operator\ndefaultChannel: stable\n---\nschema: olm.channel\npackage: demo-operator\nname: release-{}\n",
                tag
            ),
        )
        .unwrap();
        Ok(())
    }

    async fn remove(&self, _image: &str) -> Result<(), PullError> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn versions(n: u32) -> Vec<PlatformVersion> {
    (0..n).map(|i| PlatformVersion::new(4, 15 + i)).collect()
}

fn orchestrator(
    puller: Arc<FakePuller>,
    root: &Path,
    clock: Arc<dyn Clock>,
    concurrency: usize,
) -> FetchOrchestrator<FakePuller> {
    let runner = FetchJobRunner::new(
        puller,
        CatalogStore::new(root),
        RetryPolicy::fixed(3, Duration::ZERO),
        Arc::clone(&clock),
    );
    FetchOrchestrator::new(runner, clock).with_concurrency(concurrency)
}

#[tokio::test]
async fn test_full_run_writes_index_and_operators() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let puller = Arc::new(FakePuller::default());
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));

    let index = orchestrator(Arc::clone(&puller), temp.path(), clock, 3)
        .with_versions(versions(2))
        .run()
        .await?;

    assert_eq!(index.total, 6);
    assert_eq!(index.success, 6);
    assert!(!index.has_failures());
    assert_eq!(puller.removes.load(Ordering::SeqCst), 6);

    let store = CatalogStore::new(temp.path());
    let key = CatalogKey::new(CatalogSourceType::Certified, PlatformVersion::new(4, 16));
    let ops = store.load_operators(&key)?.expect("operators.json");
    assert_eq!(ops[0].channels, vec!["release-v4.16", "stable"]);
    assert!(store.configs_dir(&key).join("demo-operator/catalog.yaml").is_file());
    assert!(store.load_index()?.is_some());
    Ok(())
}

#[tokio::test]
async fn test_fresh_jobs_make_no_pull_calls() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
    let clock = Arc::new(FixedClock::new(start));

    let first = Arc::new(FakePuller::default());
    orchestrator(Arc::clone(&first), temp.path(), clock.clone(), 3)
        .with_versions(versions(2))
        .run()
        .await?;
    assert_eq!(first.pulls.load(Ordering::SeqCst), 6);

    clock.advance(chrono::Duration::hours(23));
    let second = Arc::new(FakePuller::default());
    let index = orchestrator(Arc::clone(&second), temp.path(), clock.clone(), 3)
        .with_versions(versions(2))
        .run()
        .await?;

    assert_eq!(second.pulls.load(Ordering::SeqCst), 0);
    assert_eq!(second.extracts.load(Ordering::SeqCst), 0);
    assert_eq!(index.skipped, 6);
    assert!(index.jobs.iter().all(|j| j.last_extracted_at == Some(start)));

    // Stale after the threshold.
    clock.advance(chrono::Duration::hours(2));
    let third = Arc::new(FakePuller::default());
    let index = orchestrator(Arc::clone(&third), temp.path(), clock, 3)
        .with_versions(versions(2))
        .run()
        .await?;
    assert_eq!(third.pulls.load(Ordering::SeqCst), 6);
    assert_eq!(index.success, 6);
    Ok(())
}

#[tokio::test]
async fn test_force_ignores_freshness() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));

    let puller = Arc::new(FakePuller::default());
    orchestrator(Arc::clone(&puller), temp.path(), clock.clone(), 2)
        .with_versions(versions(1))
        .run()
        .await?;
    orchestrator(Arc::clone(&puller), temp.path(), clock, 2)
        .with_versions(versions(1))
        .with_force(true)
        .run()
        .await?;
    assert_eq!(puller.pulls.load(Ordering::SeqCst), 6);
    Ok(())
}

#[tokio::test]
async fn test_concurrency_never_exceeds_bound() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let puller = Arc::new(FakePuller::with_delay(Duration::from_millis(40)));
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));

    let index = orchestrator(Arc::clone(&puller), temp.path(), clock, 3)
        .with_versions(versions(4))
        .run()
        .await?;

    assert_eq!(index.total, 12);
    assert_eq!(puller.max_in_flight.load(Ordering::SeqCst), 3);
    Ok(())
}

#[tokio::test]
async fn test_failed_job_is_isolated_and_retried() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let broken = CatalogSourceType::Community.image_ref(&PlatformVersion::new(4, 15));
    let puller = Arc::new(FakePuller::default().failing([broken.clone()]));
    let flaky = CatalogSourceType::Redhat.image_ref(&PlatformVersion::new(4, 15));
    puller.flaky.lock().unwrap().insert(flaky, 2);
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));

    let index = orchestrator(Arc::clone(&puller), temp.path(), clock, 2)
        .with_versions(versions(1))
        .run()
        .await?;

    assert_eq!(index.total, 3);
    assert_eq!(index.failed, 1);
    assert_eq!(index.success, 2);
    assert!(index.has_failures());

    let failed = index
        .jobs
        .iter()
        .find(|j| j.outcome == JobOutcome::Failed)
        .unwrap();
    assert_eq!(failed.image, broken);
    assert_eq!(failed.attempts, 3);
    assert!(failed.error.as_deref().unwrap().contains("connection reset"));

    let recovered = index
        .jobs
        .iter()
        .find(|j| j.source == CatalogSourceType::Redhat)
        .unwrap();
    assert_eq!(recovered.outcome, JobOutcome::Success);
    assert_eq!(recovered.attempts, 3);

    // 3 + 3 + 1 pull calls.
    assert_eq!(puller.pulls.load(Ordering::SeqCst), 7);
    Ok(())
}

#[tokio::test]
async fn test_narrowed_fetch_keeps_other_catalogs_visible() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
    let version = PlatformVersion::new(4, 15);

    orchestrator(Arc::new(FakePuller::default()), temp.path(), clock.clone(), 3)
        .with_versions(vec![version])
        .run()
        .await?;
    let index = orchestrator(Arc::new(FakePuller::default()), temp.path(), clock, 3)
        .with_versions(vec![version])
        .with_sources(vec![CatalogSourceType::Redhat])
        .with_force(true)
        .run()
        .await?;
    assert_eq!(index.total, 1);

    let cache = CatalogCache::new(CatalogStore::new(temp.path()), &CatalogConfig::default());
    for source in CatalogSourceType::ALL {
        let (ops, origin) = cache.lookup_operators(source, version).await;
        assert_eq!(origin, LookupOrigin::Prefetched, "{}", source);
        assert_eq!(ops[0].name, "demo-operator");
    }
    let catalogs = cache.list_catalogs().await;
    assert!(catalogs
        .iter()
        .flat_map(|c| &c.versions)
        .filter(|info| info.version == version)
        .all(|info| info.prefetched && info.extracted_at.is_some()));
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn prop_outcome_counts_add_up(
        version_count in 1u32..4,
        concurrency in 1usize..5,
        failing_mask in proptest::collection::vec(any::<bool>(), 12),
        fresh_first in any::<bool>(),
    ) {
        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .unwrap();
        let temp = tempfile::tempdir().unwrap();
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(Utc::now()));
        let vs = versions(version_count);

        let keys: Vec<CatalogKey> = vs
            .iter()
            .flat_map(|v| CatalogSourceType::ALL.into_iter().map(move |s| CatalogKey::new(s, *v)))
            .collect();
        let failing: Vec<String> = keys
            .iter()
            .zip(&failing_mask)
            .filter(|(_, fail)| **fail)
            .map(|(k, _)| k.source.image_ref(&k.version))
            .collect();

        let index = rt.block_on(async {
            if fresh_first {
                let seed = Arc::new(FakePuller::default());
                orchestrator(seed, temp.path(), clock.clone(), concurrency)
                    .with_versions(vs[..1].to_vec())
                    .run()
                    .await
                    .unwrap();
            }
            let puller = Arc::new(FakePuller::default().failing(failing.clone()));
            orchestrator(puller, temp.path(), clock.clone(), concurrency)
                .with_versions(vs.clone())
                .run()
                .await
                .unwrap()
        });

        prop_assert_eq!(index.total, keys.len());
        prop_assert_eq!(index.success + index.failed + index.skipped, index.total);
        prop_assert_eq!(index.has_failures(), index.failed > 0);
        if fresh_first {
            prop_assert_eq!(index.skipped, CatalogSourceType::ALL.len());
        }
    }
}
