//! Layered lookup behaviour of the catalog cache.

use anyhow::Result;
use chrono::Utc;
use mirrorflow_catalog::{
    CatalogCache, CatalogStore, FetchJobDescriptor, JobOutcome, MasterIndex, OperatorQuery,
};
use mirrorflow_protocol::api::LookupOrigin;
use mirrorflow_protocol::{
    CatalogConfig, CatalogKey, CatalogSourceType, OperatorEntry, PlatformVersion,
};
use std::sync::Arc;

fn seed(store: &CatalogStore, entries: &[(CatalogKey, Vec<OperatorEntry>)]) -> Result<()> {
    let mut jobs = Vec::new();
    for (key, ops) in entries {
        store.save_operators(key, ops)?;
        jobs.push(FetchJobDescriptor {
            source: key.source,
            version: key.version,
            image: key.source.image_ref(&key.version),
            outcome: JobOutcome::Success,
            attempts: 1,
            last_extracted_at: Some(Utc::now()),
            operator_count: Some(ops.len()),
            skipped_entries: 0,
            error: None,
            finished_at: Utc::now(),
        });
    }
    store.save_index(&MasterIndex::from_jobs(Utc::now(), jobs))?;
    Ok(())
}

fn redhat(minor: u32) -> CatalogKey {
    CatalogKey::new(CatalogSourceType::Redhat, PlatformVersion::new(4, minor))
}

#[tokio::test]
async fn test_prefetched_entry_wins_over_fallback() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let store = CatalogStore::new(temp.path());
    let prefetched = vec![OperatorEntry::new("only-this", "candidate", ["candidate"])];
    seed(&store, &[(redhat(16), prefetched.clone())])?;

    let cache = CatalogCache::new(store, &CatalogConfig::default());

    let (ops, origin) = cache
        .lookup_operators(CatalogSourceType::Redhat, PlatformVersion::new(4, 16))
        .await;
    assert_eq!(origin, LookupOrigin::Prefetched);
    assert_eq!(ops, prefetched);

    // Same catalog, other version: static fallback by catalog URL.
    let (ops, origin) = cache
        .lookup_operators(CatalogSourceType::Redhat, PlatformVersion::new(4, 17))
        .await;
    assert_eq!(origin, LookupOrigin::StaticFallback);
    assert!(ops.iter().all(|op| op.name != "only-this"));
    Ok(())
}

#[tokio::test]
async fn test_channel_resolution_chain() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let store = CatalogStore::new(temp.path());
    seed(
        &store,
        &[(
            redhat(16),
            vec![OperatorEntry::new(
                "cert-manager",
                "stable-v1",
                ["stable-v1", "tech-preview"],
            )],
        )],
    )?;
    let cache = CatalogCache::new(store, &CatalogConfig::default());
    let v16 = PlatformVersion::new(4, 16);

    let (channels, origin) = cache
        .lookup_channels("cert-manager", CatalogSourceType::Redhat, v16)
        .await;
    assert_eq!(origin, LookupOrigin::Prefetched);
    assert_eq!(channels, vec!["stable-v1", "tech-preview"]);

    let (channels, origin) = cache
        .lookup_channels("cert-manager", CatalogSourceType::Community, v16)
        .await;
    assert_eq!(origin, LookupOrigin::StaticFallback);
    assert_eq!(channels, vec!["candidate", "stable"]);

    let (channels, origin) = cache
        .lookup_channels("unheard-of", CatalogSourceType::Redhat, v16)
        .await;
    assert_eq!(origin, LookupOrigin::Default);
    assert_eq!(channels, vec!["stable"]);
    Ok(())
}

#[tokio::test]
async fn test_list_catalogs_reports_fetch_metadata() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let store = CatalogStore::new(temp.path());
    seed(
        &store,
        &[(
            redhat(16),
            vec![
                OperatorEntry::new("a", "stable", ["stable"]),
                OperatorEntry::new("b", "stable", ["stable"]),
            ],
        )],
    )?;
    let cache = CatalogCache::new(store, &CatalogConfig::default());

    let catalogs = cache.list_catalogs().await;
    assert_eq!(catalogs.len(), 3);

    let redhat = catalogs
        .iter()
        .find(|c| c.source == CatalogSourceType::Redhat)
        .unwrap();
    assert_eq!(redhat.url, "registry.redhat.io/redhat/redhat-operator-index");
    assert_eq!(redhat.versions.len(), 5);
    let v16 = redhat
        .versions
        .iter()
        .find(|v| v.version == PlatformVersion::new(4, 16))
        .unwrap();
    assert!(v16.prefetched);
    assert_eq!(v16.operator_count, Some(2));
    assert!(v16.extracted_at.is_some());
    assert!(redhat.versions.iter().filter(|v| v.prefetched).count() == 1);

    // Memoised: the same allocation comes back.
    let again = cache.list_catalogs().await;
    assert!(Arc::ptr_eq(&catalogs, &again));
    Ok(())
}

#[tokio::test]
async fn test_concurrent_first_lookups_share_one_load() -> Result<()> {
    let temp = tempfile::tempdir()?;
    let store = CatalogStore::new(temp.path());
    seed(&store, &[(redhat(15), vec![OperatorEntry::new("x", "stable", ["stable"])])])?;
    let cache = Arc::new(CatalogCache::new(store, &CatalogConfig::default()));

    let mut handles = Vec::new();
    for _ in 0..8 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move { cache.index().await }));
    }
    let mut indexes = Vec::new();
    for handle in handles {
        indexes.push(handle.await?);
    }
    assert!(indexes.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));

    let listed = cache
        .list_operators(OperatorQuery {
            source: Some(CatalogSourceType::Redhat),
            version: None,
        })
        .await;
    let v15 = listed
        .iter()
        .find(|c| c.version == PlatformVersion::new(4, 15))
        .unwrap();
    assert_eq!(v15.origin, LookupOrigin::Prefetched);
    Ok(())
}
