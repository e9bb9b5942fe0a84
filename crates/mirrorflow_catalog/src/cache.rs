//! Catalog Cache Manager
//!
//! Serves operator and channel lookups from the newest fetched catalog data,
//! degrading to compiled-in tables and finally to a fixed default:
//!
//! 1. pre-fetched entries for the exact `(source, version)` key
//! 2. static fallback keyed by catalog URL (operators) or operator name (channels)
//! 3. empty list / `["stable"]`
//!
//! The fetched index is loaded lazily on first use and kept until
//! [`CatalogCache::refresh`]. Listing responses are memoised with a TTL.

use crate::error::CatalogError;
use crate::fallback::{static_channels, static_operators};
use crate::store::{CatalogStore, FetchJobDescriptor};
use crate::ttl::{TtlCache, TtlCell};
use chrono::{DateTime, Utc};
use mirrorflow_protocol::api::{CatalogOperators, CatalogSummary, CatalogVersionInfo, LookupOrigin};
use mirrorflow_protocol::defaults::FALLBACK_CHANNEL;
use mirrorflow_protocol::{
    CatalogConfig, CatalogKey, CatalogSourceType, ChannelKey, OperatorEntry, PlatformVersion,
};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// Immutable snapshot of fetched catalog data.
#[derive(Debug, Default)]
pub struct CatalogIndex {
    generated_at: Option<DateTime<Utc>>,
    entries: HashMap<CatalogKey, Arc<Vec<OperatorEntry>>>,
    jobs: HashMap<CatalogKey, FetchJobDescriptor>,
}

impl CatalogIndex {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from explicit entries, without job metadata.
    pub fn from_entries(entries: impl IntoIterator<Item = (CatalogKey, Vec<OperatorEntry>)>) -> Self {
        Self {
            generated_at: None,
            entries: entries
                .into_iter()
                .map(|(key, ops)| (key, Arc::new(ops)))
                .collect(),
            jobs: HashMap::new(),
        }
    }

    /// Read `index.json` plus every stored `job.json` and its `operators.json`.
    ///
    /// The master index only lists the jobs of the last run, so catalogs left
    /// out of a narrowed fetch are found through their descriptors. A missing
    /// index with nothing stored is an empty catalog; an unreadable index is a
    /// [`CatalogError::CacheLoad`]. Individual unreadable files are skipped.
    pub fn load(store: &CatalogStore) -> Result<Self, CatalogError> {
        let master = store
            .load_index()
            .map_err(|e| CatalogError::CacheLoad(format!("{:#}", e)))?;

        let mut jobs: HashMap<CatalogKey, FetchJobDescriptor> = HashMap::new();
        for key in store.stored_keys() {
            match store.load_descriptor(&key) {
                Ok(Some(job)) => {
                    jobs.insert(key, job);
                }
                Ok(None) => {}
                Err(e) => warn!("Skipping descriptor for {}: {:#}", key, e),
            }
        }

        let generated_at = match master {
            Some(master) => {
                for job in master.jobs {
                    jobs.entry(job.key()).or_insert(job);
                }
                Some(master.generated_at)
            }
            None => {
                debug!("No catalog index at {}", store.index_path().display());
                None
            }
        };

        let mut index = Self {
            generated_at,
            ..Self::default()
        };
        for (key, job) in jobs {
            match store.load_operators(&key) {
                Ok(Some(ops)) => {
                    index.entries.insert(key, Arc::new(ops));
                }
                Ok(None) => {}
                Err(e) => warn!("Skipping operators for {}: {:#}", key, e),
            }
            index.jobs.insert(key, job);
        }
        Ok(index)
    }

    pub fn generated_at(&self) -> Option<DateTime<Utc>> {
        self.generated_at
    }

    pub fn operators(&self, key: &CatalogKey) -> Option<Arc<Vec<OperatorEntry>>> {
        self.entries.get(key).cloned()
    }

    pub fn channels(&self, key: &ChannelKey) -> Option<Vec<String>> {
        self.entries
            .get(&key.catalog)?
            .iter()
            .find(|op| op.name == key.operator)
            .map(|op| op.channels.clone())
    }

    pub fn job(&self, key: &CatalogKey) -> Option<&FetchJobDescriptor> {
        self.jobs.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &CatalogKey> {
        self.entries.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Filter for [`CatalogCache::list_operators`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct OperatorQuery {
    pub source: Option<CatalogSourceType>,
    pub version: Option<PlatformVersion>,
}

pub struct CatalogCache {
    store: CatalogStore,
    sources: Vec<CatalogSourceType>,
    versions: Vec<PlatformVersion>,
    index: RwLock<Option<Arc<CatalogIndex>>>,
    /// Bumped by [`CatalogCache::refresh`]; a load that straddles it is not kept
    index_generation: AtomicU64,
    load_lock: tokio::sync::Mutex<()>,
    catalogs: TtlCell<Vec<CatalogSummary>>,
    operators: TtlCache<OperatorQuery, Vec<CatalogOperators>>,
}

impl CatalogCache {
    pub fn new(store: CatalogStore, config: &CatalogConfig) -> Self {
        Self {
            store,
            sources: config.sources.clone(),
            versions: config.versions.clone(),
            index: RwLock::new(None),
            index_generation: AtomicU64::new(0),
            load_lock: tokio::sync::Mutex::new(()),
            catalogs: TtlCell::new(config.cache_ttl()),
            operators: TtlCache::new(config.cache_ttl()),
        }
    }

    fn loaded(&self) -> Option<Arc<CatalogIndex>> {
        self.index
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(Arc::clone)
    }

    /// The memoised index, loading it on first use.
    pub async fn index(&self) -> Arc<CatalogIndex> {
        if let Some(index) = self.loaded() {
            return index;
        }

        let _loading = self.load_lock.lock().await;
        if let Some(index) = self.loaded() {
            return index;
        }

        let generation = self.index_generation.load(Ordering::SeqCst);
        let store = self.store.clone();
        let loaded = tokio::task::spawn_blocking(move || CatalogIndex::load(&store))
            .await
            .unwrap_or_else(|e| Err(CatalogError::CacheLoad(format!("loader task failed: {}", e))));

        let index = match loaded {
            Ok(index) => {
                info!("Loaded catalog index with {} catalogs", index.entries.len());
                Arc::new(index)
            }
            Err(e) => {
                warn!("{}; serving fallback catalog data", e);
                Arc::new(CatalogIndex::empty())
            }
        };

        let mut slot = self.index.write().unwrap_or_else(|e| e.into_inner());
        if self.index_generation.load(Ordering::SeqCst) == generation {
            *slot = Some(Arc::clone(&index));
        }
        index
    }

    /// Drop the loaded index and every memoised response.
    pub fn refresh(&self) {
        {
            let mut slot = self.index.write().unwrap_or_else(|e| e.into_inner());
            self.index_generation.fetch_add(1, Ordering::SeqCst);
            *slot = None;
        }
        self.catalogs.invalidate();
        self.operators.clear();
        debug!("Catalog cache invalidated");
    }

    pub async fn lookup_operators(
        &self,
        source: CatalogSourceType,
        version: PlatformVersion,
    ) -> (Vec<OperatorEntry>, LookupOrigin) {
        let key = CatalogKey::new(source, version);
        if let Some(ops) = self.index().await.operators(&key) {
            return (ops.as_ref().clone(), LookupOrigin::Prefetched);
        }
        match static_operators(&source.catalog_url()) {
            Some(ops) => (ops, LookupOrigin::StaticFallback),
            None => (Vec::new(), LookupOrigin::Default),
        }
    }

    pub async fn lookup_channels(
        &self,
        operator: &str,
        source: CatalogSourceType,
        version: PlatformVersion,
    ) -> (Vec<String>, LookupOrigin) {
        let key = ChannelKey::new(operator, CatalogKey::new(source, version));
        if let Some(channels) = self.index().await.channels(&key) {
            return (channels, LookupOrigin::Prefetched);
        }
        match static_channels(operator) {
            Some(channels) => (channels, LookupOrigin::StaticFallback),
            None => (vec![FALLBACK_CHANNEL.to_string()], LookupOrigin::Default),
        }
    }

    /// Every configured source with per-version fetch metadata.
    pub async fn list_catalogs(&self) -> Arc<Vec<CatalogSummary>> {
        self.catalogs.get_or_refresh(|| self.build_catalogs()).await
    }

    async fn build_catalogs(&self) -> Vec<CatalogSummary> {
        let index = self.index().await;
        self.sources
            .iter()
            .map(|source| {
                let versions: BTreeSet<PlatformVersion> = self
                    .versions
                    .iter()
                    .copied()
                    .chain(index.keys().filter(|k| k.source == *source).map(|k| k.version))
                    .collect();

                CatalogSummary {
                    source: *source,
                    display_name: source.display_name().to_string(),
                    description: source.description().to_string(),
                    url: source.catalog_url(),
                    versions: versions
                        .into_iter()
                        .map(|version| {
                            let key = CatalogKey::new(*source, version);
                            let job = index.job(&key);
                            let prefetched = index.operators(&key);
                            CatalogVersionInfo {
                                version,
                                image: source.image_ref(&version),
                                prefetched: prefetched.is_some(),
                                extracted_at: job.and_then(|j| j.last_extracted_at),
                                operator_count: prefetched.map(|ops| ops.len()),
                            }
                        })
                        .collect(),
                }
            })
            .collect()
    }

    /// Operators per catalog, optionally narrowed to one source and/or version.
    pub async fn list_operators(&self, query: OperatorQuery) -> Arc<Vec<CatalogOperators>> {
        self.operators
            .get_or_refresh(&query, || self.build_operators(query.clone()))
            .await
    }

    async fn build_operators(&self, query: OperatorQuery) -> Vec<CatalogOperators> {
        let sources: Vec<CatalogSourceType> = match query.source {
            Some(source) => vec![source],
            None => self.sources.clone(),
        };
        let versions: Vec<PlatformVersion> = match query.version {
            Some(version) => vec![version],
            None => self.versions.clone(),
        };

        let mut result = Vec::new();
        for source in sources {
            for version in &versions {
                let (operators, origin) = self.lookup_operators(source, *version).await;
                result.push(CatalogOperators {
                    source,
                    version: *version,
                    origin,
                    operators,
                });
            }
        }
        result
    }
}
