//! Fetch Job Runner - one (source, version) pull → extract → parse.
//!
//! A job never returns an error to its caller: every failure ends up in the
//! [`FetchJobDescriptor`] it produces, so one broken catalog cannot abort the
//! rest of a batch.

use crate::clock::Clock;
use crate::error::CatalogError;
use crate::parser::{parse_configs_dir, ParseReport};
use crate::puller::{CatalogPuller, PullError};
use crate::retry::RetryPolicy;
use crate::store::{CatalogStore, FetchJobDescriptor, JobOutcome};
use mirrorflow_protocol::CatalogKey;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const STAGING_SUFFIX: &str = "configs.partial";

pub struct FetchJobRunner<P: CatalogPuller> {
    puller: Arc<P>,
    store: CatalogStore,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
    authfile: Option<PathBuf>,
    delete_artifacts: bool,
}

impl<P: CatalogPuller> FetchJobRunner<P> {
    pub fn new(
        puller: Arc<P>,
        store: CatalogStore,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            puller,
            store,
            retry,
            clock,
            authfile: None,
            delete_artifacts: true,
        }
    }

    pub fn with_authfile(mut self, authfile: Option<PathBuf>) -> Self {
        self.authfile = authfile;
        self
    }

    pub fn with_delete_artifacts(mut self, delete: bool) -> Self {
        self.delete_artifacts = delete;
        self
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    /// Run one job to completion and persist its descriptor.
    ///
    /// `previous` is the descriptor of the last run, if any; its extraction
    /// timestamp survives a failed refresh.
    pub async fn run(
        &self,
        key: CatalogKey,
        previous: Option<&FetchJobDescriptor>,
    ) -> FetchJobDescriptor {
        let image = key.source.image_ref(&key.version);
        let staging = self.store.job_dir(&key).join(STAGING_SUFFIX);
        info!("Fetching catalog {} ({})", key, image);

        let outcome = self
            .retry
            .run_if(
                &format!("fetch {}", key),
                |_| self.pull_and_extract(&image, &staging),
                PullError::is_transient,
            )
            .await;
        let attempts = outcome.attempts;

        let result = match outcome.result {
            Ok(()) => {
                if self.delete_artifacts {
                    if let Err(e) = self.puller.remove(&image).await {
                        warn!("Failed to remove catalog image {}: {}", image, e);
                    }
                }
                self.publish(&key, &staging).await
            }
            Err(err) => Err(CatalogError::FetchJob {
                key,
                attempts,
                message: err.to_string(),
            }),
        };

        let now = self.clock.now();
        let descriptor = match result {
            Ok(report) => {
                for skipped in report.skipped.iter().cloned() {
                    warn!("Catalog {}: skipping entry: {}", key, CatalogError::from(skipped));
                }
                info!(
                    "Catalog {} extracted: {} operators ({} skipped)",
                    key,
                    report.operators.len(),
                    report.skipped.len()
                );
                FetchJobDescriptor {
                    source: key.source,
                    version: key.version,
                    image,
                    outcome: JobOutcome::Success,
                    attempts,
                    last_extracted_at: Some(now),
                    operator_count: Some(report.operators.len()),
                    skipped_entries: report.skipped.len(),
                    error: None,
                    finished_at: now,
                }
            }
            Err(err) => {
                warn!("{}", err);
                let _ = tokio::fs::remove_dir_all(&staging).await;
                FetchJobDescriptor {
                    source: key.source,
                    version: key.version,
                    image,
                    outcome: JobOutcome::Failed,
                    attempts,
                    last_extracted_at: previous.and_then(|p| p.last_extracted_at),
                    operator_count: previous.and_then(|p| p.operator_count),
                    skipped_entries: 0,
                    error: Some(err.to_string()),
                    finished_at: now,
                }
            }
        };

        if let Err(e) = self.store.save_descriptor(&descriptor) {
            warn!("Failed to persist fetch job {}: {:#}", key, e);
        }
        descriptor
    }

    async fn pull_and_extract(&self, image: &str, staging: &Path) -> Result<(), PullError> {
        self.puller.pull(image, self.authfile.as_deref()).await?;

        if tokio::fs::try_exists(staging).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(staging)
                .await
                .map_err(|e| PullError::Permanent(format!("clearing {}: {}", staging.display(), e)))?;
        }
        if let Some(parent) = staging.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| PullError::Permanent(format!("creating {}: {}", parent.display(), e)))?;
        }

        self.puller.extract(image, staging).await?;

        if !staging.is_dir() {
            return Err(PullError::Permanent(format!(
                "{} has no configs directory",
                image
            )));
        }
        Ok(())
    }

    /// Parse the staged configs, then replace the job's previous output.
    async fn publish(&self, key: &CatalogKey, staging: &Path) -> Result<ParseReport, CatalogError> {
        let staged = staging.to_path_buf();
        let report = tokio::task::spawn_blocking(move || parse_configs_dir(&staged))
            .await
            .map_err(|e| CatalogError::Validation(format!("parser task failed: {}", e)))??;

        let configs = self.store.configs_dir(key);
        if tokio::fs::try_exists(&configs).await.unwrap_or(false) {
            tokio::fs::remove_dir_all(&configs).await?;
        }
        tokio::fs::rename(staging, &configs).await?;

        self.store
            .save_operators(key, &report.operators)
            .map_err(|e| CatalogError::Io(std::io::Error::other(format!("{:#}", e))))?;
        Ok(report)
    }
}
