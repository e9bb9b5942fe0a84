//! Catalog Store - durable output of the fetch pipeline
//!
//! # Storage Format
//!
//! ```text
//! ~/.mirrorflow/catalog/
//! ├── index.json                  master summary of the last run
//! └── {source}/{version}/
//!     ├── job.json                FetchJobDescriptor
//!     ├── operators.json          parsed OperatorEntry list
//!     └── configs/                extracted catalog configs
//! ```

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use mirrorflow_protocol::{CatalogKey, CatalogSourceType, OperatorEntry, PlatformVersion};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

const INDEX_FILE: &str = "index.json";
const JOB_FILE: &str = "job.json";
const OPERATORS_FILE: &str = "operators.json";
const CONFIGS_DIR: &str = "configs";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    Skipped,
    Success,
    Failed,
}

/// Record of one (source, version) fetch job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchJobDescriptor {
    pub source: CatalogSourceType,
    pub version: PlatformVersion,
    pub image: String,
    pub outcome: JobOutcome,
    pub attempts: u32,
    /// Last successful extraction; carried over by skipped and failed jobs
    pub last_extracted_at: Option<DateTime<Utc>>,
    pub operator_count: Option<usize>,
    #[serde(default)]
    pub skipped_entries: usize,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

impl FetchJobDescriptor {
    pub fn key(&self) -> CatalogKey {
        CatalogKey::new(self.source, self.version)
    }
}

/// Master summary written after every orchestrator run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MasterIndex {
    pub generated_at: DateTime<Utc>,
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub skipped: usize,
    pub jobs: Vec<FetchJobDescriptor>,
}

impl MasterIndex {
    /// Counts are derived from `jobs`, so they always add up to `total`.
    pub fn from_jobs(generated_at: DateTime<Utc>, mut jobs: Vec<FetchJobDescriptor>) -> Self {
        jobs.sort_by_key(|j| j.key());
        let count = |outcome| jobs.iter().filter(|j| j.outcome == outcome).count();
        Self {
            generated_at,
            total: jobs.len(),
            success: count(JobOutcome::Success),
            failed: count(JobOutcome::Failed),
            skipped: count(JobOutcome::Skipped),
            jobs,
        }
    }

    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    pub fn job(&self, key: &CatalogKey) -> Option<&FetchJobDescriptor> {
        self.jobs.iter().find(|j| j.key() == *key)
    }
}

/// Filesystem store rooted at the catalog directory.
#[derive(Debug, Clone)]
pub struct CatalogStore {
    root: PathBuf,
}

impl CatalogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn index_path(&self) -> PathBuf {
        self.root.join(INDEX_FILE)
    }

    pub fn job_dir(&self, key: &CatalogKey) -> PathBuf {
        self.root
            .join(key.source.as_str())
            .join(key.version.to_string())
    }

    pub fn configs_dir(&self, key: &CatalogKey) -> PathBuf {
        self.job_dir(key).join(CONFIGS_DIR)
    }

    pub fn operators_path(&self, key: &CatalogKey) -> PathBuf {
        self.job_dir(key).join(OPERATORS_FILE)
    }

    fn descriptor_path(&self, key: &CatalogKey) -> PathBuf {
        self.job_dir(key).join(JOB_FILE)
    }

    pub fn load_descriptor(&self, key: &CatalogKey) -> Result<Option<FetchJobDescriptor>> {
        read_json(&self.descriptor_path(key))
    }

    /// Every key with a `job.json` on disk, whichever run wrote it.
    pub fn stored_keys(&self) -> Vec<CatalogKey> {
        let mut keys = Vec::new();
        for source in CatalogSourceType::ALL {
            let Ok(versions) = fs::read_dir(self.root.join(source.as_str())) else {
                continue;
            };
            for entry in versions.filter_map(|e| e.ok()) {
                let name = entry.file_name();
                let Ok(version) = name.to_string_lossy().parse::<PlatformVersion>() else {
                    continue;
                };
                let key = CatalogKey::new(source, version);
                if self.descriptor_path(&key).is_file() {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        keys
    }

    pub fn save_descriptor(&self, job: &FetchJobDescriptor) -> Result<()> {
        let path = self.descriptor_path(&job.key());
        write_json(&path, job)?;
        debug!("Saved fetch job {} to {}", job.key(), path.display());
        Ok(())
    }

    pub fn has_operators(&self, key: &CatalogKey) -> bool {
        self.operators_path(key).is_file()
    }

    pub fn load_operators(&self, key: &CatalogKey) -> Result<Option<Vec<OperatorEntry>>> {
        read_json(&self.operators_path(key))
    }

    pub fn save_operators(&self, key: &CatalogKey, operators: &[OperatorEntry]) -> Result<()> {
        write_json(&self.operators_path(key), &operators)
    }

    pub fn load_index(&self) -> Result<Option<MasterIndex>> {
        read_json(&self.index_path())
    }

    pub fn save_index(&self, index: &MasterIndex) -> Result<()> {
        write_json(&self.index_path(), index)?;
        debug!(
            "Saved catalog index ({} jobs) to {}",
            index.total,
            self.index_path().display()
        );
        Ok(())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let json = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let value = serde_json::from_str(&json)
        .with_context(|| format!("Failed to parse {}", path.display()))?;
    Ok(Some(value))
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    atomic_write(path, json.as_bytes())
        .with_context(|| format!("Failed to write {}", path.display()))
}

/// Atomic write via temp file + rename
pub(crate) fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)
        .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    let temp_path = parent.join(format!(".tmp_{}", uuid::Uuid::new_v4()));
    fs::write(&temp_path, content)
        .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;
    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename temp file to {}", path.display()))?;
    Ok(())
}
