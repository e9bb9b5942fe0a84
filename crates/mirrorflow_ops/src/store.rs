//! Operation Store - one JSON record per operation
//!
//! # Storage Format
//!
//! ```text
//! ~/.mirrorflow/operations/
//! ├── {operation_id_1}.json
//! ├── {operation_id_2}.json
//! └── ...
//! ```

use crate::operation::Operation;
use anyhow::{Context, Result};
use mirrorflow_protocol::OperationId;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct OperationStore {
    dir: PathBuf,
}

impl OperationStore {
    pub fn new(dir: PathBuf) -> Result<Self> {
        fs::create_dir_all(&dir).with_context(|| {
            format!("Failed to create operation store directory: {}", dir.display())
        })?;
        Ok(Self { dir })
    }

    fn record_path(&self, id: &OperationId) -> PathBuf {
        self.dir.join(format!("{}.json", id))
    }

    pub fn save(&self, op: &Operation) -> Result<()> {
        let path = self.record_path(&op.id);
        let json = serde_json::to_string_pretty(op)?;
        atomic_write(&path, json.as_bytes())
            .with_context(|| format!("Failed to write operation file: {}", path.display()))?;
        debug!("Saved operation {} ({})", op.id, op.status);
        Ok(())
    }

    pub fn load(&self, id: &OperationId) -> Result<Option<Operation>> {
        let path = self.record_path(id);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read operation file: {}", path.display()))?;
        let op = serde_json::from_str(&json)
            .with_context(|| format!("Failed to parse operation file: {}", path.display()))?;
        Ok(Some(op))
    }

    /// Every readable record. Unparseable files are logged and skipped.
    pub fn load_all(&self) -> Result<Vec<Operation>> {
        let mut ops = Vec::new();
        let entries = fs::read_dir(&self.dir).with_context(|| {
            format!("Failed to read operation store directory: {}", self.dir.display())
        })?;

        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::read_to_string(&path)
                .map_err(anyhow::Error::from)
                .and_then(|json| serde_json::from_str::<Operation>(&json).map_err(Into::into));
            match parsed {
                Ok(op) => ops.push(op),
                Err(e) => warn!("Skipping unreadable operation file {}: {}", path.display(), e),
            }
        }

        debug!("Loaded {} operations from {}", ops.len(), self.dir.display());
        Ok(ops)
    }

    /// Returns false when there was nothing to delete.
    pub fn delete(&self, id: &OperationId) -> Result<bool> {
        let path = self.record_path(id);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Deleted operation {}", id);
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to delete operation file: {}", path.display())),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

/// Atomic write via temp file + rename
fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let temp_path = parent.join(format!(".tmp_{}", uuid::Uuid::new_v4()));
    fs::write(&temp_path, content)
        .with_context(|| format!("Failed to write temp file: {}", temp_path.display()))?;
    fs::rename(&temp_path, path)
        .with_context(|| format!("Failed to rename temp file to {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample(store: &OperationStore) -> Operation {
        let id = OperationId::new();
        Operation::new(
            id.clone(),
            "weekly",
            "ocp-4.16",
            store.dir().join(format!("{}.log", id)),
            store.dir().join("dest"),
        )
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let store = OperationStore::new(temp.path().to_path_buf()).unwrap();
        let op = sample(&store);

        store.save(&op).unwrap();
        assert_eq!(store.load(&op.id).unwrap(), Some(op));
    }

    #[test]
    fn test_load_all_skips_garbage() {
        let temp = TempDir::new().unwrap();
        let store = OperationStore::new(temp.path().to_path_buf()).unwrap();
        store.save(&sample(&store)).unwrap();
        store.save(&sample(&store)).unwrap();
        fs::write(temp.path().join("broken.json"), "{").unwrap();
        fs::write(temp.path().join("notes.txt"), "ignored").unwrap();

        assert_eq!(store.load_all().unwrap().len(), 2);
    }

    #[test]
    fn test_delete_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let store = OperationStore::new(temp.path().to_path_buf()).unwrap();
        let op = sample(&store);
        store.save(&op).unwrap();

        assert!(store.delete(&op.id).unwrap());
        assert!(!store.delete(&op.id).unwrap());
        assert!(store.load(&op.id).unwrap().is_none());
    }
}
