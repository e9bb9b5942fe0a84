use std::path::{Path, PathBuf};
use std::sync::Once;

static CREATE_DIR_WARNED: Once = Once::new();

/// Resolve the Mirrorflow home directory.
///
/// Priority:
/// 1) MIRRORFLOW_HOME
/// 2) the user's home directory
/// 3) ./.mirrorflow
pub fn mirrorflow_home() -> PathBuf {
    if let Ok(override_path) = std::env::var("MIRRORFLOW_HOME") {
        return PathBuf::from(override_path);
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".mirrorflow")
}

fn ensure_home_dir(home: &Path) {
    if let Err(err) = std::fs::create_dir_all(home) {
        CREATE_DIR_WARNED.call_once(|| {
            eprintln!(
                "Warning: failed to create Mirrorflow home directory {}: {}. Set MIRRORFLOW_HOME.",
                home.display(),
                err
            );
        });
    }
}

/// Directory layout rooted at one home directory.
///
/// Tests build this over a temp dir; binaries use [`Layout::from_env`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub home: PathBuf,
}

impl Layout {
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    pub fn from_env() -> Self {
        let home = mirrorflow_home();
        ensure_home_dir(&home);
        Self { home }
    }

    /// `config.toml`
    pub fn config_file(&self) -> PathBuf {
        self.home.join("config.toml")
    }

    /// Mirroring configurations referenced by name: `configs/<name>.yaml`
    pub fn configs_dir(&self) -> PathBuf {
        self.home.join("configs")
    }

    /// One JSON record per operation: `operations/<id>.json`
    pub fn operations_dir(&self) -> PathBuf {
        self.home.join("operations")
    }

    /// Application logs: `logs/`
    pub fn logs_dir(&self) -> PathBuf {
        self.home.join("logs")
    }

    /// Operation output logs: `logs/operations/<id>.log`
    pub fn operation_logs_dir(&self) -> PathBuf {
        self.logs_dir().join("operations")
    }

    /// Mirror destinations: `mirrors/<id>/`
    pub fn mirrors_dir(&self) -> PathBuf {
        self.home.join("mirrors")
    }

    /// Mirroring tool cache shared across operations.
    pub fn mirror_cache_dir(&self) -> PathBuf {
        self.home.join("cache")
    }

    /// Fetched catalog data: `catalog/index.json`, `catalog/<source>/<version>/...`
    pub fn catalog_dir(&self) -> PathBuf {
        self.home.join("catalog")
    }
}

impl Default for Layout {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_rooted_at_home() {
        let layout = Layout::new("/tmp/mf");
        assert_eq!(layout.operations_dir(), PathBuf::from("/tmp/mf/operations"));
        assert_eq!(
            layout.operation_logs_dir(),
            PathBuf::from("/tmp/mf/logs/operations")
        );
        assert_eq!(layout.catalog_dir(), PathBuf::from("/tmp/mf/catalog"));
        assert_eq!(layout.config_file(), PathBuf::from("/tmp/mf/config.toml"));
    }
}
