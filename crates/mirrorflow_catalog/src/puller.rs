//! Pull/extract backends for remote catalog images.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Path of the declarative config directory inside a catalog image.
pub const IMAGE_CONFIGS_PATH: &str = "/configs";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PullError {
    /// Worth another attempt (network hiccup, registry 5xx, ...).
    #[error("{0}")]
    Transient(String),
    /// Retrying cannot help (missing binary, bad credentials, unknown tag).
    #[error("{0}")]
    Permanent(String),
}

impl PullError {
    pub fn is_transient(&self) -> bool {
        matches!(self, PullError::Transient(_))
    }

    /// Classify a failed container CLI invocation by its stderr.
    pub fn from_stderr(action: &str, stderr: &str) -> Self {
        let lower = stderr.to_lowercase();
        let message = format!("{} failed: {}", action, stderr.trim());
        if lower.contains("unauthorized")
            || lower.contains("authentication required")
            || lower.contains("manifest unknown")
            || lower.contains("name unknown")
            || lower.contains("invalid reference format")
        {
            PullError::Permanent(message)
        } else {
            PullError::Transient(message)
        }
    }
}

/// Backend that fetches a catalog image and copies out its configs.
///
/// Implementations must be cheap to share across concurrently running jobs.
pub trait CatalogPuller: Send + Sync + 'static {
    /// Fetch `image` locally, optionally authenticating with `authfile`.
    fn pull(
        &self,
        image: &str,
        authfile: Option<&Path>,
    ) -> impl Future<Output = Result<(), PullError>> + Send;

    /// Copy the image's embedded configs directory to `dest`.
    fn extract(&self, image: &str, dest: &Path)
        -> impl Future<Output = Result<(), PullError>> + Send;

    /// Drop the local copy of `image`.
    fn remove(&self, image: &str) -> impl Future<Output = Result<(), PullError>> + Send;
}

/// `podman`-compatible container CLI backend.
#[derive(Debug, Clone)]
pub struct ContainerPuller {
    binary: PathBuf,
}

impl ContainerPuller {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, action: &str, args: &[&str]) -> Result<String, PullError> {
        debug!("{} {}", self.binary.display(), args.join(" "));
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                PullError::Permanent(format!(
                    "failed to run '{}': {}",
                    self.binary.display(),
                    e
                ))
            })?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(PullError::from_stderr(
                action,
                &String::from_utf8_lossy(&output.stderr),
            ))
        }
    }
}

impl CatalogPuller for ContainerPuller {
    async fn pull(&self, image: &str, authfile: Option<&Path>) -> Result<(), PullError> {
        let authfile = authfile.map(|p| p.to_string_lossy().to_string());
        let mut args = vec!["pull", "--quiet"];
        if let Some(path) = authfile.as_deref() {
            args.extend(["--authfile", path]);
        }
        args.push(image);
        self.run("pull", &args).await.map(|_| ())
    }

    async fn extract(&self, image: &str, dest: &Path) -> Result<(), PullError> {
        let container = self.run("create", &["create", image]).await?;
        if container.is_empty() {
            return Err(PullError::Transient(format!(
                "create returned no container id for {}",
                image
            )));
        }

        let source = format!("{}:{}", container, IMAGE_CONFIGS_PATH);
        let dest_arg = dest.to_string_lossy().to_string();
        let copied = self.run("cp", &["cp", &source, &dest_arg]).await;

        // Container is removed whether or not the copy worked.
        if let Err(e) = self.run("rm", &["rm", "--force", &container]).await {
            debug!("Failed to remove container {}: {}", container, e);
        }
        copied.map(|_| ())
    }

    async fn remove(&self, image: &str) -> Result<(), PullError> {
        self.run("rmi", &["rmi", image]).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_stderr() {
        assert!(!PullError::from_stderr("pull", "Error: unauthorized: access denied").is_transient());
        assert!(!PullError::from_stderr("pull", "manifest unknown").is_transient());
        assert!(PullError::from_stderr("pull", "dial tcp: i/o timeout").is_transient());
    }

    #[tokio::test]
    async fn test_missing_binary_is_permanent() {
        let puller = ContainerPuller::new("/nonexistent/mirrorflow-podman");
        let err = puller
            .pull("registry.example.com/index:v4.16", None)
            .await
            .unwrap_err();
        assert!(!err.is_transient());
    }
}
