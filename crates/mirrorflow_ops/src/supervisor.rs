//! Operation Supervisor
//!
//! Runs the external mirroring tool, one child process per operation:
//!
//! - `start` persists a `Running` record, spawns the tool with stdout and stderr
//!   appended to the operation log and returns at once. A watcher task awaits
//!   the exit and hands it to [`Supervisor::on_process_exit`].
//! - The exit code alone is not trusted: the tool can exit 0 after logging
//!   errors, so the captured output is scanned for error markers too.
//! - `stop` wins over any later exit determination. Status changes are
//!   serialised by one transition lock so the two cannot interleave.
//!
//! Concurrency is capped by a semaphore. Starts beyond the cap are rejected,
//! not queued; a permit is held by the watcher until the process exits. Other
//! supervisor processes share the records directory, so `start` also counts
//! their live `Running` records under an exclusive lock on `.start.lock`.

use crate::error::{OpsError, Result};
use crate::operation::{DestinationStats, ManifestSummary, Operation, OperationDetails};
use crate::store::OperationStore;
use crate::tailer::{LogStream, LogTail};
use chrono::Utc;
use fs2::FileExt;
use mirrorflow_protocol::defaults::{INTERRUPTED_MESSAGE, STOPPED_BY_USER_MESSAGE};
use mirrorflow_protocol::paths::Layout;
use mirrorflow_protocol::{OperationId, OperationStatus, OperationsConfig};
use regex::Regex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

const START_LOCK_FILE: &str = ".start.lock";

/// Live child of this process.
struct ActiveOperation {
    pid: Option<u32>,
    status_tx: watch::Sender<OperationStatus>,
}

struct Inner {
    layout: Layout,
    config: OperationsConfig,
    store: OperationStore,
    permits: Arc<Semaphore>,
    /// INVARIANT: held only for map operations, never across await or I/O
    active: Mutex<HashMap<OperationId, ActiveOperation>>,
    /// Serialises every status transition of every record.
    transitions: tokio::sync::Mutex<()>,
}

/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("home", &self.inner.layout.home)
            .field("max_concurrent", &self.inner.config.max_concurrent)
            .finish()
    }
}

impl Supervisor {
    /// Open the supervisor over `layout`, recovering records left running by a
    /// previous process.
    pub fn open(layout: Layout, config: OperationsConfig) -> Result<Self> {
        let store = OperationStore::new(layout.operations_dir())?;
        std::fs::create_dir_all(layout.operation_logs_dir())?;

        let supervisor = Self {
            inner: Arc::new(Inner {
                permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
                layout,
                config,
                store,
                active: Mutex::new(HashMap::new()),
                transitions: tokio::sync::Mutex::new(()),
            }),
        };

        let recovered = supervisor.recover()?;
        if recovered > 0 {
            warn!("Marked {} interrupted operation(s) as failed", recovered);
        }
        Ok(supervisor)
    }

    /// How often live log streams check for new output.
    pub fn poll_interval(&self) -> Duration {
        self.inner.config.log_poll_interval()
    }

    fn active(&self) -> std::sync::MutexGuard<'_, HashMap<OperationId, ActiveOperation>> {
        self.inner
            .active
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    /// Operations with a live child in this process.
    pub fn running_count(&self) -> usize {
        self.active().len()
    }

    /// Records still `Running` whose process is gone cannot finish anymore.
    /// A process that is still alive belongs to another supervisor and is left
    /// alone.
    fn recover(&self) -> Result<usize> {
        let mut recovered = 0;
        for mut op in self.inner.store.load_all()? {
            if op.is_running() && !self.active().contains_key(&op.id) && !process_alive(op.pid) {
                op.finish(
                    OperationStatus::Failed,
                    Utc::now(),
                    Some(INTERRUPTED_MESSAGE.to_string()),
                    None,
                );
                self.inner.store.save(&op)?;
                recovered += 1;
            }
        }
        Ok(recovered)
    }

    fn resolve_config(&self, config_ref: &str) -> Option<PathBuf> {
        let dir = self.inner.layout.configs_dir();
        if config_ref.ends_with(".yaml") || config_ref.ends_with(".yml") {
            let path = dir.join(config_ref);
            return path.is_file().then_some(path);
        }
        ["yaml", "yml"]
            .iter()
            .map(|ext| dir.join(format!("{}.{}", config_ref, ext)))
            .find(|p| p.is_file())
    }

    fn build_command(&self, config_path: &Path, destination: &Path) -> Command {
        let cfg = &self.inner.config;
        let mut cmd = Command::new(&cfg.mirror_binary);
        cmd.arg("--config")
            .arg(config_path)
            .arg("--cache-dir")
            .arg(self.inner.layout.mirror_cache_dir());
        if let Some(authfile) = &cfg.authfile {
            cmd.arg("--authfile").arg(authfile);
        }
        cmd.arg(format!("--dest-tls-verify={}", cfg.tls_verify))
            .arg(format!("--src-tls-verify={}", cfg.tls_verify))
            .args(&cfg.extra_args)
            .arg(format!("file://{}", destination.display()));
        cmd
    }

    /// Launch a new operation. Returns as soon as the tool is running.
    pub async fn start(&self, name: &str, config_ref: &str) -> Result<Operation> {
        validate_token("name", name)?;
        validate_token("config_ref", config_ref)?;

        let config_path = self.resolve_config(config_ref).ok_or_else(|| OpsError::NotFound {
            kind: "Configuration",
            name: config_ref.to_string(),
        })?;

        let max = self.inner.config.max_concurrent.max(1);
        let permit = Arc::clone(&self.inner.permits)
            .try_acquire_owned()
            .map_err(|_| OpsError::CapacityExceeded { max })?;

        // Held until the new record carries its pid.
        let _start_lock = self.lock_starts().await?;
        let running = self.live_running_count()?;
        if running >= max {
            debug!("{} operation(s) already running across supervisors", running);
            return Err(OpsError::CapacityExceeded { max });
        }

        let id = OperationId::new();
        let log_path = self.inner.layout.operation_logs_dir().join(format!("{}.log", id));
        let destination = self.inner.layout.mirrors_dir().join(id.as_str());
        std::fs::create_dir_all(&destination)?;
        std::fs::create_dir_all(self.inner.layout.mirror_cache_dir())?;

        let mut op = Operation::new(
            id.clone(),
            name,
            config_ref,
            log_path.clone(),
            destination.clone(),
        );
        self.inner.store.save(&op)?;

        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let stdout = log_file.try_clone()?;

        let mut cmd = self.build_command(&config_path, &destination);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(Stdio::from(log_file));
        #[cfg(unix)]
        cmd.process_group(0);

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                let message = format!(
                    "failed to spawn '{}': {}",
                    self.inner.config.mirror_binary, e
                );
                error!("Operation {}: {}", id, message);
                append_line(&log_path, &message);
                op.finish(OperationStatus::Failed, Utc::now(), Some(message.clone()), None);
                self.inner.store.save(&op)?;
                return Err(OpsError::ProcessSpawn { id, message });
            }
        };

        let pid = child.id();
        op.pid = pid;
        if let Err(e) = self.inner.store.save(&op) {
            warn!("Failed to record pid of operation {}: {}", id, e);
        }
        let (status_tx, _) = watch::channel(OperationStatus::Running);
        self.active()
            .insert(id.clone(), ActiveOperation { pid, status_tx });

        info!(
            "Started operation {} '{}' (config {}, pid {:?})",
            id, name, config_ref, pid
        );

        let supervisor = self.clone();
        let watched = id.clone();
        tokio::spawn(async move {
            supervisor.watch_child(watched, child, log_path, permit).await;
        });

        Ok(op)
    }

    /// Exclusive lock shared by every supervisor over this home.
    async fn lock_starts(&self) -> Result<File> {
        let path = self.inner.layout.operations_dir().join(START_LOCK_FILE);
        let file = tokio::task::spawn_blocking(move || -> std::io::Result<File> {
            let file = OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .open(&path)?;
            file.lock_exclusive()?;
            Ok(file)
        })
        .await
        .map_err(|e| OpsError::Internal(anyhow::anyhow!("start lock task failed: {}", e)))??;
        Ok(file)
    }

    /// `Running` records with a child here or a live process elsewhere.
    fn live_running_count(&self) -> Result<usize> {
        let ops = self.inner.store.load_all()?;
        let active = self.active();
        Ok(ops
            .iter()
            .filter(|op| op.is_running())
            .filter(|op| active.contains_key(&op.id) || process_alive(op.pid))
            .count())
    }

    async fn watch_child(
        &self,
        id: OperationId,
        mut child: tokio::process::Child,
        log_path: PathBuf,
        _permit: OwnedSemaphorePermit,
    ) {
        let exit_code = match child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                warn!("Failed waiting for operation {}: {}", id, e);
                None
            }
        };

        let captured = match tokio::fs::read(&log_path).await {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(e) => {
                warn!("Failed to read log of operation {}: {}", id, e);
                String::new()
            }
        };

        match self.on_process_exit(&id, exit_code, &captured).await {
            Ok(_) => {}
            Err(OpsError::NotFound { .. }) => {
                debug!("Operation {} was deleted before its process exited", id);
            }
            Err(e) => {
                error!("Failed to record exit of operation {}: {}", id, e);
                self.active().remove(&id);
            }
        }
    }

    /// Decide the terminal status of a finished process.
    ///
    /// A record that is already terminal (stopped) is returned untouched.
    /// Otherwise: `Failed` when the exit code is not 0 or the output carries an
    /// error marker, `Success` else.
    pub async fn on_process_exit(
        &self,
        id: &OperationId,
        exit_code: Option<i32>,
        captured: &str,
    ) -> Result<Operation> {
        let _transition = self.inner.transitions.lock().await;
        let active = self.active().remove(id);

        let mut op = self
            .inner
            .store
            .load(id)?
            .ok_or_else(|| OpsError::operation_not_found(id))?;

        if op.status.is_terminal() {
            debug!(
                "Operation {} exited ({:?}) after reaching {}; keeping it",
                id, exit_code, op.status
            );
            return Ok(op);
        }

        let marker = first_error_line(captured);
        let (status, message) = match (exit_code, marker) {
            (Some(0), None) => (OperationStatus::Success, None),
            (_, Some(line)) => (OperationStatus::Failed, Some(line)),
            (Some(code), None) => (
                OperationStatus::Failed,
                Some(format!("exited with code {}", code)),
            ),
            (None, None) => (
                OperationStatus::Failed,
                Some("terminated by signal".to_string()),
            ),
        };

        op.finish(status, Utc::now(), message, exit_code);
        self.inner.store.save(&op)?;

        if let Some(active) = active {
            let _ = active.status_tx.send(status);
        }

        match status {
            OperationStatus::Success => info!(
                "Operation {} succeeded in {:.1}s",
                id,
                op.duration_seconds.unwrap_or_default()
            ),
            _ => warn!(
                "Operation {} failed: {}",
                id,
                op.error_message.as_deref().unwrap_or("")
            ),
        }
        Ok(op)
    }

    /// Stop an operation. Stopping a finished operation changes nothing.
    pub async fn stop(&self, id: &OperationId) -> Result<Operation> {
        let _transition = self.inner.transitions.lock().await;
        let mut op = self
            .inner
            .store
            .load(id)?
            .ok_or_else(|| OpsError::operation_not_found(id))?;

        if op.status.is_terminal() {
            debug!("Operation {} already {}", id, op.status);
            return Ok(op);
        }

        op.finish(
            OperationStatus::Stopped,
            Utc::now(),
            Some(STOPPED_BY_USER_MESSAGE.to_string()),
            None,
        );
        self.inner.store.save(&op)?;
        info!("Stopped operation {}", id);

        match self.publish_stopped(id) {
            Some(pid) => self.terminate(pid),
            // Started by another supervisor process.
            None => {
                if let Some(pid) = op.pid.filter(|&pid| process_alive(Some(pid))) {
                    debug!("Operation {} runs outside this process (pid {})", id, pid);
                    self.terminate(pid);
                }
            }
        }
        Ok(op)
    }

    /// Tell watchers the operation stopped; returns its pid if it is live here.
    fn publish_stopped(&self, id: &OperationId) -> Option<u32> {
        let active = self.active();
        let entry = active.get(id)?;
        let _ = entry.status_tx.send(OperationStatus::Stopped);
        entry.pid
    }

    #[cfg(unix)]
    fn terminate(&self, pid: u32) {
        let grace = self.inner.config.stop_grace();
        let pgid = pid as libc::pid_t;
        // SAFETY: killpg only sends a signal; the group was created for this child.
        let rc = unsafe { libc::killpg(pgid, libc::SIGTERM) };
        if rc != 0 {
            debug!(
                "SIGTERM to process group {} failed: {}",
                pgid,
                std::io::Error::last_os_error()
            );
            return;
        }
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            // SAFETY: as above; signal 0 only probes for existence.
            let alive = unsafe { libc::killpg(pgid, 0) } == 0;
            if alive {
                warn!("Process group {} ignored SIGTERM; sending SIGKILL", pgid);
                unsafe {
                    libc::killpg(pgid, libc::SIGKILL);
                }
            }
        });
    }

    #[cfg(not(unix))]
    fn terminate(&self, pid: u32) {
        warn!("Cannot signal process {} on this platform; it will run to completion", pid);
    }

    /// Remove an operation's record and log. Running operations are stopped
    /// first. Returns false when there was nothing to delete.
    pub async fn delete(&self, id: &OperationId) -> Result<bool> {
        let Some(op) = self.inner.store.load(id)? else {
            return Ok(false);
        };
        if op.is_running() {
            self.stop(id).await?;
        }

        let _transition = self.inner.transitions.lock().await;
        let removed = self.inner.store.delete(id)?;
        match std::fs::remove_file(&op.log_path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove log {}: {}", op.log_path.display(), e),
        }
        if removed {
            info!("Deleted operation {}", id);
        }
        Ok(removed)
    }

    pub fn get(&self, id: &OperationId) -> Result<Operation> {
        self.inner
            .store
            .load(id)?
            .ok_or_else(|| OpsError::operation_not_found(id))
    }

    /// All operations, newest first.
    pub fn list(&self, status: Option<OperationStatus>) -> Result<Vec<Operation>> {
        let mut ops: Vec<Operation> = self
            .inner
            .store
            .load_all()?
            .into_iter()
            .filter(|op| status.map_or(true, |s| op.status == s))
            .collect();
        ops.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(ops)
    }

    /// Measured facts about an operation: log size and destination contents.
    pub async fn details(&self, id: &OperationId) -> Result<OperationDetails> {
        let op = self.get(id)?;
        let log_size_bytes = match tokio::fs::metadata(&op.log_path).await {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e.into()),
        };

        let dest = op.destination.clone();
        let destination = tokio::task::spawn_blocking(move || destination_stats(&dest))
            .await
            .map_err(|e| OpsError::Internal(anyhow::anyhow!("stats task failed: {}", e)))?;

        Ok(OperationDetails {
            elapsed_seconds: op.elapsed_seconds(Utc::now()),
            log_size_bytes,
            destination,
            manifest: ManifestSummary::Unavailable {
                reason: "mirror manifests are not inspected".to_string(),
            },
            operation: op,
        })
    }

    /// Status updates for one operation. For a finished (or foreign) operation
    /// the receiver holds its current status and never changes.
    pub fn watch_status(&self, id: &OperationId) -> Result<watch::Receiver<OperationStatus>> {
        if let Some(active) = self.active().get(id) {
            return Ok(active.status_tx.subscribe());
        }
        let op = self.get(id)?;
        let (_, rx) = watch::channel(op.status);
        Ok(rx)
    }

    /// Follow the log of a running operation.
    pub fn open_stream(&self, id: &OperationId) -> Result<LogStream> {
        let op = self.get(id)?;
        if !op.is_running() {
            return Err(OpsError::NotRunning(op.id));
        }
        let status = self.watch_status(id)?;
        Ok(LogTail::new(op.log_path, self.poll_interval()).stream(Some(status)))
    }

    /// Entire log of an operation.
    pub async fn fetch_full(&self, id: &OperationId) -> Result<String> {
        let op = self.get(id)?;
        Ok(LogTail::new(op.log_path, self.poll_interval())
            .read_full()
            .await?)
    }
}

#[cfg(unix)]
fn process_alive(pid: Option<u32>) -> bool {
    match pid {
        // SAFETY: signal 0 only checks that the process exists.
        Some(pid) => (unsafe { libc::kill(pid as libc::pid_t, 0) }) == 0,
        None => false,
    }
}

#[cfg(not(unix))]
fn process_alive(_pid: Option<u32>) -> bool {
    false
}

fn validate_token(field: &str, value: &str) -> Result<()> {
    let value = value.trim();
    if value.is_empty() {
        return Err(OpsError::Validation(format!("{} must not be empty", field)));
    }
    if value.contains('/') || value.contains('\\') || value.contains("..") {
        return Err(OpsError::Validation(format!(
            "{} must not contain path separators: {}",
            field, value
        )));
    }
    Ok(())
}

fn error_marker() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(error:|\[error\])").expect("static regex"))
}

/// First output line carrying an error marker.
pub fn first_error_line(captured: &str) -> Option<String> {
    captured
        .lines()
        .find(|line| error_marker().is_match(line))
        .map(|line| line.trim().to_string())
}

fn append_line(path: &Path, line: &str) {
    let written = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .and_then(|mut f| writeln!(f, "{}", line));
    if let Err(e) = written {
        warn!("Failed to append to {}: {}", path.display(), e);
    }
}

fn destination_stats(dir: &Path) -> DestinationStats {
    if !dir.is_dir() {
        return DestinationStats::default();
    }
    let mut stats = DestinationStats {
        exists: true,
        ..DestinationStats::default()
    };
    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if entry.file_type().is_file() {
            stats.file_count += 1;
            stats.total_bytes += entry.metadata().map(|m| m.len()).unwrap_or(0);
        }
    }
    stats
}
