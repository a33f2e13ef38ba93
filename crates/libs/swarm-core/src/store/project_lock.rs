//! Per-project advisory file lock.
//!
//! Every mutating operation on a project holds this lock for the span of
//! policy check -> archive writes -> commit -> index upsert; that span is
//! what keeps the archive, the index and the git history mutually
//! consistent. The lock is a named file under the project's archive root so
//! it also serializes across processes; owner metadata enables stale-lock
//! cleanup after a crash.

use crate::error::{Error, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Lock owner metadata for stale detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockOwner {
    pub pid: u32,
    pub timestamp: DateTime<Utc>,
    pub agent: Option<String>,
    pub hostname: String,
}

impl LockOwner {
    fn current(agent: Option<String>) -> Self {
        Self {
            pid: std::process::id(),
            timestamp: Utc::now(),
            agent,
            hostname: hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "unknown".into()),
        }
    }

    /// A lock is stale when its owner process is gone or the lock outlived
    /// any plausible critical section.
    fn is_stale(&self, max_age: Duration) -> bool {
        if Utc::now() - self.timestamp > max_age {
            return true;
        }
        !is_process_alive(self.pid)
    }
}

#[cfg(target_os = "linux")]
fn is_process_alive(pid: u32) -> bool {
    Path::new(&format!("/proc/{}", pid)).exists()
}

#[cfg(all(unix, not(target_os = "linux")))]
fn is_process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(true)
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    true
}

/// Advisory file lock scoped to one project archive.
#[derive(Debug)]
pub struct ProjectLock {
    slug: String,
    lock_path: PathBuf,
    owner_path: PathBuf,
    // In-process serialization; the lock file handles other processes.
    inner: Mutex<()>,
}

impl ProjectLock {
    pub fn new(slug: &str, project_root: &Path) -> Self {
        Self {
            slug: slug.to_string(),
            lock_path: project_root.join(".engine.lock"),
            owner_path: project_root.join(".engine.lock.owner"),
            inner: Mutex::new(()),
        }
    }

    /// Acquire the lock, cleaning stale holders, within `timeout`.
    ///
    /// The deadline is checked before anything is mutated; expiry surfaces
    /// as [`Error::Timeout`] with the live holder's PID.
    pub async fn acquire(
        self: &Arc<Self>,
        agent: Option<String>,
        timeout: std::time::Duration,
    ) -> Result<LockGuard> {
        let deadline = std::time::Instant::now() + timeout;
        let max_age = Duration::minutes(10);

        loop {
            let _inner = self.inner.lock().await;

            if self.lock_path.exists() {
                if let Some(owner) = self.read_owner().await {
                    if owner.is_stale(max_age) {
                        info!(
                            slug = %self.slug,
                            pid = owner.pid,
                            since = %owner.timestamp,
                            "Cleaning up stale project lock"
                        );
                        self.force_cleanup().await;
                    } else {
                        if std::time::Instant::now() > deadline {
                            return Err(Error::Timeout {
                                slug: self.slug.clone(),
                                owner_pid: owner.pid,
                            });
                        }
                        drop(_inner);
                        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                        continue;
                    }
                } else {
                    warn!(slug = %self.slug, "Lock file without owner metadata, forcing cleanup");
                    self.force_cleanup().await;
                }
            }

            if let Some(parent) = self.lock_path.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::write(&self.lock_path, "").await?;

            let owner = LockOwner::current(agent);
            let owner_json = serde_json::to_string_pretty(&owner)?;
            fs::write(&self.owner_path, owner_json).await?;

            debug!(slug = %self.slug, pid = owner.pid, "Project lock acquired");

            return Ok(LockGuard { lock: Arc::clone(self) });
        }
    }

    async fn read_owner(&self) -> Option<LockOwner> {
        let content = fs::read_to_string(&self.owner_path).await.ok()?;
        serde_json::from_str(&content).ok()
    }

    async fn force_cleanup(&self) {
        let _ = fs::remove_file(&self.lock_path).await;
        let _ = fs::remove_file(&self.owner_path).await;
    }
}

/// RAII guard; dropping releases the lock files.
#[derive(Debug)]
pub struct LockGuard {
    lock: Arc<ProjectLock>,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let lock_path = self.lock.lock_path.clone();
        let owner_path = self.lock.owner_path.clone();
        // Cannot await in drop; removal is spawned.
        tokio::spawn(async move {
            let _ = fs::remove_file(&lock_path).await;
            let _ = fs::remove_file(&owner_path).await;
        });
    }
}
