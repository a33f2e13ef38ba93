//! The engine facade.
//!
//! [`Engine`] is the single entry point the RPC and CLI layers call. It owns
//! the index connection, the storage root and one advisory lock per project,
//! and it enforces the mutation ordering every controller relies on:
//! acquire project lock -> policy check -> archive write + commit -> index
//! upsert -> respond. Read-only calls take no lock.

use crate::Result;
use crate::model::summary::SummaryProvider;
use crate::store::project_lock::{LockGuard, ProjectLock};
use crate::store::{self, Db};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use swarm_common::AppConfig;
use tokio::sync::Mutex;
use tracing::info;

/// Upper bound on waiting for a project critical section. Callers that
/// cannot enter in time receive `TIMEOUT` with nothing mutated.
const PROJECT_LOCK_TIMEOUT_SECS: u64 = 30;

#[derive(Clone)]
pub struct Engine {
    db: Db,
    storage_root: PathBuf,
    /// One advisory lock per project slug, created on first touch.
    locks: Arc<Mutex<HashMap<String, Arc<ProjectLock>>>>,
    /// Optional external collaborator for thread summaries. The engine is
    /// fully functional without it.
    summary_provider: Option<Arc<dyn SummaryProvider>>,
    pub config: Arc<AppConfig>,
}

impl Engine {
    /// Open the engine over `$STORAGE_ROOT`: create directories, open the
    /// index, then reconcile index against archive before accepting traffic
    /// (crash safety: an orphan archive commit is replayed into the index).
    pub async fn new(config: Arc<AppConfig>) -> Result<Self> {
        let storage_root = config.storage.root.clone();
        std::fs::create_dir_all(config.storage.projects_dir())?;

        let db = store::open_index(config.storage.index_path()).await?;

        let engine = Self {
            db,
            storage_root,
            locks: Arc::new(Mutex::new(HashMap::new())),
            summary_provider: None,
            config,
        };

        let repaired = crate::model::recovery::reconcile_all(&engine).await?;
        if repaired > 0 {
            info!(rows = repaired, "Startup reconcile replayed archive entries into the index");
        }

        Ok(engine)
    }

    /// Constructor for tests: pre-opened index, isolated storage root,
    /// no startup reconcile.
    pub fn new_for_test(db: Db, storage_root: PathBuf, config: Arc<AppConfig>) -> Self {
        Self {
            db,
            storage_root,
            locks: Arc::new(Mutex::new(HashMap::new())),
            summary_provider: None,
            config,
        }
    }

    /// Install an external summary collaborator.
    #[must_use]
    pub fn with_summary_provider(mut self, provider: Arc<dyn SummaryProvider>) -> Self {
        self.summary_provider = Some(provider);
        self
    }

    pub(crate) fn summary_provider(&self) -> Option<&Arc<dyn SummaryProvider>> {
        self.summary_provider.as_ref()
    }

    /// Index connection, for the model layer only.
    pub(crate) fn db(&self) -> &Db {
        &self.db
    }

    /// Index connection for integration tests.
    pub fn db_for_test(&self) -> &Db {
        &self.db
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Root directory of a project's archive (lock files live here).
    pub fn project_root(&self, slug: &str) -> PathBuf {
        self.storage_root.join("projects").join(slug)
    }

    /// Working tree of a project's archive repository.
    pub fn project_repo_path(&self, slug: &str) -> PathBuf {
        self.project_root(slug).join("repo")
    }

    /// Acquire the exclusive advisory lock for one project.
    ///
    /// Mutating controllers hold the returned guard across policy check,
    /// archive commit and index upsert so no two mutations on the same
    /// project interleave at either layer. Different projects proceed
    /// independently.
    pub async fn lock_project(&self, slug: &str, agent: Option<String>) -> Result<LockGuard> {
        let lock = {
            let mut locks = self.locks.lock().await;
            Arc::clone(
                locks
                    .entry(slug.to_string())
                    .or_insert_with(|| Arc::new(ProjectLock::new(slug, &self.project_root(slug)))),
            )
        };
        lock.acquire(agent, std::time::Duration::from_secs(PROJECT_LOCK_TIMEOUT_SECS))
            .await
    }

    /// Verify index connectivity.
    pub async fn health_check(&self) -> Result<bool> {
        let stmt = self.db.prepare("SELECT 1").await?;
        let mut rows = stmt.query(()).await?;
        Ok(rows.next().await?.is_some())
    }
}
