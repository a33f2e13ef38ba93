//! Shared test harness.
//!
//! Every test gets an isolated storage root (archives + index) in a temp
//! directory that lives as long as the context. Nothing is shared between
//! tests, so they are free to run in parallel.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use swarm_common::AppConfig;
use swarm_core::model::agent::{Agent, AgentBmc, AgentForRegister};
use swarm_core::model::project::{Project, ProjectBmc};
use swarm_core::{Engine, Result};
use tempfile::TempDir;

static DB_COUNTER: AtomicU32 = AtomicU32::new(0);

pub struct TestContext {
    pub engine: Engine,
    #[allow(dead_code)]
    temp_dir: TempDir, // keeps the storage root alive for the test
}

impl TestContext {
    pub async fn new() -> Result<Self> {
        Self::new_with_config(AppConfig::default()).await
    }

    /// Contact-policy tests need the auto handshake machinery switched on.
    pub async fn new_with_enforcement() -> Result<Self> {
        let config = AppConfig {
            contact_enforcement_enabled: true,
            ..AppConfig::default()
        };
        Self::new_with_config(config).await
    }

    pub async fn new_with_config(mut config: AppConfig) -> Result<Self> {
        let temp_dir = TempDir::new().expect("create temp dir");
        let counter = DB_COUNTER.fetch_add(1, Ordering::SeqCst);

        let storage_root = temp_dir.path().join(format!("storage_{}", counter));
        std::fs::create_dir_all(storage_root.join("projects"))?;
        config.storage.root = storage_root.clone();

        let db = swarm_core::store::open_index(storage_root.join("store.sqlite3")).await?;
        let engine = Engine::new_for_test(db, storage_root, Arc::new(config));

        Ok(Self { engine, temp_dir })
    }

    /// Convenience: a project with two registered agents, the usual cast.
    pub async fn project_with_agents(&self, human_key: &str) -> Result<(Project, Agent, Agent)> {
        let project = ProjectBmc::ensure(&self.engine, human_key).await?;
        let alpha = self.register(&project, "Alpha").await?;
        let beta = self.register(&project, "Beta").await?;
        Ok((project, alpha, beta))
    }

    pub async fn register(&self, project: &Project, name: &str) -> Result<Agent> {
        AgentBmc::register(
            &self.engine,
            project,
            AgentForRegister {
                program: "claude-code".to_string(),
                model: "claude-sonnet-4-5".to_string(),
                name: Some(name.to_string()),
                task_description: format!("{} works on tests", name),
            },
        )
        .await
    }
}
