//! Project identity and archive bootstrap.
//!
//! A project is created on first use (`ensure` is idempotent) and never
//! destroyed by the engine. Its slug is a pure function of the human key,
//! so the same key resolves to the same archive directory forever.

use crate::Engine;
use crate::Result;
use crate::naming;
use crate::store::git_store;
use crate::types::{ProjectId, fmt_ts, now_ts, parse_ts};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub slug: String,
    pub human_key: String,
    pub created_ts: NaiveDateTime,
    pub meta: serde_json::Value,
}

pub struct ProjectBmc;

impl ProjectBmc {
    /// Idempotently create or fetch the project for `human_key`.
    ///
    /// First use initializes the archive repository and commits a
    /// `project.json` marker so a lost index can recover the human key.
    pub async fn ensure(engine: &Engine, human_key: &str) -> Result<Project> {
        let human_key = human_key.trim();
        if human_key.is_empty() {
            return Err(crate::Error::InvalidArgument("human_key must not be empty".into()));
        }

        if let Ok(existing) = Self::get_by_human_key(engine, human_key).await {
            return Ok(existing);
        }

        let slug = naming::slug(human_key);
        let _guard = engine.lock_project(&slug, None).await?;

        // Re-check under the lock; a concurrent ensure may have won.
        if let Ok(existing) = Self::get_by_human_key(engine, human_key).await {
            return Ok(existing);
        }

        let created_ts = now_ts();

        // Archive first: repository, .gitattributes, project marker.
        let repo = git_store::init_or_open_repo(engine.project_repo_path(&slug))?;
        if git_store::read_file_content(&repo, ".gitattributes").is_err() {
            git_store::write_workdir_file(
                &repo,
                Path::new(".gitattributes"),
                "*.json text\n*.md text\n",
            )?;
        }
        let marker = serde_json::json!({
            "slug": slug,
            "human_key": human_key,
            "created": fmt_ts(created_ts),
        });
        git_store::write_workdir_file(
            &repo,
            Path::new("project.json"),
            &serde_json::to_string_pretty(&marker)?,
        )?;
        git_store::commit_paths(
            &repo,
            &[Path::new(".gitattributes"), Path::new("project.json")],
            &format!("project: create {}", slug),
        )?;

        let db = engine.db();
        let stmt = db
            .prepare(
                "INSERT INTO projects (slug, human_key, created_ts, meta) VALUES (?, ?, ?, '{}') RETURNING id",
            )
            .await?;
        let mut rows = stmt
            .query((slug.as_str(), human_key, fmt_ts(created_ts)))
            .await?;
        let id = if let Some(row) = rows.next().await? {
            row.get::<i64>(0)?
        } else {
            return Err(crate::Error::IndexArchiveMismatch(format!(
                "project {} committed but index insert returned no id",
                slug
            )));
        };

        Ok(Project {
            id: ProjectId(id),
            slug,
            human_key: human_key.to_string(),
            created_ts,
            meta: serde_json::json!({}),
        })
    }

    /// Resolve a project by slug or human key, whichever matches.
    pub async fn resolve(engine: &Engine, key: &str) -> Result<Project> {
        if let Ok(project) = Self::get_by_slug(engine, key).await {
            return Ok(project);
        }
        Self::get_by_human_key(engine, key).await
    }

    pub async fn get_by_slug(engine: &Engine, slug: &str) -> Result<Project> {
        let db = engine.db();
        let stmt = db
            .prepare("SELECT id, slug, human_key, created_ts, meta FROM projects WHERE slug = ?")
            .await?;
        let mut rows = stmt.query([slug]).await?;

        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(crate::Error::ProjectNotFound(slug.to_string()))
        }
    }

    pub async fn get_by_human_key(engine: &Engine, human_key: &str) -> Result<Project> {
        let db = engine.db();
        let stmt = db
            .prepare("SELECT id, slug, human_key, created_ts, meta FROM projects WHERE human_key = ?")
            .await?;
        let mut rows = stmt.query([human_key]).await?;

        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(crate::Error::ProjectNotFound(human_key.to_string()))
        }
    }

    pub async fn get(engine: &Engine, id: ProjectId) -> Result<Project> {
        let db = engine.db();
        let stmt = db
            .prepare("SELECT id, slug, human_key, created_ts, meta FROM projects WHERE id = ?")
            .await?;
        let mut rows = stmt.query([id.get()]).await?;

        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(crate::Error::ProjectNotFound(format!("id {}", id)))
        }
    }

    pub async fn list_all(engine: &Engine) -> Result<Vec<Project>> {
        let db = engine.db();
        let stmt = db
            .prepare("SELECT id, slug, human_key, created_ts, meta FROM projects ORDER BY created_ts DESC")
            .await?;
        let mut rows = stmt.query(()).await?;

        let mut projects = Vec::new();
        while let Some(row) = rows.next().await? {
            projects.push(Self::from_row(row)?);
        }
        Ok(projects)
    }

    fn from_row(row: libsql::Row) -> Result<Project> {
        let created_ts_str: String = row.get(3)?;
        let meta_str: String = row.get(4)?;
        Ok(Project {
            id: ProjectId(row.get(0)?),
            slug: row.get(1)?,
            human_key: row.get(2)?,
            created_ts: parse_ts(&created_ts_str),
            meta: serde_json::from_str(&meta_str).unwrap_or_else(|_| serde_json::json!({})),
        })
    }
}
