//! Agent registration and profiles.
//!
//! An agent is an addressable participant in one project. Registration is
//! idempotent on `(project, name)`: re-registering refreshes the mutable
//! fields (program, model, task, last_active) and never duplicates a row.
//! Agents are never deleted; they only age out of "active" listings.

use crate::Engine;
use crate::Result;
use crate::naming;
use crate::store::git_store;
use crate::types::{AgentId, ContactPolicy, ProjectId, fmt_ts, now_ts, parse_ts};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::project::Project;

/// Agents with no activity in this window are excluded from active views.
const ACTIVE_WINDOW_DAYS: i64 = 7;

/// Reserved sender identity for the human overseer; bypasses policy.
pub const OVERSEER_NAME: &str = "Overseer";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub project_id: ProjectId,
    pub name: String,
    pub program: String,
    pub model: String,
    pub task_description: String,
    pub contact_policy: ContactPolicy,
    pub inception_ts: NaiveDateTime,
    pub last_active_ts: NaiveDateTime,
}

/// Input for registration. `name` is optional; a memorable one is generated
/// when absent (the hint, if given, is sanitized and used when free).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AgentForRegister {
    pub program: String,
    pub model: String,
    pub name: Option<String>,
    pub task_description: String,
}

pub struct AgentBmc;

impl AgentBmc {
    /// Register (or refresh) an agent in `project`.
    pub async fn register(
        engine: &Engine,
        project: &Project,
        reg: AgentForRegister,
    ) -> Result<Agent> {
        let _guard = engine.lock_project(&project.slug, reg.name.clone()).await?;

        let name = match &reg.name {
            Some(raw) => {
                let name = raw.trim();
                if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    return Err(crate::Error::InvalidArgument(format!(
                        "agent name must be alphanumeric/underscore, got '{}'",
                        raw
                    )));
                }
                name.to_string()
            }
            None => {
                let taken = Self::all_names_lower(engine, project.id).await?;
                naming::generate_agent_name(|candidate| taken.contains(&candidate.to_lowercase()))
            }
        };

        let now = now_ts();

        // Idempotent path: same (project, name) updates mutable fields only.
        // Archive first, index second, like every other mutation.
        if let Ok(existing) = Self::find_by_name(engine, project.id, &name).await {
            let updated = Agent {
                program: reg.program,
                model: reg.model,
                task_description: reg.task_description,
                last_active_ts: now,
                ..existing
            };
            Self::commit_profile(engine, project, &updated, false)?;

            let db = engine.db();
            let stmt = db
                .prepare(
                    "UPDATE agents SET program = ?, model = ?, task_description = ?, last_active_ts = ? WHERE id = ?",
                )
                .await?;
            stmt.execute((
                updated.program.as_str(),
                updated.model.as_str(),
                updated.task_description.as_str(),
                fmt_ts(now),
                updated.id.get(),
            ))
            .await?;
            return Ok(updated);
        }

        let mut agent = Agent {
            id: AgentId(0),
            project_id: project.id,
            name,
            program: reg.program,
            model: reg.model,
            task_description: reg.task_description,
            contact_policy: ContactPolicy::Auto,
            inception_ts: now,
            last_active_ts: now,
        };
        Self::commit_profile(engine, project, &agent, true)?;

        let db = engine.db();
        let stmt = db
            .prepare(
                r#"
            INSERT INTO agents (project_id, name, program, model, task_description, contact_policy, inception_ts, last_active_ts)
            VALUES (?, ?, ?, ?, ?, 'auto', ?, ?)
            RETURNING id
            "#,
            )
            .await?;
        let mut rows = stmt
            .query((
                project.id.get(),
                agent.name.as_str(),
                agent.program.as_str(),
                agent.model.as_str(),
                agent.task_description.as_str(),
                fmt_ts(now),
                fmt_ts(now),
            ))
            .await?;

        let id = if let Some(row) = rows.next().await? {
            row.get::<i64>(0)?
        } else {
            return Err(crate::Error::IndexArchiveMismatch(format!(
                "agent {} committed but index insert returned no id",
                agent.name
            )));
        };
        agent.id = AgentId(id);

        Ok(agent)
    }

    /// Pick a free generated name, honoring an optional hint. Used by the
    /// register flow when the caller supplies `name_hint` instead of `name`.
    pub async fn pick_name(
        engine: &Engine,
        project_id: ProjectId,
        hint: Option<&str>,
    ) -> Result<String> {
        let taken = Self::all_names_lower(engine, project_id).await?;
        if let Some(hint) = hint.and_then(naming::sanitize_name_hint) {
            if !taken.contains(&hint.to_lowercase()) {
                return Ok(hint);
            }
        }
        Ok(naming::generate_agent_name(|candidate| {
            taken.contains(&candidate.to_lowercase())
        }))
    }

    async fn all_names_lower(
        engine: &Engine,
        project_id: ProjectId,
    ) -> Result<std::collections::HashSet<String>> {
        let db = engine.db();
        let stmt = db.prepare("SELECT name FROM agents WHERE project_id = ?").await?;
        let mut rows = stmt.query([project_id.get()]).await?;
        let mut names = std::collections::HashSet::new();
        while let Some(row) = rows.next().await? {
            let name: String = row.get(0)?;
            names.insert(name.to_lowercase());
        }
        Ok(names)
    }

    fn commit_profile(engine: &Engine, project: &Project, agent: &Agent, created: bool) -> Result<()> {
        let repo = git_store::init_or_open_repo(engine.project_repo_path(&project.slug))?;
        let rel = PathBuf::from("agents").join(&agent.name).join("profile.json");
        let profile = serde_json::json!({
            "name": agent.name,
            "program": agent.program,
            "model": agent.model,
            "task_description": agent.task_description,
            "contact_policy": agent.contact_policy.as_str(),
            "inception": fmt_ts(agent.inception_ts),
            "last_active": fmt_ts(agent.last_active_ts),
        });
        let verb = if created { "create" } else { "update" };
        git_store::commit_file(
            &repo,
            &rel,
            &serde_json::to_string_pretty(&profile)?,
            &format!("agent: {} {}", verb, agent.name),
        )?;
        Ok(())
    }

    /// Case-insensitive lookup by name within a project.
    pub async fn find_by_name(engine: &Engine, project_id: ProjectId, name: &str) -> Result<Agent> {
        let db = engine.db();
        let stmt = db
            .prepare(
                r#"
            SELECT id, project_id, name, program, model, task_description, contact_policy, inception_ts, last_active_ts
            FROM agents WHERE project_id = ? AND name = ? COLLATE NOCASE
            "#,
            )
            .await?;
        let mut rows = stmt.query((project_id.get(), name)).await?;

        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(crate::Error::AgentNotRegistered(name.to_string()))
        }
    }

    /// Like [`Self::find_by_name`] but the error names the closest
    /// registered agents, which saves a round trip on typos.
    pub async fn get_by_name(engine: &Engine, project_id: ProjectId, name: &str) -> Result<Agent> {
        match Self::find_by_name(engine, project_id, name).await {
            Ok(agent) => Ok(agent),
            Err(_) => {
                let db = engine.db();
                let stmt = db.prepare("SELECT name FROM agents WHERE project_id = ?").await?;
                let mut rows = stmt.query([project_id.get()]).await?;
                let mut all_names: Vec<String> = Vec::new();
                while let Some(row) = rows.next().await? {
                    all_names.push(row.get(0)?);
                }

                let mut scored: Vec<(usize, &String)> = all_names
                    .iter()
                    .map(|candidate| (strsim::levenshtein(name, candidate), candidate))
                    .filter(|(distance, _)| *distance <= 3)
                    .collect();
                scored.sort();

                let suggestions: Vec<&str> =
                    scored.iter().take(3).map(|(_, n)| n.as_str()).collect();
                let detail = if suggestions.is_empty() {
                    name.to_string()
                } else {
                    format!("{} (did you mean: {}?)", name, suggestions.join(", "))
                };
                Err(crate::Error::AgentNotRegistered(detail))
            }
        }
    }

    pub async fn get(engine: &Engine, id: AgentId) -> Result<Agent> {
        let db = engine.db();
        let stmt = db
            .prepare(
                r#"
            SELECT id, project_id, name, program, model, task_description, contact_policy, inception_ts, last_active_ts
            FROM agents WHERE id = ?
            "#,
            )
            .await?;
        let mut rows = stmt.query([id.get()]).await?;

        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(crate::Error::AgentNotRegistered(format!("id {}", id)))
        }
    }

    /// List agents; with `active_only` restricts to the 7-day activity window.
    pub async fn list(engine: &Engine, project_id: ProjectId, active_only: bool) -> Result<Vec<Agent>> {
        let db = engine.db();
        let stmt = db
            .prepare(
                r#"
            SELECT id, project_id, name, program, model, task_description, contact_policy, inception_ts, last_active_ts
            FROM agents WHERE project_id = ? ORDER BY name ASC
            "#,
            )
            .await?;
        let mut rows = stmt.query([project_id.get()]).await?;

        let cutoff = now_ts() - chrono::Duration::days(ACTIVE_WINDOW_DAYS);
        let mut agents = Vec::new();
        while let Some(row) = rows.next().await? {
            let agent = Self::from_row(row)?;
            if active_only && agent.last_active_ts < cutoff {
                continue;
            }
            agents.push(agent);
        }
        Ok(agents)
    }

    pub async fn set_contact_policy(
        engine: &Engine,
        project: &Project,
        name: &str,
        policy: ContactPolicy,
    ) -> Result<Agent> {
        let _guard = engine.lock_project(&project.slug, Some(name.to_string())).await?;

        let agent = Self::get_by_name(engine, project.id, name).await?;
        let now = now_ts();
        let updated = Agent { contact_policy: policy, last_active_ts: now, ..agent };
        Self::commit_profile(engine, project, &updated, false)?;

        let db = engine.db();
        let stmt = db
            .prepare("UPDATE agents SET contact_policy = ?, last_active_ts = ? WHERE id = ?")
            .await?;
        stmt.execute((policy.as_str(), fmt_ts(now), updated.id.get())).await?;
        Ok(updated)
    }

    /// Refresh `last_active_ts`; called on every operation the agent drives.
    pub async fn touch(engine: &Engine, agent_id: AgentId) -> Result<()> {
        let db = engine.db();
        let stmt = db.prepare("UPDATE agents SET last_active_ts = ? WHERE id = ?").await?;
        stmt.execute((fmt_ts(now_ts()), agent_id.get())).await?;
        Ok(())
    }

    fn from_row(row: libsql::Row) -> Result<Agent> {
        let policy_str: String = row.get(6)?;
        let inception_ts_str: String = row.get(7)?;
        let last_active_ts_str: String = row.get(8)?;

        Ok(Agent {
            id: AgentId(row.get(0)?),
            project_id: ProjectId(row.get(1)?),
            name: row.get(2)?,
            program: row.get(3)?,
            model: row.get(4)?,
            task_description: row.get(5)?,
            contact_policy: ContactPolicy::parse(&policy_str).unwrap_or_default(),
            inception_ts: parse_ts(&inception_ts_str),
            last_active_ts: parse_ts(&last_active_ts_str),
        })
    }
}
