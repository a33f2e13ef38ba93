//! Advisory file-path leases.
//!
//! A claim reserves a literal path or glob for one agent, exclusively or
//! shared, for a bounded TTL. Claims are advisory: the engine never touches
//! the agents' working trees, it only refuses conflicting reservations.
//! Expired rows are swept lazily at the head of every mutating lease call.
//!
//! Mutations follow the archive-first discipline: the per-pattern claim
//! files are rendered from the intended end state and committed before the
//! index rows change.

use crate::Engine;
use crate::Result;
use crate::store::git_store;
use crate::types::{AgentId, ProjectId, fmt_ts, now_ts, parse_ts};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::debug;

use super::agent::AgentBmc;
use super::project::Project;

/// Floor and default for claim TTLs, in seconds.
const MIN_TTL_SECS: i64 = 60;
const DEFAULT_TTL_SECS: i64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub id: i64,
    pub project_id: ProjectId,
    pub agent_id: AgentId,
    pub agent_name: String,
    pub path_pattern: String,
    pub exclusive: bool,
    pub reason: String,
    pub created_ts: NaiveDateTime,
    pub expires_ts: NaiveDateTime,
    pub released_ts: Option<NaiveDateTime>,
}

/// A live holder blocking a requested path.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimHolder {
    pub agent: String,
    pub path_pattern: String,
    pub exclusive: bool,
    pub expires_ts: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct PathConflict {
    pub path: String,
    pub holders: Vec<ClaimHolder>,
}

/// Result of a reserve call: granted paths, per-path conflicts, and the
/// expiry stamped on the granted rows.
#[derive(Debug, Clone, Serialize)]
pub struct ReserveOutcome {
    pub granted: Vec<String>,
    pub conflicts: Vec<PathConflict>,
    pub expires_ts: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct RenewOutcome {
    pub renewed: Vec<String>,
    pub expires_ts: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReleaseOutcome {
    pub released_count: usize,
    pub at: NaiveDateTime,
}

/// Rendered end state of one pattern's claim file: the holders it should
/// list after the mutation (empty means the file is deleted).
struct ClaimFileState {
    pattern: String,
    holders: Vec<serde_json::Value>,
}

pub struct ClaimBmc;

impl ClaimBmc {
    /// Reserve `paths` for `agent_name`.
    ///
    /// Protocol per path: sweep expired rows, load overlapping active
    /// claims, conflict iff an overlapping claim is held by another agent
    /// and either side wants exclusivity; grant the rest. Partial success
    /// is normal and the response carries the holders of every conflict.
    pub async fn reserve(
        engine: &Engine,
        project: &Project,
        agent_name: &str,
        paths: &[String],
        ttl_seconds: Option<i64>,
        exclusive: bool,
        reason: &str,
    ) -> Result<ReserveOutcome> {
        if paths.is_empty() {
            return Err(crate::Error::InvalidArgument("paths must not be empty".into()));
        }
        for path in paths {
            if path.trim().is_empty() {
                return Err(crate::Error::InvalidArgument("empty path in request".into()));
            }
            if path.starts_with('/') {
                return Err(crate::Error::InvalidArgument(format!(
                    "paths must be project-relative, got '{}'",
                    path
                )));
            }
        }

        let _guard = engine
            .lock_project(&project.slug, Some(agent_name.to_string()))
            .await?;
        let agent = AgentBmc::get_by_name(engine, project.id, agent_name).await?;

        let now = now_ts();
        Self::sweep(engine, project.id, now).await?;

        let active = Self::list_active(engine, project.id).await?;
        let expires =
            now + chrono::Duration::seconds(ttl_seconds.unwrap_or(DEFAULT_TTL_SECS).max(MIN_TTL_SECS));

        let mut seen: HashSet<&String> = HashSet::new();
        let mut granted: Vec<String> = Vec::new();
        let mut conflicts: Vec<PathConflict> = Vec::new();
        for path in paths {
            if !seen.insert(path) {
                continue;
            }
            let holders: Vec<ClaimHolder> = active
                .iter()
                .filter(|c| {
                    c.agent_id != agent.id
                        && (exclusive || c.exclusive)
                        && paths_overlap(path, &c.path_pattern)
                })
                .map(|c| ClaimHolder {
                    agent: c.agent_name.clone(),
                    path_pattern: c.path_pattern.clone(),
                    exclusive: c.exclusive,
                    expires_ts: c.expires_ts,
                })
                .collect();
            if holders.is_empty() {
                granted.push(path.clone());
            } else {
                conflicts.push(PathConflict { path: path.clone(), holders });
            }
        }

        if !granted.is_empty() {
            // Archive first: each granted pattern's file carries the existing
            // active holders plus the new grant.
            let files: Vec<ClaimFileState> = granted
                .iter()
                .map(|path| {
                    let mut holders: Vec<serde_json::Value> = active
                        .iter()
                        .filter(|c| &c.path_pattern == path)
                        .map(render_holder)
                        .collect();
                    holders.push(serde_json::json!({
                        "agent": agent.name,
                        "path_pattern": path,
                        "exclusive": exclusive,
                        "reason": reason,
                        "created": fmt_ts(now),
                        "expires": fmt_ts(expires),
                    }));
                    ClaimFileState { pattern: path.clone(), holders }
                })
                .collect();
            let mode = if exclusive { "exclusive" } else { "shared" };
            Self::commit_claim_files(
                engine,
                project,
                &files,
                &format!("claim: {} {} {} path(s)", agent.name, mode, granted.len()),
            )?;

            let db = engine.db();
            for path in &granted {
                let stmt = db
                    .prepare(
                        r#"
                    INSERT INTO claims (project_id, agent_id, path_pattern, exclusive, reason, created_ts, expires_ts)
                    VALUES (?, ?, ?, ?, ?, ?, ?)
                    "#,
                    )
                    .await?;
                stmt.execute((
                    project.id.get(),
                    agent.id.get(),
                    path.as_str(),
                    exclusive,
                    reason,
                    fmt_ts(now),
                    fmt_ts(expires),
                ))
                .await?;
            }
        }

        AgentBmc::touch(engine, agent.id).await?;
        debug!(agent = %agent.name, granted = granted.len(), conflicts = conflicts.len(), "reserve complete");

        Ok(ReserveOutcome { granted, conflicts, expires_ts: expires })
    }

    /// Extend the caller's active claims by `extend_seconds` (all of them
    /// when `paths` is omitted). Never shortens.
    pub async fn renew(
        engine: &Engine,
        project: &Project,
        agent_name: &str,
        extend_seconds: i64,
        paths: Option<&[String]>,
    ) -> Result<RenewOutcome> {
        if extend_seconds <= 0 {
            return Err(crate::Error::InvalidArgument("extend_seconds must be positive".into()));
        }

        let _guard = engine
            .lock_project(&project.slug, Some(agent_name.to_string()))
            .await?;
        let agent = AgentBmc::get_by_name(engine, project.id, agent_name).await?;

        let now = now_ts();
        Self::sweep(engine, project.id, now).await?;

        let active = Self::list_active(engine, project.id).await?;
        let mine: Vec<&Claim> = active
            .iter()
            .filter(|c| c.agent_id == agent.id)
            .filter(|c| match paths {
                Some(paths) => paths.iter().any(|p| p == &c.path_pattern),
                None => true,
            })
            .collect();

        let renewed_ids: HashSet<i64> = mine.iter().map(|c| c.id).collect();
        let extension = chrono::Duration::seconds(extend_seconds);

        let mut renewed = Vec::new();
        let mut latest: Option<NaiveDateTime> = None;
        if !mine.is_empty() {
            let files = Self::render_patterns(
                &active,
                mine.iter().map(|c| c.path_pattern.clone()),
                |c| {
                    let expires =
                        if renewed_ids.contains(&c.id) { c.expires_ts + extension } else { c.expires_ts };
                    Some(expires)
                },
            );
            Self::commit_claim_files(
                engine,
                project,
                &files,
                &format!("claim: renew {} {} path(s)", agent.name, mine.len()),
            )?;

            let db = engine.db();
            for claim in &mine {
                let new_expires = claim.expires_ts + extension;
                let stmt = db
                    .prepare("UPDATE claims SET expires_ts = ? WHERE id = ? AND released_ts IS NULL")
                    .await?;
                stmt.execute((fmt_ts(new_expires), claim.id)).await?;
                renewed.push(claim.path_pattern.clone());
                latest = Some(latest.map_or(new_expires, |l| l.max(new_expires)));
            }
        }

        AgentBmc::touch(engine, agent.id).await?;
        Ok(RenewOutcome { renewed, expires_ts: latest })
    }

    /// Release the caller's matching active claims (all when `paths` is
    /// omitted); the claim files are rewritten or deleted accordingly.
    pub async fn release(
        engine: &Engine,
        project: &Project,
        agent_name: &str,
        paths: Option<&[String]>,
    ) -> Result<ReleaseOutcome> {
        let _guard = engine
            .lock_project(&project.slug, Some(agent_name.to_string()))
            .await?;
        let agent = AgentBmc::get_by_name(engine, project.id, agent_name).await?;

        let now = now_ts();
        Self::sweep(engine, project.id, now).await?;

        let active = Self::list_active(engine, project.id).await?;
        let mine: Vec<&Claim> = active
            .iter()
            .filter(|c| c.agent_id == agent.id)
            .filter(|c| match paths {
                Some(paths) => paths.iter().any(|p| p == &c.path_pattern),
                None => true,
            })
            .collect();

        if !mine.is_empty() {
            let released_ids: HashSet<i64> = mine.iter().map(|c| c.id).collect();
            let files = Self::render_patterns(
                &active,
                mine.iter().map(|c| c.path_pattern.clone()),
                |c| {
                    if released_ids.contains(&c.id) { None } else { Some(c.expires_ts) }
                },
            );
            Self::commit_claim_files(
                engine,
                project,
                &files,
                &format!("claim: release {} {} path(s)", agent.name, mine.len()),
            )?;

            let db = engine.db();
            for claim in &mine {
                let stmt = db
                    .prepare("UPDATE claims SET released_ts = ? WHERE id = ? AND released_ts IS NULL")
                    .await?;
                stmt.execute((fmt_ts(now), claim.id)).await?;
            }
        }

        AgentBmc::touch(engine, agent.id).await?;
        Ok(ReleaseOutcome { released_count: mine.len(), at: now })
    }

    /// Mark expired-but-unreleased rows as released at `now`.
    pub async fn sweep(engine: &Engine, project_id: ProjectId, now: NaiveDateTime) -> Result<u64> {
        let db = engine.db();
        let stmt = db
            .prepare(
                "UPDATE claims SET released_ts = ? WHERE project_id = ? AND released_ts IS NULL AND expires_ts < ?",
            )
            .await?;
        let swept = stmt
            .execute((fmt_ts(now), project_id.get(), fmt_ts(now)))
            .await?;
        if swept > 0 {
            debug!(project = project_id.get(), swept, "swept expired claims");
        }
        Ok(swept as u64)
    }

    /// Active claims of a project (released rows and past-expiry rows are
    /// filtered in the query; no sweep, so reads stay lock-free).
    pub async fn list_active(engine: &Engine, project_id: ProjectId) -> Result<Vec<Claim>> {
        let db = engine.db();
        let stmt = db
            .prepare(
                r#"
            SELECT c.id, c.project_id, c.agent_id, a.name, c.path_pattern, c.exclusive,
                   c.reason, c.created_ts, c.expires_ts, c.released_ts
            FROM claims c
            JOIN agents a ON a.id = c.agent_id
            WHERE c.project_id = ? AND c.released_ts IS NULL AND c.expires_ts > ?
            ORDER BY c.created_ts DESC
            "#,
            )
            .await?;
        let mut rows = stmt.query((project_id.get(), fmt_ts(now_ts()))).await?;

        let mut claims = Vec::new();
        while let Some(row) = rows.next().await? {
            claims.push(Self::from_row(row)?);
        }
        Ok(claims)
    }

    /// Every claim of a project, including released and expired ones.
    pub async fn list_all(engine: &Engine, project_id: ProjectId) -> Result<Vec<Claim>> {
        let db = engine.db();
        let stmt = db
            .prepare(
                r#"
            SELECT c.id, c.project_id, c.agent_id, a.name, c.path_pattern, c.exclusive,
                   c.reason, c.created_ts, c.expires_ts, c.released_ts
            FROM claims c
            JOIN agents a ON a.id = c.agent_id
            WHERE c.project_id = ?
            ORDER BY c.created_ts DESC
            "#,
            )
            .await?;
        let mut rows = stmt.query([project_id.get()]).await?;

        let mut claims = Vec::new();
        while let Some(row) = rows.next().await? {
            claims.push(Self::from_row(row)?);
        }
        Ok(claims)
    }

    pub async fn list_active_for_agent(
        engine: &Engine,
        project_id: ProjectId,
        agent_id: AgentId,
    ) -> Result<Vec<Claim>> {
        Ok(Self::list_active(engine, project_id)
            .await?
            .into_iter()
            .filter(|c| c.agent_id == agent_id)
            .collect())
    }

    /// Render the end-state files for a set of touched patterns.
    /// `expiry_of` decides, per active claim, whether it remains a holder
    /// (`Some(expiry)`) or disappears (`None`).
    fn render_patterns<I, F>(active: &[Claim], patterns: I, expiry_of: F) -> Vec<ClaimFileState>
    where
        I: IntoIterator<Item = String>,
        F: Fn(&Claim) -> Option<NaiveDateTime>,
    {
        let mut seen = HashSet::new();
        let mut files = Vec::new();
        for pattern in patterns {
            if !seen.insert(pattern.clone()) {
                continue;
            }
            let holders: Vec<serde_json::Value> = active
                .iter()
                .filter(|c| c.path_pattern == pattern)
                .filter_map(|c| {
                    expiry_of(c).map(|expires| {
                        serde_json::json!({
                            "agent": c.agent_name,
                            "path_pattern": c.path_pattern,
                            "exclusive": c.exclusive,
                            "reason": c.reason,
                            "created": fmt_ts(c.created_ts),
                            "expires": fmt_ts(expires),
                        })
                    })
                })
                .collect();
            files.push(ClaimFileState { pattern, holders });
        }
        files
    }

    /// Write every rendered claim file (or delete it when empty) and land a
    /// single commit.
    fn commit_claim_files(
        engine: &Engine,
        project: &Project,
        files: &[ClaimFileState],
        commit_message: &str,
    ) -> Result<()> {
        let repo = git_store::init_or_open_repo(engine.project_repo_path(&project.slug))?;

        let mut rel_paths = Vec::new();
        for file in files {
            let rel = claim_file_path(&file.pattern);
            if file.holders.is_empty() {
                git_store::remove_workdir_file(&repo, &rel)?;
            } else {
                git_store::write_workdir_file(
                    &repo,
                    &rel,
                    &serde_json::to_string_pretty(&file.holders)?,
                )?;
            }
            rel_paths.push(rel);
        }

        git_store::commit_paths(&repo, &rel_paths, commit_message)?;
        Ok(())
    }

    fn from_row(row: libsql::Row) -> Result<Claim> {
        let created_ts: String = row.get(7)?;
        let expires_ts: String = row.get(8)?;
        let released_ts: Option<String> = row.get(9)?;
        Ok(Claim {
            id: row.get(0)?,
            project_id: ProjectId(row.get(1)?),
            agent_id: AgentId(row.get(2)?),
            agent_name: row.get(3)?,
            path_pattern: row.get(4)?,
            exclusive: row.get(5)?,
            reason: row.get(6)?,
            created_ts: parse_ts(&created_ts),
            expires_ts: parse_ts(&expires_ts),
            released_ts: released_ts.as_deref().map(parse_ts),
        })
    }
}

fn render_holder(claim: &Claim) -> serde_json::Value {
    serde_json::json!({
        "agent": claim.agent_name,
        "path_pattern": claim.path_pattern,
        "exclusive": claim.exclusive,
        "reason": claim.reason,
        "created": fmt_ts(claim.created_ts),
        "expires": fmt_ts(claim.expires_ts),
    })
}

/// Archive location of a pattern's claim record: `claims/<sha1(pattern)>.json`.
pub(crate) fn claim_file_path(pattern: &str) -> PathBuf {
    let mut hasher = Sha1::new();
    hasher.update(pattern.as_bytes());
    PathBuf::from("claims").join(format!("{}.json", hex::encode(hasher.finalize())))
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

/// Literal prefix of a pattern: everything before the first wildcard.
fn literal_prefix(pattern: &str) -> &str {
    match pattern.find(['*', '?', '[']) {
        Some(idx) => &pattern[..idx],
        None => pattern,
    }
}

/// Overlap predicate for two claim paths.
///
/// Literal vs literal: equality. Glob vs literal: glob match. Glob vs glob
/// is approximated: the patterns overlap iff the literal prefix of one is a
/// prefix of the other's (an empty prefix, e.g. `**`, overlaps everything).
pub fn paths_overlap(a: &str, b: &str) -> bool {
    if a == b {
        return true;
    }
    match (is_glob(a), is_glob(b)) {
        (false, false) => false,
        (true, false) => glob_matches(a, b),
        (false, true) => glob_matches(b, a),
        (true, true) => {
            let pa = literal_prefix(a);
            let pb = literal_prefix(b);
            pa.starts_with(pb) || pb.starts_with(pa)
        }
    }
}

fn glob_matches(pattern: &str, literal: &str) -> bool {
    glob::Pattern::new(pattern).map(|p| p.matches(literal)).unwrap_or(false)
}
