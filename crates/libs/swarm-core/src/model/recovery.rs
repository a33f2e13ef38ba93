//! Index recovery from the archive.
//!
//! The archive is the sole durable truth; the index is a cache. Two repair
//! modes exist:
//!
//! - [`reconcile_all`]: additive — replay any committed archive entry that
//!   has no index row. Runs at engine startup, which is what makes a crash
//!   between archive commit and index upsert safe.
//! - [`rebuild_index`]: destructive — wipe the archive-backed tables and
//!   reconcile from scratch (the `rebuild-index` CLI command).
//!
//! Read/ack timestamps, contact requests and agent links are index-only
//! state with no archive file, so a full rebuild resets them.

use crate::Engine;
use crate::Result;
use crate::store::git_store;
use crate::types::{ProjectId, fmt_ts, parse_ts};
use std::collections::{HashMap, HashSet};
use tracing::{info, warn};

use super::message;

/// Reconcile every project archive into the index. Returns rows inserted.
pub async fn reconcile_all(engine: &Engine) -> Result<u64> {
    let projects_dir = engine.storage_root().join("projects");
    if !projects_dir.exists() {
        return Ok(0);
    }

    let mut inserted = 0;
    for entry in std::fs::read_dir(&projects_dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let slug = entry.file_name().to_string_lossy().to_string();
        if !entry.path().join("repo").join(".git").exists() {
            continue;
        }
        inserted += reconcile_project(engine, &slug).await?;
    }
    Ok(inserted)
}

/// Wipe the archive-backed tables and rebuild them from the archives.
pub async fn rebuild_index(engine: &Engine) -> Result<u64> {
    let db = engine.db();
    for table in [
        "message_recipients",
        "messages",
        "claims",
        "contact_requests",
        "agent_links",
        "agents",
        "projects",
    ] {
        db.execute(&format!("DELETE FROM {}", table), ()).await?;
    }
    info!("index wiped; rebuilding from archive");
    reconcile_all(engine).await
}

async fn insert_recipient(
    db: &crate::store::Db,
    agent_ids: &HashMap<String, i64>,
    message_id: &str,
    agent_key: &str,
    kind: &str,
) -> Result<()> {
    if let Some(&agent_id) = agent_ids.get(agent_key) {
        let stmt = db
            .prepare(
                "INSERT OR IGNORE INTO message_recipients (message_id, agent_id, kind) VALUES (?, ?, ?)",
            )
            .await?;
        stmt.execute((message_id, agent_id, kind)).await?;
    }
    Ok(())
}

async fn reconcile_project(engine: &Engine, slug: &str) -> Result<u64> {
    let _guard = engine.lock_project(slug, Some("recovery".into())).await?;
    let repo = git_store::open_repo(engine.project_repo_path(slug))?;
    let mut inserted = 0u64;

    // Project row from the committed marker.
    let marker: serde_json::Value = match git_store::read_file_content(&repo, "project.json") {
        Ok(content) => serde_json::from_str(&content)?,
        Err(_) => {
            warn!(slug, "archive has no project.json marker, skipping");
            return Ok(0);
        }
    };
    let human_key = marker["human_key"].as_str().unwrap_or(slug).to_string();
    let created = marker["created"].as_str().unwrap_or_default().to_string();

    let db = engine.db();
    let project_id = {
        let stmt = db.prepare("SELECT id FROM projects WHERE slug = ?").await?;
        let mut rows = stmt.query([slug]).await?;
        if let Some(row) = rows.next().await? {
            ProjectId(row.get(0)?)
        } else {
            let stmt = db
                .prepare(
                    "INSERT INTO projects (slug, human_key, created_ts, meta) VALUES (?, ?, ?, '{}') RETURNING id",
                )
                .await?;
            let mut rows = stmt.query((slug, human_key.as_str(), created.as_str())).await?;
            let row = rows
                .next()
                .await?
                .ok_or_else(|| crate::Error::IndexArchiveMismatch("project insert failed".into()))?;
            inserted += 1;
            ProjectId(row.get(0)?)
        }
    };

    // Agents from committed profiles.
    let mut agent_ids: HashMap<String, i64> = HashMap::new();
    for path in git_store::list_tree_paths(&repo, "agents/")? {
        let path_str = path.to_string_lossy();
        if !path_str.ends_with("/profile.json") {
            continue;
        }
        let profile: serde_json::Value =
            serde_json::from_str(&git_store::read_file_content(&repo, &path)?)?;
        let Some(name) = profile["name"].as_str() else { continue };

        let stmt = db
            .prepare("SELECT id FROM agents WHERE project_id = ? AND name = ? COLLATE NOCASE")
            .await?;
        let mut rows = stmt.query((project_id.get(), name)).await?;
        let id = if let Some(row) = rows.next().await? {
            row.get::<i64>(0)?
        } else {
            let stmt = db
                .prepare(
                    r#"
                INSERT INTO agents (project_id, name, program, model, task_description, contact_policy, inception_ts, last_active_ts)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING id
                "#,
                )
                .await?;
            let mut rows = stmt
                .query((
                    project_id.get(),
                    name,
                    profile["program"].as_str().unwrap_or(""),
                    profile["model"].as_str().unwrap_or(""),
                    profile["task_description"].as_str().unwrap_or(""),
                    profile["contact_policy"].as_str().unwrap_or("auto"),
                    profile["inception"].as_str().unwrap_or(&created),
                    profile["last_active"].as_str().unwrap_or(&created),
                ))
                .await?;
            let row = rows
                .next()
                .await?
                .ok_or_else(|| crate::Error::IndexArchiveMismatch("agent insert failed".into()))?;
            inserted += 1;
            row.get::<i64>(0)?
        };
        agent_ids.insert(name.to_lowercase(), id);
    }

    // Inbox ownership map recovers bcc recipients, which the canonical
    // frontmatter deliberately omits.
    let mut inbox_owners: HashMap<String, HashSet<String>> = HashMap::new();
    for path in git_store::list_tree_paths(&repo, "agents/")? {
        let path_str = path.to_string_lossy().to_string();
        let parts: Vec<&str> = path_str.split('/').collect();
        // agents/<name>/inbox/<YYYY>/<MM>/<msg-id>.md
        if parts.len() == 6 && parts[2] == "inbox" {
            if let Some(id) = parts[5].strip_suffix(".md") {
                inbox_owners
                    .entry(id.to_string())
                    .or_default()
                    .insert(parts[1].to_lowercase());
            }
        }
    }

    // Messages from canonical files.
    for path in git_store::list_tree_paths(&repo, "messages/")? {
        let path_str = path.to_string_lossy();
        let Some(id) = path_str
            .rsplit('/')
            .next()
            .and_then(|f| f.strip_suffix(".md"))
        else {
            continue;
        };

        let stmt = db.prepare("SELECT 1 FROM messages WHERE id = ?").await?;
        let mut rows = stmt.query([id]).await?;
        if rows.next().await?.is_some() {
            continue;
        }

        let content = git_store::read_file_content(&repo, &path)?;
        let (fm, body) = match message::parse_message_file(&content) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(slug, path = %path_str, error = %e, "unparseable message file, skipping");
                continue;
            }
        };
        let Some(&sender_id) = agent_ids.get(&fm.from.to_lowercase()) else {
            warn!(slug, message = id, from = %fm.from, "message sender has no profile, skipping");
            continue;
        };

        let stmt = db
            .prepare(
                r#"
            INSERT INTO messages (id, project_id, sender_id, thread_id, subject, body_md, importance, ack_required, overseer, kind, created_ts)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            )
            .await?;
        let kind_value = match &fm.kind {
            Some(kind) => libsql::Value::from(kind.clone()),
            None => libsql::Value::Null,
        };
        let params: Vec<libsql::Value> = vec![
            id.to_string().into(),
            project_id.get().into(),
            sender_id.into(),
            fm.thread_id.clone().into(),
            fm.subject.clone().into(),
            body.clone().into(),
            fm.importance.clone().into(),
            fm.ack_required.into(),
            fm.overseer.unwrap_or(false).into(),
            kind_value,
            fmt_ts(parse_ts(&fm.created)).into(),
        ];
        stmt.execute(libsql::params::Params::Positional(params)).await?;
        inserted += 1;

        let named: HashSet<String> = fm
            .to
            .iter()
            .chain(fm.cc.iter())
            .map(|n| n.to_lowercase())
            .collect();
        for name in &fm.to {
            insert_recipient(db, &agent_ids, id, &name.to_lowercase(), "to").await?;
        }
        for name in &fm.cc {
            insert_recipient(db, &agent_ids, id, &name.to_lowercase(), "cc").await?;
        }
        if let Some(owners) = inbox_owners.get(id) {
            for owner in owners {
                if !named.contains(owner) {
                    insert_recipient(db, &agent_ids, id, owner, "bcc").await?;
                }
            }
        }
    }

    // Claims from committed claim records.
    for path in git_store::list_tree_paths(&repo, "claims/")? {
        let holders: Vec<serde_json::Value> =
            match serde_json::from_str(&git_store::read_file_content(&repo, &path)?) {
                Ok(holders) => holders,
                Err(e) => {
                    warn!(slug, path = %path.display(), error = %e, "unparseable claim file, skipping");
                    continue;
                }
            };
        for holder in holders {
            let Some(agent_name) = holder["agent"].as_str() else { continue };
            let Some(&agent_id) = agent_ids.get(&agent_name.to_lowercase()) else { continue };
            let pattern = holder["path_pattern"].as_str().unwrap_or_default();
            let created_ts = holder["created"].as_str().unwrap_or_default();

            let stmt = db
                .prepare(
                    r#"
                SELECT 1 FROM claims
                WHERE project_id = ? AND agent_id = ? AND path_pattern = ? AND created_ts = ?
                "#,
                )
                .await?;
            let mut rows = stmt
                .query((project_id.get(), agent_id, pattern, created_ts))
                .await?;
            if rows.next().await?.is_some() {
                continue;
            }

            let stmt = db
                .prepare(
                    r#"
                INSERT INTO claims (project_id, agent_id, path_pattern, exclusive, reason, created_ts, expires_ts)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
                )
                .await?;
            stmt.execute((
                project_id.get(),
                agent_id,
                pattern,
                holder["exclusive"].as_bool().unwrap_or(true),
                holder["reason"].as_str().unwrap_or_default(),
                created_ts,
                holder["expires"].as_str().unwrap_or_default(),
            ))
            .await?;
            inserted += 1;
        }
    }

    if inserted > 0 {
        info!(slug, rows = inserted, "reconciled archive entries into the index");
    }
    Ok(inserted)
}
