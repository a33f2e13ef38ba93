//! The mailbox: send, reply, fetch, acknowledge, search.
//!
//! A send writes the canonical message file, the sender's outbox copy and
//! one inbox copy per recipient, lands exactly one commit per involved
//! project, then upserts the index rows. All of that happens while holding
//! the project lock(s), so readers never observe a half-delivered message.
//!
//! Cross-project recipients are addressed as `slug:Name` and require an
//! accepted agent link in both directions.

use crate::Engine;
use crate::Result;
use crate::store::git_store;
use crate::store::project_lock::LockGuard;
use crate::types::{
    AgentId, Importance, ProjectId, RecipientKind, fmt_ts, now_ts, parse_ts,
};
use chrono::NaiveDateTime;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use tracing::info;

use super::agent::{Agent, AgentBmc, OVERSEER_NAME};
use super::policy::{self, PolicyDecision};
use super::project::{Project, ProjectBmc};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub project_id: ProjectId,
    pub sender_id: AgentId,
    pub sender_name: String,
    pub thread_id: String,
    pub subject: String,
    pub body_md: String,
    pub importance: Importance,
    pub ack_required: bool,
    pub overseer: bool,
    pub created_ts: NaiveDateTime,
}

/// One row of an inbox or outbox listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageSummary {
    pub id: String,
    pub thread_id: String,
    pub from: String,
    pub subject: String,
    pub importance: Importance,
    pub ack_required: bool,
    pub overseer: bool,
    pub created_ts: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body_md: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<RecipientKind>,
    pub read_ts: Option<NaiveDateTime>,
    pub ack_ts: Option<NaiveDateTime>,
}

/// Recipient state on one message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecipientRecord {
    pub agent_name: String,
    pub kind: RecipientKind,
    pub read_ts: Option<NaiveDateTime>,
    pub ack_ts: Option<NaiveDateTime>,
}

/// Input to [`MessageBmc::send`].
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MessageForSend {
    pub sender_name: String,
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    pub subject: String,
    pub body_md: String,
    #[serde(default)]
    pub importance: Importance,
    #[serde(default)]
    pub ack_required: bool,
    pub thread_id: Option<String>,
}

/// What the caller gets back from a successful send.
#[derive(Debug, Clone, Serialize)]
pub struct SendReceipt {
    pub id: String,
    pub thread_id: String,
    pub created: NaiveDateTime,
    pub subject: String,
    pub recipients: Vec<String>,
}

/// Filters for [`MessageBmc::fetch_inbox`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InboxQuery {
    pub since_ts: Option<NaiveDateTime>,
    #[serde(default)]
    pub urgent_only: bool,
    #[serde(default)]
    pub include_bodies: bool,
    pub limit: Option<i64>,
}

struct ResolvedRecipient {
    project: Project,
    agent: Agent,
    kind: RecipientKind,
}

pub struct MessageBmc;

impl MessageBmc {
    /// Send a message. See the module docs for the full write protocol.
    pub async fn send(engine: &Engine, project: &Project, input: MessageForSend) -> Result<SendReceipt> {
        if input.to.is_empty() {
            return Err(crate::Error::InvalidArgument("recipient list must not be empty".into()));
        }
        if input.subject.trim().is_empty() {
            return Err(crate::Error::InvalidArgument("subject must not be empty".into()));
        }

        // Pre-resolve the set of projects this send touches, then take their
        // locks in slug order. Sorted acquisition keeps two crossing
        // cross-project sends from waiting on each other forever.
        let mut slugs: BTreeSet<String> = BTreeSet::new();
        slugs.insert(project.slug.clone());
        for (name, _) in Self::addressees(&input) {
            if let Some((remote_slug, _)) = split_address(name) {
                let remote = ProjectBmc::get_by_slug(engine, remote_slug).await?;
                slugs.insert(remote.slug);
            }
        }
        let mut guards: Vec<LockGuard> = Vec::with_capacity(slugs.len());
        for slug in &slugs {
            guards.push(engine.lock_project(slug, Some(input.sender_name.clone())).await?);
        }

        let receipt = Self::send_locked(engine, project, input).await?;
        drop(guards);
        Ok(receipt)
    }

    /// Send with all involved project locks already held.
    async fn send_locked(
        engine: &Engine,
        project: &Project,
        input: MessageForSend,
    ) -> Result<SendReceipt> {
        let sender = AgentBmc::get_by_name(engine, project.id, &input.sender_name).await?;
        let overseer = sender.name.eq_ignore_ascii_case(OVERSEER_NAME);

        // Resolve every addressee, first slot wins on duplicates.
        let mut recipients: Vec<ResolvedRecipient> = Vec::new();
        for (name, kind) in Self::addressees(&input) {
            let (rproject, ragent) = match split_address(name) {
                Some((remote_slug, agent_name)) => {
                    let rproject = ProjectBmc::get_by_slug(engine, remote_slug).await?;
                    let ragent = AgentBmc::get_by_name(engine, rproject.id, agent_name).await?;
                    (rproject, ragent)
                }
                None => {
                    let ragent = AgentBmc::get_by_name(engine, project.id, name).await?;
                    (project.clone(), ragent)
                }
            };
            if recipients.iter().any(|r| r.agent.id == ragent.id) {
                continue;
            }
            recipients.push(ResolvedRecipient { project: rproject, agent: ragent, kind });
        }

        // Authorization. The overseer bypasses everything.
        if !overseer {
            // Cross-project recipients need an accepted link in both directions.
            for r in recipients.iter().filter(|r| r.project.id != project.id) {
                if !policy::link_accepted(engine, project.id, sender.id, r.project.id, r.agent.id)
                    .await?
                {
                    policy::create_pending_link(
                        engine, project.id, sender.id, r.project.id, r.agent.id,
                    )
                    .await?;
                    return Err(crate::Error::LinkRequired(format!(
                        "{}:{}",
                        r.project.slug, r.agent.name
                    )));
                }
            }

            let mut blocked = Vec::new();
            let mut pending: Vec<&ResolvedRecipient> = Vec::new();
            for r in recipients.iter().filter(|r| r.project.id == project.id) {
                match policy::evaluate(engine, project, &sender, &r.agent).await? {
                    PolicyDecision::Allow => {}
                    PolicyDecision::Blocked => blocked.push(r.agent.name.clone()),
                    PolicyDecision::Pending => pending.push(r),
                }
            }
            if !blocked.is_empty() {
                return Err(crate::Error::PolicyBlocked { blocked });
            }
            if !pending.is_empty() {
                // Auto-create the contact requests and drop a marked note
                // into each target inbox; the send itself fails.
                let mut names = Vec::new();
                for r in &pending {
                    policy::upsert_contact_request(
                        engine,
                        project,
                        &sender,
                        &r.agent,
                        &format!("auto-created by send: {}", input.subject),
                    )
                    .await?;
                    names.push(r.agent.name.clone());
                }
                return Err(crate::Error::ContactPending { pending: names });
            }
        }

        // Identity and timestamp are assigned inside the critical section so
        // concurrent sends on one project observe strictly ordered rows.
        let created_ts = now_ts();
        let id = new_message_id(created_ts);
        let thread_id = input.thread_id.clone().unwrap_or_else(|| id.clone());

        let local_names: Vec<String> = recipients
            .iter()
            .filter(|r| r.project.id == project.id)
            .map(|r| r.agent.name.clone())
            .collect();
        let all_names: Vec<String> = recipients
            .iter()
            .map(|r| {
                if r.project.id == project.id {
                    r.agent.name.clone()
                } else {
                    format!("{}:{}", r.project.slug, r.agent.name)
                }
            })
            .collect();
        let to_names: Vec<String> = recipients
            .iter()
            .filter(|r| matches!(r.kind, RecipientKind::To))
            .map(|r| r.agent.name.clone())
            .collect();
        let cc_names: Vec<String> = recipients
            .iter()
            .filter(|r| matches!(r.kind, RecipientKind::Cc))
            .map(|r| r.agent.name.clone())
            .collect();

        let frontmatter = MessageFrontmatter {
            id: id.clone(),
            thread_id: thread_id.clone(),
            project: project.slug.clone(),
            from: sender.name.clone(),
            to: to_names,
            cc: cc_names,
            subject: input.subject.clone(),
            created: fmt_ts(created_ts),
            importance: input.importance.as_str().to_string(),
            ack_required: input.ack_required,
            overseer: overseer.then_some(true),
            kind: None,
        };
        let content = format_message_file(&frontmatter, &input.body_md)?;

        // Archive: local project gets canonical + outbox + local inboxes in
        // one commit; each remote project gets its inbox copies in one commit.
        let paths = build_message_paths(&sender.name, &local_names, &id, created_ts);
        let repo = git_store::init_or_open_repo(engine.project_repo_path(&project.slug))?;
        let mut rel_paths: Vec<PathBuf> = vec![paths.canonical.clone(), paths.outbox.clone()];
        rel_paths.extend(paths.inboxes.iter().cloned());
        for rel in &rel_paths {
            git_store::write_workdir_file(&repo, rel, &content)?;
        }
        // Bcc recipients stay out of the commit subject, same as the
        // canonical frontmatter.
        let visible_names: Vec<String> = recipients
            .iter()
            .filter(|r| !matches!(r.kind, RecipientKind::Bcc))
            .map(|r| {
                if r.project.id == project.id {
                    r.agent.name.clone()
                } else {
                    format!("{}:{}", r.project.slug, r.agent.name)
                }
            })
            .collect();
        let visible = if visible_names.is_empty() {
            "(bcc)".to_string()
        } else {
            visible_names.join(", ")
        };
        let commit_msg = format!("mail: {} -> {} | {}", sender.name, visible, input.subject);
        git_store::commit_paths(&repo, &rel_paths, &commit_msg)?;

        for r in recipients.iter().filter(|r| r.project.id != project.id) {
            let rrepo = git_store::init_or_open_repo(engine.project_repo_path(&r.project.slug))?;
            let rel = inbox_path(&r.agent.name, &id, created_ts);
            git_store::write_workdir_file(&rrepo, &rel, &content)?;
            git_store::commit_paths(&rrepo, &[rel], &commit_msg)?;
        }

        // Index, after the archive. The write is idempotent, so a transient
        // failure gets one retry inside the lock; a second failure leaves an
        // orphan commit for the recovery pass and surfaces the mismatch code.
        let mut index_result = Self::index_message(
            engine, project, &sender, &id, &thread_id, &input, overseer, created_ts, &recipients,
        )
        .await;
        if let Err(first) = index_result {
            tracing::warn!(message = %id, error = %first, "index write failed, retrying once");
            index_result = Self::index_message(
                engine, project, &sender, &id, &thread_id, &input, overseer, created_ts,
                &recipients,
            )
            .await;
        }
        if let Err(e) = index_result {
            return Err(crate::Error::IndexArchiveMismatch(format!(
                "message {} committed but index write failed: {}",
                id, e
            )));
        }

        AgentBmc::touch(engine, sender.id).await?;
        info!(message = %id, from = %sender.name, "message committed and indexed");

        Ok(SendReceipt {
            id,
            thread_id,
            created: created_ts,
            subject: input.subject,
            recipients: all_names,
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn index_message(
        engine: &Engine,
        project: &Project,
        sender: &Agent,
        id: &str,
        thread_id: &str,
        input: &MessageForSend,
        overseer: bool,
        created_ts: NaiveDateTime,
        recipients: &[ResolvedRecipient],
    ) -> Result<()> {
        let db = engine.db();
        let stmt = db
            .prepare(
                r#"
            INSERT OR IGNORE INTO messages (id, project_id, sender_id, thread_id, subject, body_md, importance, ack_required, overseer, created_ts)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            )
            .await?;
        let params: Vec<libsql::Value> = vec![
            id.to_string().into(),
            project.id.get().into(),
            sender.id.get().into(),
            thread_id.to_string().into(),
            input.subject.clone().into(),
            input.body_md.clone().into(),
            input.importance.as_str().to_string().into(),
            input.ack_required.into(),
            overseer.into(),
            fmt_ts(created_ts).into(),
        ];
        stmt.execute(libsql::params::Params::Positional(params)).await?;

        for r in recipients {
            let stmt = db
                .prepare(
                    "INSERT OR IGNORE INTO message_recipients (message_id, agent_id, kind) VALUES (?, ?, ?)",
                )
                .await?;
            stmt.execute((id, r.agent.id.get(), r.kind.as_str())).await?;
        }
        Ok(())
    }

    /// Deliver a policy-exempt notification (contact requests, overseer
    /// notes). Caller must hold the project lock.
    pub(crate) async fn deliver_note_locked(
        engine: &Engine,
        project: &Project,
        from: &Agent,
        to: &Agent,
        subject: &str,
        body_md: &str,
        marker: &str,
    ) -> Result<String> {
        let created_ts = now_ts();
        let id = new_message_id(created_ts);

        let frontmatter = MessageFrontmatter {
            id: id.clone(),
            thread_id: id.clone(),
            project: project.slug.clone(),
            from: from.name.clone(),
            to: vec![to.name.clone()],
            cc: Vec::new(),
            subject: subject.to_string(),
            created: fmt_ts(created_ts),
            importance: Importance::High.as_str().to_string(),
            ack_required: false,
            overseer: None,
            kind: Some(marker.to_string()),
        };
        let content = format_message_file(&frontmatter, body_md)?;

        let paths = build_message_paths(&from.name, &[to.name.clone()], &id, created_ts);
        let repo = git_store::init_or_open_repo(engine.project_repo_path(&project.slug))?;
        let mut rel_paths: Vec<PathBuf> = vec![paths.canonical.clone(), paths.outbox.clone()];
        rel_paths.extend(paths.inboxes.iter().cloned());
        for rel in &rel_paths {
            git_store::write_workdir_file(&repo, rel, &content)?;
        }
        git_store::commit_paths(
            &repo,
            &rel_paths,
            &format!("mail: {} -> {} | {}", from.name, to.name, subject),
        )?;

        let db = engine.db();
        let stmt = db
            .prepare(
                r#"
            INSERT INTO messages (id, project_id, sender_id, thread_id, subject, body_md, importance, ack_required, overseer, kind, created_ts)
            VALUES (?, ?, ?, ?, ?, ?, 'high', 0, 0, ?, ?)
            "#,
            )
            .await?;
        stmt.execute((
            id.as_str(),
            project.id.get(),
            from.id.get(),
            id.as_str(),
            subject,
            body_md,
            marker,
            fmt_ts(created_ts),
        ))
        .await?;
        let stmt = db
            .prepare("INSERT INTO message_recipients (message_id, agent_id, kind) VALUES (?, ?, 'to')")
            .await?;
        stmt.execute((id.as_str(), to.id.get())).await?;

        Ok(id)
    }

    /// Reply to a message: thread closure, `Re:` prefix, recipients are the
    /// original sender plus the original `to` list minus the replier.
    pub async fn reply(
        engine: &Engine,
        project: &Project,
        message_id: &str,
        sender_name: &str,
        body_md: String,
        importance: Option<Importance>,
        ack_required: Option<bool>,
    ) -> Result<SendReceipt> {
        let original = Self::get(engine, message_id).await?;

        let mut to: Vec<String> = Vec::new();
        if original.project_id == project.id {
            let original_recipients = Self::recipients(engine, message_id).await?;
            if !original.sender_name.eq_ignore_ascii_case(sender_name) {
                to.push(original.sender_name.clone());
            }
            for r in original_recipients
                .iter()
                .filter(|r| matches!(r.kind, RecipientKind::To))
            {
                if !r.agent_name.eq_ignore_ascii_case(sender_name)
                    && !to.iter().any(|n| n.eq_ignore_ascii_case(&r.agent_name))
                {
                    to.push(r.agent_name.clone());
                }
            }
            if to.is_empty() {
                to.push(original.sender_name.clone());
            }
        } else {
            // The original lives in another project (it arrived through an
            // agent link); the reply goes back to its sender over the link.
            let origin = ProjectBmc::get(engine, original.project_id).await?;
            to.push(format!("{}:{}", origin.slug, original.sender_name));
        }

        let subject = if original.subject.starts_with("Re: ") {
            original.subject.clone()
        } else {
            format!("Re: {}", original.subject)
        };

        Self::send(
            engine,
            project,
            MessageForSend {
                sender_name: sender_name.to_string(),
                to,
                cc: Vec::new(),
                bcc: Vec::new(),
                subject,
                body_md,
                importance: importance.unwrap_or(original.importance),
                ack_required: ack_required.unwrap_or(original.ack_required),
                thread_id: Some(original.thread_id.clone()),
            },
        )
        .await
    }

    /// Newest-first inbox for an agent; refreshes the caller's activity.
    pub async fn fetch_inbox(
        engine: &Engine,
        project: &Project,
        agent_name: &str,
        query: &InboxQuery,
    ) -> Result<Vec<MessageSummary>> {
        let agent = AgentBmc::get_by_name(engine, project.id, agent_name).await?;

        let mut sql = String::from(
            r#"
            SELECT m.id, m.thread_id, ag.name, m.subject, m.body_md, m.importance,
                   m.ack_required, m.overseer, m.created_ts, mr.kind, mr.read_ts, mr.ack_ts
            FROM messages m
            JOIN message_recipients mr ON mr.message_id = m.id
            JOIN agents ag ON ag.id = m.sender_id
            WHERE mr.agent_id = ?
            "#,
        );
        let mut params: Vec<libsql::Value> = vec![agent.id.get().into()];
        if let Some(since) = query.since_ts {
            sql.push_str(" AND m.created_ts > ?");
            params.push(fmt_ts(since).into());
        }
        if query.urgent_only {
            sql.push_str(" AND m.importance IN ('high', 'urgent')");
        }
        sql.push_str(" ORDER BY m.created_ts DESC, m.id DESC LIMIT ?");
        params.push(query.limit.unwrap_or(20).clamp(1, 500).into());

        let db = engine.db();
        let stmt = db.prepare(&sql).await?;
        let mut rows = stmt.query(libsql::params::Params::Positional(params)).await?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(Self::summary_from_row(row, query.include_bodies)?);
        }

        AgentBmc::touch(engine, agent.id).await?;
        Ok(items)
    }

    /// Newest-first list of messages an agent has sent in this project.
    pub async fn fetch_outbox(
        engine: &Engine,
        project: &Project,
        agent_name: &str,
        limit: i64,
        include_bodies: bool,
    ) -> Result<Vec<MessageSummary>> {
        let agent = AgentBmc::get_by_name(engine, project.id, agent_name).await?;
        let db = engine.db();
        let stmt = db
            .prepare(
                r#"
            SELECT m.id, m.thread_id, ag.name, m.subject, m.body_md, m.importance,
                   m.ack_required, m.overseer, m.created_ts, NULL, NULL, NULL
            FROM messages m
            JOIN agents ag ON ag.id = m.sender_id
            WHERE m.sender_id = ? AND m.project_id = ?
            ORDER BY m.created_ts DESC, m.id DESC
            LIMIT ?
            "#,
            )
            .await?;
        let mut rows = stmt
            .query((agent.id.get(), project.id.get(), limit.clamp(1, 500)))
            .await?;

        let mut items = Vec::new();
        while let Some(row) = rows.next().await? {
            items.push(Self::summary_from_row(row, include_bodies)?);
        }
        Ok(items)
    }

    pub async fn get(engine: &Engine, message_id: &str) -> Result<Message> {
        let db = engine.db();
        let stmt = db
            .prepare(
                r#"
            SELECT m.id, m.project_id, m.sender_id, ag.name, m.thread_id, m.subject, m.body_md,
                   m.importance, m.ack_required, m.overseer, m.created_ts
            FROM messages m
            JOIN agents ag ON ag.id = m.sender_id
            WHERE m.id = ?
            "#,
            )
            .await?;
        let mut rows = stmt.query([message_id]).await?;

        if let Some(row) = rows.next().await? {
            Self::from_row(row)
        } else {
            Err(crate::Error::MessageNotFound(message_id.to_string()))
        }
    }

    pub async fn recipients(engine: &Engine, message_id: &str) -> Result<Vec<RecipientRecord>> {
        let db = engine.db();
        let stmt = db
            .prepare(
                r#"
            SELECT a.name, mr.kind, mr.read_ts, mr.ack_ts
            FROM message_recipients mr
            JOIN agents a ON mr.agent_id = a.id
            WHERE mr.message_id = ?
            ORDER BY mr.kind, a.name
            "#,
            )
            .await?;
        let mut rows = stmt.query([message_id]).await?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await? {
            let kind_str: String = row.get(1)?;
            let read_ts: Option<String> = row.get(2)?;
            let ack_ts: Option<String> = row.get(3)?;
            records.push(RecipientRecord {
                agent_name: row.get(0)?,
                kind: RecipientKind::parse(&kind_str).unwrap_or(RecipientKind::To),
                read_ts: read_ts.as_deref().map(parse_ts),
                ack_ts: ack_ts.as_deref().map(parse_ts),
            });
        }
        Ok(records)
    }

    /// Record the read timestamp; idempotent, no archive change.
    pub async fn mark_read(
        engine: &Engine,
        project: &Project,
        agent_name: &str,
        message_id: &str,
    ) -> Result<bool> {
        let agent = AgentBmc::get_by_name(engine, project.id, agent_name).await?;
        let db = engine.db();
        let stmt = db
            .prepare(
                "UPDATE message_recipients SET read_ts = ? WHERE message_id = ? AND agent_id = ? AND read_ts IS NULL",
            )
            .await?;
        let updated = stmt
            .execute((fmt_ts(now_ts()), message_id, agent.id.get()))
            .await?;
        AgentBmc::touch(engine, agent.id).await?;
        Ok(updated > 0)
    }

    /// Record the acknowledgement timestamp (also marks read); idempotent,
    /// no archive change.
    pub async fn acknowledge(
        engine: &Engine,
        project: &Project,
        agent_name: &str,
        message_id: &str,
    ) -> Result<(NaiveDateTime, bool)> {
        let agent = AgentBmc::get_by_name(engine, project.id, agent_name).await?;
        let now = now_ts();
        let db = engine.db();
        let stmt = db
            .prepare(
                r#"
            UPDATE message_recipients
            SET ack_ts = ?, read_ts = COALESCE(read_ts, ?)
            WHERE message_id = ? AND agent_id = ? AND ack_ts IS NULL
            "#,
            )
            .await?;
        let updated = stmt
            .execute((fmt_ts(now), fmt_ts(now), message_id, agent.id.get()))
            .await?;
        AgentBmc::touch(engine, agent.id).await?;
        Ok((now, updated > 0))
    }

    /// Full-text search over subject and body, newest first.
    pub async fn search(
        engine: &Engine,
        project_id: ProjectId,
        query: &str,
        limit: i64,
    ) -> Result<Vec<MessageSummary>> {
        let trimmed = query.trim();
        // Bare wildcard/punctuation queries would scan everything or trip
        // the FTS parser; they match nothing by definition.
        if matches!(trimmed, "" | "*" | "**" | "***" | "." | ".." | "..." | "?" | "??" | "???") {
            return Ok(Vec::new());
        }

        let fts_query = escape_fts_query(query);
        let db = engine.db();
        let stmt = db
            .prepare(
                r#"
            SELECT m.id, m.thread_id, ag.name, m.subject, m.body_md, m.importance,
                   m.ack_required, m.overseer, m.created_ts, NULL, NULL, NULL
            FROM messages m
            JOIN agents ag ON ag.id = m.sender_id
            WHERE m.project_id = ? AND m.rowid IN (
                SELECT rowid FROM messages_fts WHERE messages_fts MATCH ?
            )
            ORDER BY m.created_ts DESC, m.id DESC
            LIMIT ?
            "#,
            )
            .await?;
        let mut rows = match stmt
            .query((project_id.get(), fts_query.as_str(), limit.clamp(1, 200)))
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                info!(query = %query, error = %e, "FTS query rejected, returning empty");
                return Ok(Vec::new());
            }
        };

        let mut items = Vec::new();
        loop {
            match rows.next().await {
                Ok(Some(row)) => items.push(Self::summary_from_row(row, false)?),
                Ok(None) => break,
                Err(e) => {
                    info!(query = %query, error = %e, "FTS row iteration failed, returning partial");
                    break;
                }
            }
        }
        Ok(items)
    }

    /// All messages in a thread, oldest first.
    pub async fn list_thread(
        engine: &Engine,
        project_id: ProjectId,
        thread_id: &str,
    ) -> Result<Vec<Message>> {
        let db = engine.db();
        let stmt = db
            .prepare(
                r#"
            SELECT m.id, m.project_id, m.sender_id, ag.name, m.thread_id, m.subject, m.body_md,
                   m.importance, m.ack_required, m.overseer, m.created_ts
            FROM messages m
            JOIN agents ag ON ag.id = m.sender_id
            WHERE m.project_id = ? AND m.thread_id = ?
            ORDER BY m.created_ts ASC, m.id ASC
            "#,
            )
            .await?;
        let mut rows = stmt.query((project_id.get(), thread_id)).await?;

        let mut messages = Vec::new();
        while let Some(row) = rows.next().await? {
            messages.push(Self::from_row(row)?);
        }
        Ok(messages)
    }

    fn addressees(input: &MessageForSend) -> impl Iterator<Item = (&String, RecipientKind)> {
        input
            .to
            .iter()
            .map(|n| (n, RecipientKind::To))
            .chain(input.cc.iter().map(|n| (n, RecipientKind::Cc)))
            .chain(input.bcc.iter().map(|n| (n, RecipientKind::Bcc)))
    }

    fn from_row(row: libsql::Row) -> Result<Message> {
        let importance_str: String = row.get(7)?;
        let created_ts_str: String = row.get(10)?;
        Ok(Message {
            id: row.get(0)?,
            project_id: ProjectId(row.get(1)?),
            sender_id: AgentId(row.get(2)?),
            sender_name: row.get(3)?,
            thread_id: row.get(4)?,
            subject: row.get(5)?,
            body_md: row.get(6)?,
            importance: Importance::parse(&importance_str).unwrap_or_default(),
            ack_required: row.get(8)?,
            overseer: row.get(9)?,
            created_ts: parse_ts(&created_ts_str),
        })
    }

    fn summary_from_row(row: libsql::Row, include_bodies: bool) -> Result<MessageSummary> {
        let importance_str: String = row.get(5)?;
        let created_ts_str: String = row.get(8)?;
        let kind_str: Option<String> = row.get(9).unwrap_or_default();
        let read_ts: Option<String> = row.get(10).unwrap_or_default();
        let ack_ts: Option<String> = row.get(11).unwrap_or_default();
        let body_md: String = row.get(4)?;

        Ok(MessageSummary {
            id: row.get(0)?,
            thread_id: row.get(1)?,
            from: row.get(2)?,
            subject: row.get(3)?,
            importance: Importance::parse(&importance_str).unwrap_or_default(),
            ack_required: row.get(6)?,
            overseer: row.get(7)?,
            created_ts: parse_ts(&created_ts_str),
            body_md: include_bodies.then_some(body_md),
            kind: kind_str.as_deref().and_then(RecipientKind::parse),
            read_ts: read_ts.as_deref().map(parse_ts),
            ack_ts: ack_ts.as_deref().map(parse_ts),
        })
    }
}

/// `slug:Name` addresses a recipient in another project.
fn split_address(name: &str) -> Option<(&str, &str)> {
    name.split_once(':')
        .filter(|(slug, agent)| !slug.is_empty() && !agent.is_empty())
}

/// Time-prefixed opaque message id: `msg_<YYYYMMDD>_<hex8>`.
fn new_message_id(ts: NaiveDateTime) -> String {
    let mut rng = rand::thread_rng();
    let suffix: u32 = rng.r#gen();
    format!("msg_{}_{:08x}", ts.format("%Y%m%d"), suffix)
}

/// Archive paths (relative to the project repo root) for one message.
struct MessageArchivePaths {
    canonical: PathBuf,
    outbox: PathBuf,
    inboxes: Vec<PathBuf>,
}

fn build_message_paths(
    sender_name: &str,
    recipient_names: &[String],
    id: &str,
    created_ts: NaiveDateTime,
) -> MessageArchivePaths {
    let y_dir = created_ts.format("%Y").to_string();
    let m_dir = created_ts.format("%m").to_string();
    let filename = format!("{}.md", id);

    let canonical = PathBuf::from("messages").join(&y_dir).join(&m_dir).join(&filename);
    let outbox = PathBuf::from("agents")
        .join(sender_name)
        .join("outbox")
        .join(&y_dir)
        .join(&m_dir)
        .join(&filename);
    let inboxes = recipient_names
        .iter()
        .map(|name| {
            PathBuf::from("agents")
                .join(name)
                .join("inbox")
                .join(&y_dir)
                .join(&m_dir)
                .join(&filename)
        })
        .collect();

    MessageArchivePaths { canonical, outbox, inboxes }
}

fn inbox_path(agent_name: &str, id: &str, created_ts: NaiveDateTime) -> PathBuf {
    PathBuf::from("agents")
        .join(agent_name)
        .join("inbox")
        .join(created_ts.format("%Y").to_string())
        .join(created_ts.format("%m").to_string())
        .join(format!("{}.md", id))
}

/// Frontmatter mirrored into the index; the archive file is
/// `---json\n<frontmatter>\n---\n\n<body>`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct MessageFrontmatter {
    pub id: String,
    pub thread_id: String,
    pub project: String,
    pub from: String,
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    pub subject: String,
    pub created: String,
    pub importance: String,
    #[serde(default)]
    pub ack_required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overseer: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

pub(crate) fn format_message_file(fm: &MessageFrontmatter, body_md: &str) -> Result<String> {
    Ok(format!(
        "---json\n{}\n---\n\n{}",
        serde_json::to_string_pretty(fm)?,
        body_md
    ))
}

/// Parse an archived message file back into frontmatter + body.
pub(crate) fn parse_message_file(content: &str) -> Result<(MessageFrontmatter, String)> {
    let rest = content.strip_prefix("---json\n").ok_or_else(|| {
        crate::Error::IndexArchiveMismatch("message file missing ---json frontmatter".into())
    })?;
    let (json, body) = rest.split_once("\n---\n\n").ok_or_else(|| {
        crate::Error::IndexArchiveMismatch("message file missing frontmatter terminator".into())
    })?;
    let fm: MessageFrontmatter = serde_json::from_str(json)?;
    Ok((fm, body.to_string()))
}

/// Escape a user query for FTS5.
///
/// Explicit operators and balanced phrases pass through raw; hyphenated
/// words are quoted so FTS5 does not parse them as NOT; unbalanced quotes
/// degrade to a literal phrase.
fn escape_fts_query(query: &str) -> String {
    let quote_count = query.chars().filter(|c| *c == '"').count();
    let has_fts_operators = query.contains(" AND ")
        || query.contains(" OR ")
        || query.contains(" NOT ")
        || query.contains('*');

    if quote_count % 2 != 0 {
        format!("\"{}\"", query.replace('"', "\"\""))
    } else if has_fts_operators || query.starts_with('"') {
        query.to_string()
    } else {
        query
            .split_whitespace()
            .map(|word| {
                if word.contains('-') && !word.starts_with('"') {
                    format!("\"{}\"", word)
                } else {
                    word.to_string()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}
