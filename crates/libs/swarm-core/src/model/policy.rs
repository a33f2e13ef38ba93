//! Send authorization: contact policies, contact requests, agent links.
//!
//! Same-project sends are governed by the recipient's contact policy;
//! cross-project sends require an accepted agent link in both directions.
//! Contact requests live in the index and are mirrored into the target's
//! inbox as a `[contact-request]`-marked message so polling agents see them.

use crate::Engine;
use crate::Result;
use crate::types::{AgentId, LinkState, ProjectId, fmt_ts, now_ts, parse_ts};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::agent::{Agent, AgentBmc};
use super::claim::{ClaimBmc, paths_overlap};
use super::message::MessageBmc;
use super::project::{Project, ProjectBmc};

/// Subject marker carried by the mirrored inbox note of a contact request.
pub const CONTACT_REQUEST_MARKER: &str = "[contact-request]";

/// Outcome of evaluating one recipient's contact policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Blocked,
    /// `auto` policy with no qualifying signal; a contact request should be
    /// created and the send deferred.
    Pending,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContactRequest {
    pub id: i64,
    pub project_id: ProjectId,
    pub from_agent: String,
    pub to_agent: String,
    pub reason: String,
    pub state: LinkState,
    pub created_ts: NaiveDateTime,
    pub decided_ts: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentLink {
    pub id: i64,
    pub from_project_id: ProjectId,
    pub from_agent_id: AgentId,
    pub to_project_id: ProjectId,
    pub to_agent_id: AgentId,
    pub state: LinkState,
    pub created_ts: NaiveDateTime,
    pub decided_ts: Option<NaiveDateTime>,
}

/// Evaluate whether `sender` may message `recipient` inside `project`.
///
/// The decision matrix is the recipient's policy:
/// - `open`: allow
/// - `block_all`: blocked
/// - `contacts_only`: allow iff an accepted contact request sender->recipient
/// - `auto`: allow on any of (overlapping active claims, a prior message
///   between the pair, an accepted contact in either direction); else pending
pub async fn evaluate(
    engine: &Engine,
    project: &Project,
    sender: &Agent,
    recipient: &Agent,
) -> Result<PolicyDecision> {
    use crate::types::ContactPolicy as Cp;
    match recipient.contact_policy {
        Cp::Open => Ok(PolicyDecision::Allow),
        Cp::BlockAll => Ok(PolicyDecision::Blocked),
        Cp::ContactsOnly => {
            if contact_state(engine, project.id, sender.id, recipient.id).await?
                == Some(LinkState::Accepted)
            {
                Ok(PolicyDecision::Allow)
            } else {
                Ok(PolicyDecision::Blocked)
            }
        }
        Cp::Auto => {
            // The handshake machinery is opt-in; without it `auto` behaves
            // like `open`.
            if !engine.config.contact_enforcement_enabled {
                return Ok(PolicyDecision::Allow);
            }
            if shares_active_claim(engine, project.id, sender.id, recipient.id).await?
                || shares_thread(engine, project.id, sender.id, recipient.id).await?
                || contact_accepted_either(engine, project.id, sender.id, recipient.id).await?
            {
                Ok(PolicyDecision::Allow)
            } else {
                Ok(PolicyDecision::Pending)
            }
        }
    }
}

/// Signal (a): the two agents hold active claims on overlapping paths.
async fn shares_active_claim(
    engine: &Engine,
    project_id: ProjectId,
    a: AgentId,
    b: AgentId,
) -> Result<bool> {
    let claims_a = ClaimBmc::list_active_for_agent(engine, project_id, a).await?;
    if claims_a.is_empty() {
        return Ok(false);
    }
    let claims_b = ClaimBmc::list_active_for_agent(engine, project_id, b).await?;
    for ca in &claims_a {
        for cb in &claims_b {
            if paths_overlap(&ca.path_pattern, &cb.path_pattern) {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

/// Signal (b): any prior message between the pair, in either direction.
/// System notes (`kind IS NOT NULL`) never count — otherwise the mirrored
/// contact-request note would unlock the very send it is deferring.
async fn shares_thread(
    engine: &Engine,
    project_id: ProjectId,
    a: AgentId,
    b: AgentId,
) -> Result<bool> {
    let db = engine.db();
    let stmt = db
        .prepare(
            r#"
        SELECT 1 FROM messages m
        JOIN message_recipients mr ON mr.message_id = m.id
        WHERE m.project_id = ? AND m.kind IS NULL
          AND ((m.sender_id = ? AND mr.agent_id = ?) OR (m.sender_id = ? AND mr.agent_id = ?))
        LIMIT 1
        "#,
        )
        .await?;
    let mut rows = stmt
        .query((project_id.get(), a.get(), b.get(), b.get(), a.get()))
        .await?;
    Ok(rows.next().await?.is_some())
}

/// Contact state of the directed pair `from -> to`, if any request exists.
async fn contact_state(
    engine: &Engine,
    project_id: ProjectId,
    from: AgentId,
    to: AgentId,
) -> Result<Option<LinkState>> {
    let db = engine.db();
    let stmt = db
        .prepare(
            "SELECT state FROM contact_requests WHERE project_id = ? AND from_agent_id = ? AND to_agent_id = ?",
        )
        .await?;
    let mut rows = stmt.query((project_id.get(), from.get(), to.get())).await?;
    if let Some(row) = rows.next().await? {
        let state: String = row.get(0)?;
        Ok(LinkState::parse(&state))
    } else {
        Ok(None)
    }
}

async fn contact_accepted_either(
    engine: &Engine,
    project_id: ProjectId,
    a: AgentId,
    b: AgentId,
) -> Result<bool> {
    Ok(contact_state(engine, project_id, a, b).await? == Some(LinkState::Accepted)
        || contact_state(engine, project_id, b, a).await? == Some(LinkState::Accepted))
}

/// Create (or keep) the pending contact request `from -> to` and mirror it
/// into the target's inbox. Caller must hold the project lock.
pub(crate) async fn upsert_contact_request(
    engine: &Engine,
    project: &Project,
    from: &Agent,
    to: &Agent,
    reason: &str,
) -> Result<ContactRequest> {
    if let Some(state) = contact_state(engine, project.id, from.id, to.id).await? {
        debug!(from = %from.name, to = %to.name, state = state.as_str(), "contact request already exists");
        return get_contact_request(engine, project, from, to).await.map(|mut cr| {
            cr.state = state;
            cr
        });
    }

    let now = now_ts();
    let db = engine.db();
    let stmt = db
        .prepare(
            r#"
        INSERT INTO contact_requests (project_id, from_agent_id, to_agent_id, reason, state, created_ts)
        VALUES (?, ?, ?, ?, 'pending', ?)
        RETURNING id
        "#,
        )
        .await?;
    let mut rows = stmt
        .query((project.id.get(), from.id.get(), to.id.get(), reason, fmt_ts(now)))
        .await?;
    let id = if let Some(row) = rows.next().await? {
        row.get::<i64>(0)?
    } else {
        return Err(crate::Error::InvalidArgument("failed to create contact request".into()));
    };

    let subject = format!("{} {} would like to contact you", CONTACT_REQUEST_MARKER, from.name);
    let body = format!(
        "Agent `{}` asked to open contact with you.\n\n> {}\n\nRespond with the `respond_contact` tool.",
        from.name, reason
    );
    MessageBmc::deliver_note_locked(engine, project, from, to, &subject, &body, "contact_request")
        .await?;

    Ok(ContactRequest {
        id,
        project_id: project.id,
        from_agent: from.name.clone(),
        to_agent: to.name.clone(),
        reason: reason.to_string(),
        state: LinkState::Pending,
        created_ts: now,
        decided_ts: None,
    })
}

async fn get_contact_request(
    engine: &Engine,
    project: &Project,
    from: &Agent,
    to: &Agent,
) -> Result<ContactRequest> {
    let db = engine.db();
    let stmt = db
        .prepare(
            r#"
        SELECT id, reason, state, created_ts, decided_ts
        FROM contact_requests WHERE project_id = ? AND from_agent_id = ? AND to_agent_id = ?
        "#,
        )
        .await?;
    let mut rows = stmt
        .query((project.id.get(), from.id.get(), to.id.get()))
        .await?;
    if let Some(row) = rows.next().await? {
        let state: String = row.get(2)?;
        let created_ts: String = row.get(3)?;
        let decided_ts: Option<String> = row.get(4)?;
        Ok(ContactRequest {
            id: row.get(0)?,
            project_id: project.id,
            from_agent: from.name.clone(),
            to_agent: to.name.clone(),
            reason: row.get(1)?,
            state: LinkState::parse(&state).unwrap_or(LinkState::Pending),
            created_ts: parse_ts(&created_ts),
            decided_ts: decided_ts.as_deref().map(parse_ts),
        })
    } else {
        Err(crate::Error::InvalidArgument(format!(
            "no contact request from {} to {}",
            from.name, to.name
        )))
    }
}

/// Tool entry: explicitly request contact inside one project.
pub async fn request_contact(
    engine: &Engine,
    project: &Project,
    from_name: &str,
    to_name: &str,
    reason: &str,
) -> Result<ContactRequest> {
    let _guard = engine.lock_project(&project.slug, Some(from_name.to_string())).await?;
    let from = AgentBmc::get_by_name(engine, project.id, from_name).await?;
    let to = AgentBmc::get_by_name(engine, project.id, to_name).await?;
    upsert_contact_request(engine, project, &from, &to, reason).await
}

/// Tool entry: the target decides on a pending contact request.
pub async fn respond_contact(
    engine: &Engine,
    project: &Project,
    responder_name: &str,
    from_name: &str,
    accept: bool,
) -> Result<ContactRequest> {
    let _guard = engine.lock_project(&project.slug, Some(responder_name.to_string())).await?;
    let responder = AgentBmc::get_by_name(engine, project.id, responder_name).await?;
    let from = AgentBmc::get_by_name(engine, project.id, from_name).await?;

    let state = if accept { LinkState::Accepted } else { LinkState::Blocked };
    let now = now_ts();
    let db = engine.db();
    let stmt = db
        .prepare(
            r#"
        UPDATE contact_requests SET state = ?, decided_ts = ?
        WHERE project_id = ? AND from_agent_id = ? AND to_agent_id = ?
        "#,
        )
        .await?;
    let updated = stmt
        .execute((
            state.as_str(),
            fmt_ts(now),
            project.id.get(),
            from.id.get(),
            responder.id.get(),
        ))
        .await?;
    if updated == 0 {
        return Err(crate::Error::InvalidArgument(format!(
            "no contact request from {} to {}",
            from_name, responder_name
        )));
    }
    AgentBmc::touch(engine, responder.id).await?;

    let mut request = get_contact_request(engine, project, &from, &responder).await?;
    request.state = state;
    request.decided_ts = Some(now);
    Ok(request)
}

/// Whether cross-project traffic is authorized: both directed rows accepted.
pub async fn link_accepted(
    engine: &Engine,
    from_project: ProjectId,
    from_agent: AgentId,
    to_project: ProjectId,
    to_agent: AgentId,
) -> Result<bool> {
    Ok(
        link_state(engine, from_project, from_agent, to_project, to_agent).await?
            == Some(LinkState::Accepted)
            && link_state(engine, to_project, to_agent, from_project, from_agent).await?
                == Some(LinkState::Accepted),
    )
}

async fn link_state(
    engine: &Engine,
    from_project: ProjectId,
    from_agent: AgentId,
    to_project: ProjectId,
    to_agent: AgentId,
) -> Result<Option<LinkState>> {
    let db = engine.db();
    let stmt = db
        .prepare(
            r#"
        SELECT state FROM agent_links
        WHERE from_project_id = ? AND from_agent_id = ? AND to_project_id = ? AND to_agent_id = ?
        "#,
        )
        .await?;
    let mut rows = stmt
        .query((from_project.get(), from_agent.get(), to_project.get(), to_agent.get()))
        .await?;
    if let Some(row) = rows.next().await? {
        let state: String = row.get(0)?;
        Ok(LinkState::parse(&state))
    } else {
        Ok(None)
    }
}

/// Insert the directed pending row if no row exists yet.
pub(crate) async fn create_pending_link(
    engine: &Engine,
    from_project: ProjectId,
    from_agent: AgentId,
    to_project: ProjectId,
    to_agent: AgentId,
) -> Result<()> {
    if link_state(engine, from_project, from_agent, to_project, to_agent).await?.is_some() {
        return Ok(());
    }
    let db = engine.db();
    let stmt = db
        .prepare(
            r#"
        INSERT INTO agent_links (from_project_id, from_agent_id, to_project_id, to_agent_id, state, created_ts)
        VALUES (?, ?, ?, ?, 'pending', ?)
        "#,
        )
        .await?;
    stmt.execute((
        from_project.get(),
        from_agent.get(),
        to_project.get(),
        to_agent.get(),
        fmt_ts(now_ts()),
    ))
    .await?;
    Ok(())
}

/// Tool entry: request a cross-project link.
pub async fn request_link(
    engine: &Engine,
    from_project: &Project,
    from_name: &str,
    to_project_key: &str,
    to_name: &str,
) -> Result<AgentLink> {
    let _guard = engine
        .lock_project(&from_project.slug, Some(from_name.to_string()))
        .await?;
    let from = AgentBmc::get_by_name(engine, from_project.id, from_name).await?;
    let to_project = ProjectBmc::resolve(engine, to_project_key).await?;
    let to = AgentBmc::get_by_name(engine, to_project.id, to_name).await?;

    create_pending_link(engine, from_project.id, from.id, to_project.id, to.id).await?;
    get_link(engine, from_project.id, from.id, to_project.id, to.id).await
}

/// Tool entry: the target of a pending link accepts or blocks it.
///
/// Accepting also upserts the reverse direction as accepted, which is what
/// actually opens traffic (both directions must agree).
pub async fn respond_link(
    engine: &Engine,
    to_project: &Project,
    to_name: &str,
    from_project_key: &str,
    from_name: &str,
    accept: bool,
) -> Result<AgentLink> {
    let _guard = engine.lock_project(&to_project.slug, Some(to_name.to_string())).await?;
    let to = AgentBmc::get_by_name(engine, to_project.id, to_name).await?;
    let from_project = ProjectBmc::resolve(engine, from_project_key).await?;
    let from = AgentBmc::get_by_name(engine, from_project.id, from_name).await?;

    let state = if accept { LinkState::Accepted } else { LinkState::Blocked };
    let now = now_ts();
    let db = engine.db();
    let stmt = db
        .prepare(
            r#"
        UPDATE agent_links SET state = ?, decided_ts = ?
        WHERE from_project_id = ? AND from_agent_id = ? AND to_project_id = ? AND to_agent_id = ?
        "#,
        )
        .await?;
    let updated = stmt
        .execute((
            state.as_str(),
            fmt_ts(now),
            from_project.id.get(),
            from.id.get(),
            to_project.id.get(),
            to.id.get(),
        ))
        .await?;
    if updated == 0 {
        return Err(crate::Error::InvalidArgument(format!(
            "no pending link from {}:{} to {}:{}",
            from_project.slug, from_name, to_project.slug, to_name
        )));
    }

    if accept {
        // Reverse direction: create or accept.
        create_pending_link(engine, to_project.id, to.id, from_project.id, from.id).await?;
        let stmt = db
            .prepare(
                r#"
            UPDATE agent_links SET state = 'accepted', decided_ts = ?
            WHERE from_project_id = ? AND from_agent_id = ? AND to_project_id = ? AND to_agent_id = ?
            "#,
            )
            .await?;
        stmt.execute((
            fmt_ts(now),
            to_project.id.get(),
            to.id.get(),
            from_project.id.get(),
            from.id.get(),
        ))
        .await?;
    }

    get_link(engine, from_project.id, from.id, to_project.id, to.id).await
}

async fn get_link(
    engine: &Engine,
    from_project: ProjectId,
    from_agent: AgentId,
    to_project: ProjectId,
    to_agent: AgentId,
) -> Result<AgentLink> {
    let db = engine.db();
    let stmt = db
        .prepare(
            r#"
        SELECT id, state, created_ts, decided_ts FROM agent_links
        WHERE from_project_id = ? AND from_agent_id = ? AND to_project_id = ? AND to_agent_id = ?
        "#,
        )
        .await?;
    let mut rows = stmt
        .query((from_project.get(), from_agent.get(), to_project.get(), to_agent.get()))
        .await?;
    if let Some(row) = rows.next().await? {
        let state: String = row.get(1)?;
        let created_ts: String = row.get(2)?;
        let decided_ts: Option<String> = row.get(3)?;
        Ok(AgentLink {
            id: row.get(0)?,
            from_project_id: from_project,
            from_agent_id: from_agent,
            to_project_id: to_project,
            to_agent_id: to_agent,
            state: LinkState::parse(&state).unwrap_or(LinkState::Pending),
            created_ts: parse_ts(&created_ts),
            decided_ts: decided_ts.as_deref().map(parse_ts),
        })
    } else {
        Err(crate::Error::InvalidArgument("agent link not found".into()))
    }
}
