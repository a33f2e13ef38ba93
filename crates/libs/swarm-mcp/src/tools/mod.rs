//! MCP tools over the coordination engine.
//!
//! One `#[tool]` method per operation of the engine's public surface; the
//! router is generated by `#[tool_router]`. Legacy tool names arriving from
//! older agent harnesses are resolved as aliases inside `call_tool`.

use rmcp::{
    ErrorData as McpError,
    handler::server::{ServerHandler, tool::ToolRouter, wrapper::Parameters},
    model::{
        CallToolRequestParam, CallToolResult, ListResourcesResult, ListToolsResult,
        PaginatedRequestParam, RawResource, ReadResourceRequestParam, ReadResourceResult, Resource,
        ResourceContents,
    },
    service::{RequestContext, RoleServer},
    tool, tool_router,
};
use std::sync::Arc;
use swarm_core::Engine;
use swarm_core::model::{
    agent::{AgentBmc, AgentForRegister},
    claim::ClaimBmc,
    message::{InboxQuery, MessageBmc, MessageForSend},
    policy,
    project::ProjectBmc,
    summary,
};
use swarm_core::types::ContactPolicy;

pub mod helpers;
mod params;

pub use params::*;

use helpers::{json_result, parse_importance, resolve_project, to_mcp_error};

/// Aliases kept for agents integrated against earlier revisions of the
/// tool surface.
const TOOL_ALIASES: &[(&str, &str)] = &[
    ("check_my_messages", "fetch_inbox"),
    ("check_inbox", "fetch_inbox"),
    ("file_reservation_paths", "reserve_file_paths"),
];

/// Canonical name for a possibly-aliased tool name.
pub fn resolve_tool_alias(name: &str) -> Option<&'static str> {
    TOOL_ALIASES
        .iter()
        .find(|(alias, _)| *alias == name)
        .map(|(_, canonical)| *canonical)
}

#[derive(Clone)]
pub struct CoordService {
    engine: Arc<Engine>,
    tool_router: ToolRouter<Self>,
}

impl CoordService {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self { engine, tool_router: Self::tool_router() }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    fn parse_since(raw: Option<&str>) -> Result<Option<chrono::NaiveDateTime>, McpError> {
        match raw {
            None => Ok(None),
            Some(s) => chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.6f")
                .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
                .map(Some)
                .map_err(|_| {
                    McpError::invalid_params(
                        format!(
                            "[INVALID_ARGUMENT] since_ts must be YYYY-MM-DD HH:MM:SS, got '{}'",
                            s
                        ),
                        None,
                    )
                }),
        }
    }

    async fn fetch_inbox_json(
        &self,
        project_key: &str,
        agent_name: &str,
        query: &InboxQuery,
    ) -> Result<serde_json::Value, McpError> {
        let project = resolve_project(&self.engine, project_key).await?;
        let items = MessageBmc::fetch_inbox(&self.engine, &project, agent_name, query)
            .await
            .map_err(to_mcp_error)?;
        serde_json::to_value(&items).map_err(|e| McpError::internal_error(e.to_string(), None))
    }
}

#[tool_router]
impl CoordService {
    #[tool(
        description = "Create or fetch the project for a human key (absolute path or repo URL). Idempotent; the slug is stable forever."
    )]
    async fn ensure_project(
        &self,
        params: Parameters<EnsureProjectParams>,
    ) -> Result<CallToolResult, McpError> {
        let project = ProjectBmc::ensure(&self.engine, &params.0.human_key)
            .await
            .map_err(to_mcp_error)?;
        json_result(&project)
    }

    #[tool(
        description = "Register an agent in a project, or refresh its program/model/task if the name already exists."
    )]
    async fn register_agent(
        &self,
        params: Parameters<RegisterAgentParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let project = resolve_project(&self.engine, &p.project_key).await?;

        let name = match p.name {
            Some(name) => Some(name),
            None => Some(
                AgentBmc::pick_name(&self.engine, project.id, p.name_hint.as_deref())
                    .await
                    .map_err(to_mcp_error)?,
            ),
        };

        let agent = AgentBmc::register(
            &self.engine,
            &project,
            AgentForRegister {
                program: p.program,
                model: p.model,
                name,
                task_description: p.task_description,
            },
        )
        .await
        .map_err(to_mcp_error)?;
        json_result(&agent)
    }

    #[tool(description = "Look up an agent's profile: program, model, task, policy, activity.")]
    async fn whois(&self, params: Parameters<WhoisParams>) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let project = resolve_project(&self.engine, &p.project_key).await?;
        let agent = AgentBmc::get_by_name(&self.engine, project.id, &p.agent_name)
            .await
            .map_err(to_mcp_error)?;
        json_result(&agent)
    }

    #[tool(description = "List a project's agents; active_only restricts to the last 7 days.")]
    async fn list_agents(
        &self,
        params: Parameters<ListAgentsParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let project = resolve_project(&self.engine, &p.project_key).await?;
        let agents = AgentBmc::list(&self.engine, project.id, p.active_only.unwrap_or(false))
            .await
            .map_err(to_mcp_error)?;
        json_result(&agents)
    }

    #[tool(description = "Set an agent's contact policy: open, auto, contacts_only or block_all.")]
    async fn set_contact_policy(
        &self,
        params: Parameters<SetContactPolicyParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let policy = ContactPolicy::parse(&p.policy).ok_or_else(|| {
            McpError::invalid_params(
                format!(
                    "[INVALID_ARGUMENT] policy must be one of open|auto|contacts_only|block_all, got '{}'",
                    p.policy
                ),
                None,
            )
        })?;
        let project = resolve_project(&self.engine, &p.project_key).await?;
        let agent = AgentBmc::set_contact_policy(&self.engine, &project, &p.agent_name, policy)
            .await
            .map_err(to_mcp_error)?;
        json_result(&agent)
    }

    #[tool(
        description = "Send a markdown message to one or more agents. Address another project's agent as \"slug:Name\" (requires an accepted link)."
    )]
    async fn send_message(
        &self,
        params: Parameters<SendMessageParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let importance = parse_importance(p.importance.as_deref())?.unwrap_or_default();
        let project = resolve_project(&self.engine, &p.project_key).await?;
        let receipt = MessageBmc::send(
            &self.engine,
            &project,
            MessageForSend {
                sender_name: p.sender_name,
                to: p.to,
                cc: p.cc.unwrap_or_default(),
                bcc: p.bcc.unwrap_or_default(),
                subject: p.subject,
                body_md: p.body_md,
                importance,
                ack_required: p.ack_required.unwrap_or(false),
                thread_id: p.thread_id,
            },
        )
        .await
        .map_err(to_mcp_error)?;
        json_result(&receipt)
    }

    #[tool(
        description = "Reply within a thread: recipients are the original sender plus its to-list, subject gains a Re: prefix, importance/ack are inherited unless overridden."
    )]
    async fn reply_message(
        &self,
        params: Parameters<ReplyMessageParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let importance = parse_importance(p.importance.as_deref())?;
        let project = resolve_project(&self.engine, &p.project_key).await?;
        let receipt = MessageBmc::reply(
            &self.engine,
            &project,
            &p.message_id,
            &p.sender_name,
            p.body_md,
            importance,
            p.ack_required,
        )
        .await
        .map_err(to_mcp_error)?;
        json_result(&receipt)
    }

    #[tool(
        description = "Poll an agent's inbox, newest first. Supports since_ts, urgent_only and include_bodies; refreshes the agent's activity clock."
    )]
    async fn fetch_inbox(
        &self,
        params: Parameters<FetchInboxParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let query = InboxQuery {
            since_ts: Self::parse_since(p.since_ts.as_deref())?,
            urgent_only: p.urgent_only.unwrap_or(false),
            include_bodies: p.include_bodies.unwrap_or(false),
            limit: p.limit,
        };
        let items = self.fetch_inbox_json(&p.project_key, &p.agent_name, &query).await?;
        json_result(&items)
    }

    #[tool(description = "List the messages an agent has sent in a project, newest first.")]
    async fn fetch_outbox(
        &self,
        params: Parameters<FetchOutboxParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let project = resolve_project(&self.engine, &p.project_key).await?;
        let items = MessageBmc::fetch_outbox(
            &self.engine,
            &project,
            &p.agent_name,
            p.limit.unwrap_or(20),
            p.include_bodies.unwrap_or(false),
        )
        .await
        .map_err(to_mcp_error)?;
        json_result(&items)
    }

    #[tool(description = "Fetch one message with full body and recipient states.")]
    async fn get_message(
        &self,
        params: Parameters<GetMessageParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let message = MessageBmc::get(&self.engine, &p.message_id).await.map_err(to_mcp_error)?;
        let recipients =
            MessageBmc::recipients(&self.engine, &p.message_id).await.map_err(to_mcp_error)?;
        json_result(&serde_json::json!({ "message": message, "recipients": recipients }))
    }

    #[tool(description = "Record that an agent has read a message.")]
    async fn mark_read(
        &self,
        params: Parameters<MarkReadParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let project = resolve_project(&self.engine, &p.project_key).await?;
        let updated = MessageBmc::mark_read(&self.engine, &project, &p.agent_name, &p.message_id)
            .await
            .map_err(to_mcp_error)?;
        json_result(&serde_json::json!({ "message_id": p.message_id, "updated": updated }))
    }

    #[tool(description = "Acknowledge a message (also marks it read). Idempotent.")]
    async fn acknowledge_message(
        &self,
        params: Parameters<AcknowledgeMessageParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let project = resolve_project(&self.engine, &p.project_key).await?;
        let (acknowledged_at, updated) =
            MessageBmc::acknowledge(&self.engine, &project, &p.agent_name, &p.message_id)
                .await
                .map_err(to_mcp_error)?;
        json_result(&serde_json::json!({
            "acknowledged_at": swarm_core::types::fmt_ts(acknowledged_at),
            "updated": updated,
        }))
    }

    #[tool(
        description = "Full-text search over message subjects and bodies. Grammar: bare tokens, \"exact phrases\", prefix*, AND/OR/NOT."
    )]
    async fn search_messages(
        &self,
        params: Parameters<SearchMessagesParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let project = resolve_project(&self.engine, &p.project_key).await?;
        let items = MessageBmc::search(&self.engine, project.id, &p.query, p.limit.unwrap_or(20))
            .await
            .map_err(to_mcp_error)?;
        json_result(&items)
    }

    #[tool(
        description = "Summarize a thread: participants, counts, time span, key points and action items (deterministic fallback when no LLM is configured)."
    )]
    async fn summarize_thread(
        &self,
        params: Parameters<SummarizeThreadParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let project = resolve_project(&self.engine, &p.project_key).await?;
        let digest = summary::summarize_thread(
            &self.engine,
            &project,
            &p.thread_id,
            p.include_examples.unwrap_or(false),
        )
        .await
        .map_err(to_mcp_error)?;
        json_result(&digest)
    }

    #[tool(
        description = "Reserve file paths (literals or globs) for an agent. Conflicting paths are reported with their holders; the rest are granted."
    )]
    async fn reserve_file_paths(
        &self,
        params: Parameters<ReserveFilePathsParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let project = resolve_project(&self.engine, &p.project_key).await?;
        let outcome = ClaimBmc::reserve(
            &self.engine,
            &project,
            &p.agent_name,
            &p.paths,
            p.ttl_seconds,
            p.exclusive.unwrap_or(true),
            p.reason.as_deref().unwrap_or(""),
        )
        .await
        .map_err(to_mcp_error)?;
        json_result(&outcome)
    }

    #[tool(description = "Extend the expiry of an agent's active reservations. Never shortens.")]
    async fn renew_file_reservations(
        &self,
        params: Parameters<RenewFileReservationsParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let project = resolve_project(&self.engine, &p.project_key).await?;
        let outcome = ClaimBmc::renew(
            &self.engine,
            &project,
            &p.agent_name,
            p.extend_seconds,
            p.paths.as_deref(),
        )
        .await
        .map_err(to_mcp_error)?;
        json_result(&outcome)
    }

    #[tool(description = "Release an agent's active reservations (all, or just the named paths).")]
    async fn release_file_reservations(
        &self,
        params: Parameters<ReleaseFileReservationsParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let project = resolve_project(&self.engine, &p.project_key).await?;
        let outcome =
            ClaimBmc::release(&self.engine, &project, &p.agent_name, p.paths.as_deref())
                .await
                .map_err(to_mcp_error)?;
        json_result(&outcome)
    }

    #[tool(
        description = "Ask another agent in the same project to accept contact; a marked note lands in their inbox."
    )]
    async fn request_contact(
        &self,
        params: Parameters<RequestContactParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let project = resolve_project(&self.engine, &p.project_key).await?;
        let request =
            policy::request_contact(&self.engine, &project, &p.from_agent, &p.to_agent, &p.reason)
                .await
                .map_err(to_mcp_error)?;
        json_result(&request)
    }

    #[tool(description = "Accept or block a pending contact request addressed to you.")]
    async fn respond_contact(
        &self,
        params: Parameters<RespondContactParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let project = resolve_project(&self.engine, &p.project_key).await?;
        let request = policy::respond_contact(
            &self.engine,
            &project,
            &p.agent_name,
            &p.from_agent,
            p.accept,
        )
        .await
        .map_err(to_mcp_error)?;
        json_result(&request)
    }

    #[tool(
        description = "Request a cross-project link to an agent in another project. Traffic opens once both directions are accepted."
    )]
    async fn request_link(
        &self,
        params: Parameters<RequestLinkParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let project = resolve_project(&self.engine, &p.project_key).await?;
        let link = policy::request_link(
            &self.engine,
            &project,
            &p.agent_name,
            &p.to_project_key,
            &p.to_agent,
        )
        .await
        .map_err(to_mcp_error)?;
        json_result(&link)
    }

    #[tool(description = "Accept or block a pending cross-project link addressed to you.")]
    async fn respond_link(
        &self,
        params: Parameters<RespondLinkParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let project = resolve_project(&self.engine, &p.project_key).await?;
        let link = policy::respond_link(
            &self.engine,
            &project,
            &p.agent_name,
            &p.from_project_key,
            &p.from_agent,
            p.accept,
        )
        .await
        .map_err(to_mcp_error)?;
        json_result(&link)
    }

    #[tool(
        description = "Session bootstrap macro: ensure the project, register the agent, optionally reserve files, and return the fresh inbox in one call."
    )]
    async fn macro_start_session(
        &self,
        params: Parameters<MacroStartSessionParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let project =
            ProjectBmc::ensure(&self.engine, &p.human_key).await.map_err(to_mcp_error)?;

        let name = match p.agent_name {
            Some(name) => Some(name),
            None => Some(
                AgentBmc::pick_name(&self.engine, project.id, p.name_hint.as_deref())
                    .await
                    .map_err(to_mcp_error)?,
            ),
        };
        let agent = AgentBmc::register(
            &self.engine,
            &project,
            AgentForRegister {
                program: p.program,
                model: p.model,
                name,
                task_description: p.task_description,
            },
        )
        .await
        .map_err(to_mcp_error)?;

        let reservations = match &p.file_reservation_paths {
            Some(paths) if !paths.is_empty() => Some(
                ClaimBmc::reserve(
                    &self.engine,
                    &project,
                    &agent.name,
                    paths,
                    Some(p.file_reservation_ttl_seconds),
                    true,
                    "session start",
                )
                .await
                .map_err(to_mcp_error)?,
            ),
            _ => None,
        };

        let inbox = MessageBmc::fetch_inbox(
            &self.engine,
            &project,
            &agent.name,
            &InboxQuery { limit: Some(p.inbox_limit), ..InboxQuery::default() },
        )
        .await
        .map_err(to_mcp_error)?;

        json_result(&serde_json::json!({
            "project": project,
            "agent": agent,
            "reservations": reservations,
            "inbox": inbox,
        }))
    }

    #[tool(
        description = "Thread pickup macro: register (or refresh) the agent, summarize the thread, and return the fresh inbox in one call."
    )]
    async fn macro_prepare_thread(
        &self,
        params: Parameters<MacroPrepareThreadParams>,
    ) -> Result<CallToolResult, McpError> {
        let p = params.0;
        let project = resolve_project(&self.engine, &p.project_key).await?;

        let name = match p.agent_name {
            Some(name) => Some(name),
            None => Some(
                AgentBmc::pick_name(&self.engine, project.id, None)
                    .await
                    .map_err(to_mcp_error)?,
            ),
        };
        let agent = AgentBmc::register(
            &self.engine,
            &project,
            AgentForRegister {
                program: p.program,
                model: p.model,
                name,
                task_description: p.task_description,
            },
        )
        .await
        .map_err(to_mcp_error)?;

        let thread = summary::summarize_thread(
            &self.engine,
            &project,
            &p.thread_id,
            p.include_examples,
        )
        .await
        .map_err(to_mcp_error)?;

        let inbox = MessageBmc::fetch_inbox(
            &self.engine,
            &project,
            &agent.name,
            &InboxQuery { limit: Some(p.inbox_limit), ..InboxQuery::default() },
        )
        .await
        .map_err(to_mcp_error)?;

        json_result(&serde_json::json!({
            "project": project,
            "agent": agent,
            "thread": thread,
            "inbox": inbox,
        }))
    }
}

#[allow(clippy::manual_async_fn)]
impl ServerHandler for CoordService {
    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        async move {
            Ok(ListToolsResult {
                tools: self.tool_router.list_all(),
                next_cursor: None,
                meta: None,
            })
        }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParam,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        async move {
            let start = std::time::Instant::now();
            let original_name = request.name.clone();

            let request = match resolve_tool_alias(&original_name) {
                Some(canonical) => {
                    tracing::debug!(original = %original_name, resolved = %canonical, "resolved tool alias");
                    CallToolRequestParam { name: canonical.into(), arguments: request.arguments }
                }
                None => request,
            };
            let tool_name = request.name.clone();

            let tool_context =
                rmcp::handler::server::tool::ToolCallContext::new(self, request, context);
            let result = self.tool_router.call(tool_context).await;

            let status = if result.is_ok() { "success" } else { "error" };
            metrics::counter!(
                "mcp_tool_calls_total",
                "tool" => tool_name.to_string(),
                "status" => status,
            )
            .increment(1);
            metrics::histogram!("mcp_tool_duration_seconds", "tool" => tool_name.to_string())
                .record(start.elapsed().as_secs_f64());

            result
        }
    }

    fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListResourcesResult, McpError>> + Send + '_ {
        async move { self.list_resources_impl().await }
    }

    fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ReadResourceResult, McpError>> + Send + '_ {
        self.read_resource_impl(request)
    }
}

impl CoordService {
    fn resource(uri: String, name: String, description: String) -> Resource {
        Resource {
            raw: RawResource {
                uri,
                name,
                description: Some(description),
                mime_type: Some("application/json".to_string()),
                size: None,
                icons: None,
                meta: None,
                title: None,
            },
            annotations: None,
        }
    }

    pub async fn list_resources_impl(&self) -> Result<ListResourcesResult, McpError> {
        let projects = ProjectBmc::list_all(&self.engine).await.map_err(to_mcp_error)?;

        let mut resources = vec![Self::resource(
            "resource://projects".into(),
            "Projects".into(),
            "All projects known to this server".into(),
        )];

        for project in &projects {
            let slug = &project.slug;
            resources.push(Self::resource(
                format!("resource://project/{}", slug),
                format!("Project {}", slug),
                format!("Identity record of project '{}'", project.human_key),
            ));
            resources.push(Self::resource(
                format!("resource://agents/{}", slug),
                format!("Agents ({})", slug),
                format!("Registered agents of project '{}'", slug),
            ));
            resources.push(Self::resource(
                format!("resource://claims/{}?active_only=true", slug),
                format!("Claims ({})", slug),
                format!("Active file reservations of project '{}'", slug),
            ));

            let agents = AgentBmc::list(&self.engine, project.id, false)
                .await
                .map_err(to_mcp_error)?;
            for agent in agents {
                resources.push(Self::resource(
                    format!("resource://inbox/{}/{}", slug, agent.name),
                    format!("Inbox: {} ({})", agent.name, slug),
                    format!("Inbox of agent '{}'", agent.name),
                ));
                resources.push(Self::resource(
                    format!("resource://outbox/{}/{}", slug, agent.name),
                    format!("Outbox: {} ({})", agent.name, slug),
                    format!("Sent mail of agent '{}'", agent.name),
                ));
            }
        }

        Ok(ListResourcesResult { resources, next_cursor: None, meta: None })
    }

    pub async fn read_resource_impl(
        &self,
        request: ReadResourceRequestParam,
    ) -> Result<ReadResourceResult, McpError> {
        let uri_str = request.uri;
        let uri = url::Url::parse(&uri_str)
            .map_err(|e| McpError::invalid_params(format!("Invalid URI: {}", e), None))?;
        if uri.scheme() != "resource" {
            return Err(McpError::invalid_params(
                "URI scheme must be 'resource'".to_string(),
                None,
            ));
        }

        let resource_type = uri
            .host_str()
            .ok_or_else(|| McpError::invalid_params("URI missing resource type".to_string(), None))?;
        let segments: Vec<String> = uri
            .path_segments()
            .map(|s| s.map(str::to_string).collect())
            .unwrap_or_default();
        let query: std::collections::HashMap<String, String> =
            uri.query_pairs().into_owned().collect();

        let content = match resource_type {
            "projects" => {
                let projects = ProjectBmc::list_all(&self.engine).await.map_err(to_mcp_error)?;
                serde_json::to_value(&projects)
            }
            "project" => {
                let key = segments
                    .first()
                    .ok_or_else(|| McpError::invalid_params("Missing project key".to_string(), None))?;
                let project = resolve_project(&self.engine, key).await?;
                serde_json::to_value(&project)
            }
            "agents" => {
                let key = segments
                    .first()
                    .ok_or_else(|| McpError::invalid_params("Missing project key".to_string(), None))?;
                let project = resolve_project(&self.engine, key).await?;
                let agents = AgentBmc::list(&self.engine, project.id, false)
                    .await
                    .map_err(to_mcp_error)?;
                serde_json::to_value(&agents)
            }
            "inbox" | "outbox" => {
                let (Some(key), Some(agent_name)) = (segments.first(), segments.get(1)) else {
                    return Err(McpError::invalid_params(
                        "Expected resource://inbox/{project}/{agent}".to_string(),
                        None,
                    ));
                };
                let include_bodies =
                    query.get("include_bodies").map(|v| v == "true" || v == "1").unwrap_or(false);
                let limit = query.get("limit").and_then(|l| l.parse::<i64>().ok()).unwrap_or(20);
                let project = resolve_project(&self.engine, key).await?;
                if resource_type == "inbox" {
                    let items = MessageBmc::fetch_inbox(
                        &self.engine,
                        &project,
                        agent_name,
                        &InboxQuery {
                            include_bodies,
                            limit: Some(limit),
                            ..InboxQuery::default()
                        },
                    )
                    .await
                    .map_err(to_mcp_error)?;
                    serde_json::to_value(&items)
                } else {
                    let items = MessageBmc::fetch_outbox(
                        &self.engine,
                        &project,
                        agent_name,
                        limit,
                        include_bodies,
                    )
                    .await
                    .map_err(to_mcp_error)?;
                    serde_json::to_value(&items)
                }
            }
            "message" => {
                let id = segments
                    .first()
                    .ok_or_else(|| McpError::invalid_params("Missing message id".to_string(), None))?;
                let message = MessageBmc::get(&self.engine, id).await.map_err(to_mcp_error)?;
                let recipients =
                    MessageBmc::recipients(&self.engine, id).await.map_err(to_mcp_error)?;
                serde_json::to_value(&serde_json::json!({
                    "message": message,
                    "recipients": recipients,
                }))
            }
            "claims" => {
                let key = segments
                    .first()
                    .ok_or_else(|| McpError::invalid_params("Missing project key".to_string(), None))?;
                let active_only =
                    query.get("active_only").map(|v| v == "true" || v == "1").unwrap_or(true);
                let project = resolve_project(&self.engine, key).await?;
                let claims = if active_only {
                    ClaimBmc::list_active(&self.engine, project.id).await.map_err(to_mcp_error)?
                } else {
                    ClaimBmc::list_all(&self.engine, project.id).await.map_err(to_mcp_error)?
                };
                serde_json::to_value(&claims)
            }
            other => {
                return Err(McpError::invalid_params(
                    format!("Unknown resource type: {}", other),
                    None,
                ));
            }
        }
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;

        Ok(ReadResourceResult {
            contents: vec![ResourceContents::TextResourceContents {
                uri: uri_str,
                mime_type: Some("application/json".to_string()),
                text: serde_json::to_string_pretty(&content)
                    .map_err(|e| McpError::internal_error(e.to_string(), None))?,
                meta: None,
            }],
        })
    }
}
