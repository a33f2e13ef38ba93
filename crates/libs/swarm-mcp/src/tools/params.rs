//! Tool parameter types.
//!
//! Every struct derives `JsonSchema`; the doc comments become the parameter
//! descriptions agents see in `tools/list`. `project_key` accepts either a
//! slug or the original human key.

use schemars::JsonSchema;
use serde::Deserialize;

#[derive(Debug, Deserialize, JsonSchema)]
pub struct EnsureProjectParams {
    /// Project human key: an absolute path or repository URL
    pub human_key: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RegisterAgentParams {
    /// Project slug or human key
    pub project_key: String,
    /// Agent runtime program (e.g. "claude-code", "aider")
    pub program: String,
    /// Model identifier the agent runs on
    pub model: String,
    /// Explicit agent name; omit to have one generated
    #[serde(alias = "agent_name")]
    pub name: Option<String>,
    /// Hint for the name generator (used only when `name` is omitted)
    pub name_hint: Option<String>,
    /// What this agent is working on
    #[serde(default)]
    pub task_description: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct WhoisParams {
    /// Project slug or human key
    pub project_key: String,
    /// Agent name to look up
    pub agent_name: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ListAgentsParams {
    /// Project slug or human key
    pub project_key: String,
    /// Restrict to agents active in the last 7 days
    pub active_only: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetContactPolicyParams {
    /// Project slug or human key
    pub project_key: String,
    /// Agent whose policy changes
    pub agent_name: String,
    /// One of: open, auto, contacts_only, block_all
    pub policy: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SendMessageParams {
    /// Project slug or human key
    pub project_key: String,
    /// Sending agent's name
    pub sender_name: String,
    /// Primary recipients; address another project's agent as "slug:Name"
    pub to: Vec<String>,
    /// Carbon-copy recipients
    pub cc: Option<Vec<String>>,
    /// Blind-copy recipients (never shown in the canonical frontmatter)
    pub bcc: Option<Vec<String>>,
    /// Message subject
    pub subject: String,
    /// Message body, GitHub-flavored markdown
    pub body_md: String,
    /// One of: low, normal, high, urgent (default normal)
    pub importance: Option<String>,
    /// Whether recipients must acknowledge
    pub ack_required: Option<bool>,
    /// Thread to append to; omitted starts a new thread
    pub thread_id: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReplyMessageParams {
    /// Project slug or human key
    pub project_key: String,
    /// Message id being replied to
    pub message_id: String,
    /// Replying agent's name
    pub sender_name: String,
    /// Reply body, markdown
    pub body_md: String,
    /// Override the inherited importance
    pub importance: Option<String>,
    /// Override the inherited ack requirement
    pub ack_required: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FetchInboxParams {
    /// Project slug or human key
    pub project_key: String,
    /// Agent whose inbox to read
    pub agent_name: String,
    /// Only messages created after this timestamp (YYYY-MM-DD HH:MM:SS)
    pub since_ts: Option<String>,
    /// Only high/urgent messages
    pub urgent_only: Option<bool>,
    /// Include full message bodies
    pub include_bodies: Option<bool>,
    /// Maximum messages to return (default 20)
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FetchOutboxParams {
    /// Project slug or human key
    pub project_key: String,
    /// Agent whose sent mail to read
    pub agent_name: String,
    /// Include full message bodies
    pub include_bodies: Option<bool>,
    /// Maximum messages to return (default 20)
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct GetMessageParams {
    /// Project slug or human key
    pub project_key: String,
    /// Message id
    pub message_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MarkReadParams {
    /// Project slug or human key
    pub project_key: String,
    /// Recipient recording the read
    pub agent_name: String,
    /// Message id
    pub message_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct AcknowledgeMessageParams {
    /// Project slug or human key
    pub project_key: String,
    /// Recipient acknowledging
    pub agent_name: String,
    /// Message id
    pub message_id: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SearchMessagesParams {
    /// Project slug or human key
    pub project_key: String,
    /// Full-text query; supports phrases, prefix `*`, AND/OR/NOT
    pub query: String,
    /// Maximum results (default 20)
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct SummarizeThreadParams {
    /// Project slug or human key
    pub project_key: String,
    /// Thread id to summarize
    pub thread_id: String,
    /// Include example message excerpts
    pub include_examples: Option<bool>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReserveFilePathsParams {
    /// Project slug or human key
    pub project_key: String,
    /// Agent taking the lease
    pub agent_name: String,
    /// Project-relative paths or globs to reserve
    pub paths: Vec<String>,
    /// Lease duration in seconds (default 3600, floor 60)
    pub ttl_seconds: Option<i64>,
    /// Exclusive lease (default true)
    pub exclusive: Option<bool>,
    /// Why the paths are needed
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RenewFileReservationsParams {
    /// Project slug or human key
    pub project_key: String,
    /// Agent renewing
    pub agent_name: String,
    /// Seconds to add to each lease's expiry
    pub extend_seconds: i64,
    /// Restrict renewal to these paths (default: all active leases)
    pub paths: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct ReleaseFileReservationsParams {
    /// Project slug or human key
    pub project_key: String,
    /// Agent releasing
    pub agent_name: String,
    /// Restrict release to these paths (default: all active leases)
    pub paths: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RequestContactParams {
    /// Project slug or human key
    pub project_key: String,
    /// Requesting agent
    pub from_agent: String,
    /// Target agent
    pub to_agent: String,
    /// Why contact is wanted
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RespondContactParams {
    /// Project slug or human key
    pub project_key: String,
    /// Responding agent (the target of the request)
    pub agent_name: String,
    /// The agent that asked for contact
    pub from_agent: String,
    /// Accept (true) or block (false)
    pub accept: bool,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RequestLinkParams {
    /// Requesting agent's project (slug or human key)
    pub project_key: String,
    /// Requesting agent
    pub agent_name: String,
    /// Target project (slug or human key)
    pub to_project_key: String,
    /// Target agent
    pub to_agent: String,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct RespondLinkParams {
    /// Responding agent's project (slug or human key)
    pub project_key: String,
    /// Responding agent (the target of the link request)
    pub agent_name: String,
    /// Project the request came from
    pub from_project_key: String,
    /// Agent the request came from
    pub from_agent: String,
    /// Accept (true) or block (false)
    pub accept: bool,
}

fn default_reservation_ttl() -> i64 {
    3600
}

fn default_inbox_limit() -> i64 {
    10
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MacroStartSessionParams {
    /// Project human key (created on first use)
    pub human_key: String,
    /// Agent runtime program
    pub program: String,
    /// Model identifier
    pub model: String,
    /// What this agent is working on
    #[serde(default)]
    pub task_description: String,
    /// Explicit agent name (auto-generated when omitted)
    pub agent_name: Option<String>,
    /// Hint for the name generator
    pub name_hint: Option<String>,
    /// Paths to reserve as part of session start
    pub file_reservation_paths: Option<Vec<String>>,
    /// TTL for those reservations in seconds
    #[serde(default = "default_reservation_ttl")]
    pub file_reservation_ttl_seconds: i64,
    /// Inbox messages to fetch
    #[serde(default = "default_inbox_limit")]
    pub inbox_limit: i64,
}

#[derive(Debug, Deserialize, JsonSchema)]
pub struct MacroPrepareThreadParams {
    /// Project slug or human key
    pub project_key: String,
    /// Thread to prepare for
    pub thread_id: String,
    /// Agent runtime program
    pub program: String,
    /// Model identifier
    pub model: String,
    /// Explicit agent name (auto-generated when omitted)
    pub agent_name: Option<String>,
    /// What this agent is working on
    #[serde(default)]
    pub task_description: String,
    /// Include example excerpts in the thread summary
    #[serde(default = "default_true")]
    pub include_examples: bool,
    /// Inbox messages to fetch
    #[serde(default = "default_inbox_limit")]
    pub inbox_limit: i64,
}
