//! Shared plumbing for tool implementations.

use rmcp::ErrorData as McpError;
use rmcp::model::{CallToolResult, Content};
use serde::Serialize;
use swarm_core::Engine;
use swarm_core::model::project::{Project, ProjectBmc};

/// Map an engine error onto the MCP wire, keeping the stable code visible
/// both in the message (`[CODE] ...`) and in structured data.
pub fn to_mcp_error(e: swarm_core::Error) -> McpError {
    let code = e.code();
    let data = Some(serde_json::json!({ "code": code, "retryable": e.is_retryable() }));
    match code {
        "INTERNAL" => McpError::internal_error(format!("[{}] {}", code, e), data),
        _ => McpError::invalid_params(format!("[{}] {}", code, e), data),
    }
}

/// Render a tool result as pretty JSON text content.
pub fn json_result<T: Serialize>(value: &T) -> Result<CallToolResult, McpError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

/// Resolve `project_key` (slug or human key) to a project.
pub async fn resolve_project(engine: &Engine, project_key: &str) -> Result<Project, McpError> {
    ProjectBmc::resolve(engine, project_key).await.map_err(to_mcp_error)
}

/// Parse an importance string when present.
pub fn parse_importance(
    value: Option<&str>,
) -> Result<Option<swarm_core::types::Importance>, McpError> {
    match value {
        None => Ok(None),
        Some(raw) => swarm_core::types::Importance::parse(raw).map(Some).ok_or_else(|| {
            McpError::invalid_params(
                format!(
                    "[INVALID_ARGUMENT] importance must be one of low|normal|high|urgent, got '{}'",
                    raw
                ),
                None,
            )
        }),
    }
}
