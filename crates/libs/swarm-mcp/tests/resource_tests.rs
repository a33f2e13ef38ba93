//! Tests for the read-only resource surface and tool alias resolution.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use rmcp::model::{ReadResourceRequestParam, ResourceContents};
use std::sync::Arc;
use swarm_common::AppConfig;
use swarm_core::Engine;
use swarm_core::model::agent::{AgentBmc, AgentForRegister};
use swarm_core::model::claim::ClaimBmc;
use swarm_core::model::message::{MessageBmc, MessageForSend};
use swarm_core::model::project::{Project, ProjectBmc};
use swarm_core::types::Importance;
use swarm_mcp::CoordService;
use swarm_mcp::tools::resolve_tool_alias;
use tempfile::TempDir;

struct Harness {
    service: CoordService,
    project: Project,
    #[allow(dead_code)]
    temp_dir: TempDir,
}

async fn harness() -> Harness {
    let temp_dir = TempDir::new().expect("temp dir");
    let storage_root = temp_dir.path().join("storage");
    std::fs::create_dir_all(storage_root.join("projects")).expect("mkdir");

    let mut config = AppConfig::default();
    config.storage.root = storage_root.clone();

    let db = swarm_core::store::open_index(storage_root.join("store.sqlite3"))
        .await
        .expect("index");
    let engine = Arc::new(Engine::new_for_test(db, storage_root, Arc::new(config)));

    let project = ProjectBmc::ensure(&engine, "/p/demo").await.expect("project");
    for name in ["Alpha", "Beta"] {
        AgentBmc::register(
            &engine,
            &project,
            AgentForRegister {
                program: "claude-code".into(),
                model: "claude-sonnet-4-5".into(),
                name: Some(name.into()),
                task_description: String::new(),
            },
        )
        .await
        .expect("register");
    }

    Harness { service: CoordService::new(engine), project, temp_dir }
}

fn text_of(result: &rmcp::model::ReadResourceResult) -> &str {
    match &result.contents[0] {
        ResourceContents::TextResourceContents { text, .. } => text,
        other => panic!("expected text contents, got {:?}", other),
    }
}

#[tokio::test]
async fn test_list_resources_covers_projects_agents_and_mailboxes() {
    let h = harness().await;
    let listing = h.service.list_resources_impl().await.expect("list");

    let uris: Vec<&str> = listing.resources.iter().map(|r| r.raw.uri.as_str()).collect();
    assert!(uris.contains(&"resource://projects"));
    assert!(uris.iter().any(|u| u.starts_with("resource://project/")));
    assert!(uris.iter().any(|u| u.starts_with("resource://agents/")));
    assert!(uris.contains(&format!("resource://inbox/{}/Alpha", h.project.slug).as_str()));
    assert!(uris.contains(&format!("resource://outbox/{}/Beta", h.project.slug).as_str()));
    assert!(uris.iter().any(|u| u.starts_with("resource://claims/")));
}

#[tokio::test]
async fn test_read_projects_and_project_resources() {
    let h = harness().await;

    let result = h
        .service
        .read_resource_impl(ReadResourceRequestParam { uri: "resource://projects".into() })
        .await
        .expect("read");
    let projects: serde_json::Value = serde_json::from_str(text_of(&result)).expect("json");
    assert_eq!(projects.as_array().unwrap().len(), 1);

    let uri = format!("resource://project/{}", h.project.slug);
    let result = h
        .service
        .read_resource_impl(ReadResourceRequestParam { uri })
        .await
        .expect("read");
    let project: serde_json::Value = serde_json::from_str(text_of(&result)).expect("json");
    assert_eq!(project["human_key"], "/p/demo");
}

#[tokio::test]
async fn test_read_inbox_and_message_resources() {
    let h = harness().await;
    let engine = h.service.engine();

    let receipt = MessageBmc::send(
        engine,
        &h.project,
        MessageForSend {
            sender_name: "Alpha".into(),
            to: vec!["Beta".into()],
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: "Hi".into(),
            body_md: "Hello".into(),
            importance: Importance::Normal,
            ack_required: false,
            thread_id: None,
        },
    )
    .await
    .expect("send");

    let uri = format!("resource://inbox/{}/Beta?include_bodies=true", h.project.slug);
    let result = h
        .service
        .read_resource_impl(ReadResourceRequestParam { uri })
        .await
        .expect("read inbox");
    let inbox: serde_json::Value = serde_json::from_str(text_of(&result)).expect("json");
    assert_eq!(inbox.as_array().unwrap().len(), 1);
    assert_eq!(inbox[0]["body_md"], "Hello");

    let uri = format!("resource://message/{}", receipt.id);
    let result = h
        .service
        .read_resource_impl(ReadResourceRequestParam { uri })
        .await
        .expect("read message");
    let message: serde_json::Value = serde_json::from_str(text_of(&result)).expect("json");
    assert_eq!(message["message"]["subject"], "Hi");
    assert_eq!(message["recipients"][0]["agent_name"], "Beta");
}

#[tokio::test]
async fn test_read_claims_resource_honors_active_only() {
    let h = harness().await;
    let engine = h.service.engine();

    ClaimBmc::reserve(engine, &h.project, "Alpha", &["src/**".to_string()], None, true, "work")
        .await
        .expect("reserve");
    ClaimBmc::release(engine, &h.project, "Alpha", None).await.expect("release");

    let uri = format!("resource://claims/{}?active_only=true", h.project.slug);
    let result = h
        .service
        .read_resource_impl(ReadResourceRequestParam { uri })
        .await
        .expect("read");
    let claims: serde_json::Value = serde_json::from_str(text_of(&result)).expect("json");
    assert!(claims.as_array().unwrap().is_empty());

    let uri = format!("resource://claims/{}?active_only=false", h.project.slug);
    let result = h
        .service
        .read_resource_impl(ReadResourceRequestParam { uri })
        .await
        .expect("read");
    let claims: serde_json::Value = serde_json::from_str(text_of(&result)).expect("json");
    assert_eq!(claims.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_read_resource_rejects_unknown_shapes() {
    let h = harness().await;

    let err = h
        .service
        .read_resource_impl(ReadResourceRequestParam { uri: "resource://nonsense/x".into() })
        .await
        .expect_err("unknown type");
    assert!(err.to_string().contains("Unknown resource type"));

    let err = h
        .service
        .read_resource_impl(ReadResourceRequestParam { uri: "agent-mail://foo".into() })
        .await
        .expect_err("wrong scheme");
    assert!(err.to_string().contains("scheme"));
}

#[test]
fn test_tool_aliases_resolve_to_canonical_names() {
    assert_eq!(resolve_tool_alias("check_my_messages"), Some("fetch_inbox"));
    assert_eq!(resolve_tool_alias("check_inbox"), Some("fetch_inbox"));
    assert_eq!(resolve_tool_alias("file_reservation_paths"), Some("reserve_file_paths"));
    assert_eq!(resolve_tool_alias("fetch_inbox"), None);
    assert_eq!(resolve_tool_alias("send_message"), None);
}
