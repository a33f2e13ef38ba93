//! Full-text search and thread summarization tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

#[path = "common/mod.rs"]
mod common;

use common::TestContext;
use swarm_core::model::message::{MessageBmc, MessageForSend};
use swarm_core::model::summary;
use swarm_core::types::Importance;

fn send_input(from: &str, to: &str, subject: &str, body: &str) -> MessageForSend {
    MessageForSend {
        sender_name: from.to_string(),
        to: vec![to.to_string()],
        cc: Vec::new(),
        bcc: Vec::new(),
        subject: subject.to_string(),
        body_md: body.to_string(),
        importance: Importance::Normal,
        ack_required: false,
        thread_id: None,
    }
}

#[tokio::test]
async fn test_search_finds_token_in_subject_and_body() {
    let tc = TestContext::new().await.expect("context");
    let (project, _, _) = tc.project_with_agents("/p/demo").await.expect("setup");

    let by_body = MessageBmc::send(&tc.engine, &project, send_input("Alpha", "Beta", "Hi", "Hello"))
        .await
        .expect("send");
    let by_subject =
        MessageBmc::send(&tc.engine, &project, send_input("Alpha", "Beta", "Deployment plan", "soon"))
            .await
            .expect("send");

    let hits = MessageBmc::search(&tc.engine, project.id, "Hello", 20).await.expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, by_body.id);

    let hits = MessageBmc::search(&tc.engine, project.id, "deployment", 20).await.expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, by_subject.id);
}

#[tokio::test]
async fn test_phrase_query_matches_contiguous_runs_only() {
    let tc = TestContext::new().await.expect("context");
    let (project, _, _) = tc.project_with_agents("/p/demo").await.expect("setup");

    MessageBmc::send(&tc.engine, &project, send_input("Alpha", "Beta", "Hi", "Hello"))
        .await
        .expect("send");

    // "Hello world" as a phrase does not match a body that only says Hello.
    let hits = MessageBmc::search(&tc.engine, project.id, "\"Hello world\"", 20)
        .await
        .expect("search");
    assert!(hits.is_empty());

    MessageBmc::send(
        &tc.engine,
        &project,
        send_input("Alpha", "Beta", "Greeting", "Hello world and everyone"),
    )
    .await
    .expect("send");
    let hits = MessageBmc::search(&tc.engine, project.id, "\"Hello world\"", 20)
        .await
        .expect("search");
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn test_search_supports_boolean_and_prefix_grammar() {
    let tc = TestContext::new().await.expect("context");
    let (project, _, _) = tc.project_with_agents("/p/demo").await.expect("setup");

    MessageBmc::send(&tc.engine, &project, send_input("Alpha", "Beta", "alpha topic", "rust parser"))
        .await
        .expect("send");
    MessageBmc::send(&tc.engine, &project, send_input("Alpha", "Beta", "beta topic", "rust server"))
        .await
        .expect("send");

    let hits = MessageBmc::search(&tc.engine, project.id, "rust AND parser", 20)
        .await
        .expect("search");
    assert_eq!(hits.len(), 1);

    let hits = MessageBmc::search(&tc.engine, project.id, "pars*", 20).await.expect("search");
    assert_eq!(hits.len(), 1);

    let hits = MessageBmc::search(&tc.engine, project.id, "rust NOT server", 20)
        .await
        .expect("search");
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn test_search_is_project_scoped_and_degrades_gracefully() {
    let tc = TestContext::new().await.expect("context");
    let (project_a, _, _) = tc.project_with_agents("/p/one").await.expect("setup a");
    let (project_b, _, _) = tc.project_with_agents("/p/two").await.expect("setup b");

    MessageBmc::send(&tc.engine, &project_a, send_input("Alpha", "Beta", "Hi", "sharedtoken"))
        .await
        .expect("send");

    let hits = MessageBmc::search(&tc.engine, project_b.id, "sharedtoken", 20)
        .await
        .expect("search");
    assert!(hits.is_empty(), "search leaked across projects");

    // Unsearchable junk returns empty instead of erroring.
    for junk in ["", "*", "??", "..."] {
        let hits = MessageBmc::search(&tc.engine, project_a.id, junk, 20).await.expect("search");
        assert!(hits.is_empty());
    }
}

#[tokio::test]
async fn test_summarize_thread_stats_and_participants() {
    let tc = TestContext::new().await.expect("context");
    let (project, _, _) = tc.project_with_agents("/p/demo").await.expect("setup");

    let original = MessageBmc::send(&tc.engine, &project, send_input("Alpha", "Beta", "Hi", "Hello"))
        .await
        .expect("send");
    MessageBmc::reply(&tc.engine, &project, &original.id, "Beta", "Ack".into(), None, None)
        .await
        .expect("reply");

    let digest = summary::summarize_thread(&tc.engine, &project, &original.thread_id, false)
        .await
        .expect("summarize");

    assert_eq!(digest.total_messages, 2);
    assert_eq!(digest.participants, vec!["Alpha".to_string(), "Beta".to_string()]);
    assert!(digest.first_ts.is_some());
    assert!(digest.last_ts >= digest.first_ts);
    assert!(digest.examples.is_none());
}

#[tokio::test]
async fn test_summarize_fallback_extracts_headings_and_action_items() {
    let tc = TestContext::new().await.expect("context");
    let (project, _, _) = tc.project_with_agents("/p/demo").await.expect("setup");

    let body = "# Migration plan\n\nDetails here.\n\n- [ ] move the schema\n- [x] draft written\nTODO: benchmark the writer\n";
    let receipt = MessageBmc::send(&tc.engine, &project, send_input("Alpha", "Beta", "Plan", body))
        .await
        .expect("send");

    let digest = summary::summarize_thread(&tc.engine, &project, &receipt.thread_id, true)
        .await
        .expect("summarize");

    assert_eq!(digest.key_points, vec!["Migration plan".to_string()]);
    assert_eq!(
        digest.action_items,
        vec!["move the schema".to_string(), "benchmark the writer".to_string()]
    );
    let examples = digest.examples.expect("examples requested");
    assert_eq!(examples.len(), 1);
    assert_eq!(examples[0].from, "Alpha");
}

#[tokio::test]
async fn test_summarize_unknown_thread_is_empty_not_error() {
    let tc = TestContext::new().await.expect("context");
    let (project, _, _) = tc.project_with_agents("/p/demo").await.expect("setup");

    let digest = summary::summarize_thread(&tc.engine, &project, "msg_20990101_ffffffff", false)
        .await
        .expect("summarize");
    assert_eq!(digest.total_messages, 0);
    assert!(digest.participants.is_empty());
    assert!(digest.first_ts.is_none());
}
