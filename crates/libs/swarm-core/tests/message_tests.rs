//! Mailbox tests: delivery fan-out, thread closure on reply, ordering
//! under concurrent sends, and the read/ack lifecycle.

#![allow(clippy::unwrap_used, clippy::expect_used)]

#[path = "common/mod.rs"]
mod common;

use common::TestContext;
use swarm_core::model::message::{InboxQuery, MessageBmc, MessageForSend};
use swarm_core::store::git_store;
use swarm_core::types::Importance;

fn send_input(from: &str, to: &[&str], subject: &str, body: &str) -> MessageForSend {
    MessageForSend {
        sender_name: from.to_string(),
        to: to.iter().map(|s| s.to_string()).collect(),
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
async fn test_send_delivers_to_each_recipient_exactly_once() {
    let tc = TestContext::new().await.expect("context");
    let (project, _, _) = tc.project_with_agents("/p/demo").await.expect("setup");
    tc.register(&project, "Gamma").await.expect("third agent");

    let receipt = MessageBmc::send(
        &tc.engine,
        &project,
        send_input("Alpha", &["Beta", "Gamma"], "Hi", "Hello"),
    )
    .await
    .expect("send");
    assert!(receipt.id.starts_with("msg_"));

    for name in ["Beta", "Gamma"] {
        let inbox = MessageBmc::fetch_inbox(&tc.engine, &project, name, &InboxQuery::default())
            .await
            .expect("inbox");
        let hits: Vec<_> = inbox.iter().filter(|m| m.id == receipt.id).collect();
        assert_eq!(hits.len(), 1, "{} should see the message exactly once", name);
        assert_eq!(hits[0].from, "Alpha");
        assert_eq!(hits[0].subject, "Hi");
    }

    let outbox = MessageBmc::fetch_outbox(&tc.engine, &project, "Alpha", 50, false)
        .await
        .expect("outbox");
    assert_eq!(outbox.iter().filter(|m| m.id == receipt.id).count(), 1);

    // Sender is not a recipient.
    let alpha_inbox = MessageBmc::fetch_inbox(&tc.engine, &project, "Alpha", &InboxQuery::default())
        .await
        .expect("inbox");
    assert!(alpha_inbox.iter().all(|m| m.id != receipt.id));
}

#[tokio::test]
async fn test_send_writes_archive_files_and_commit() {
    let tc = TestContext::new().await.expect("context");
    let (project, _, _) = tc.project_with_agents("/p/demo").await.expect("setup");

    let receipt = MessageBmc::send(
        &tc.engine,
        &project,
        send_input("Alpha", &["Beta"], "Hi", "Hello"),
    )
    .await
    .expect("send");

    let repo = git_store::open_repo(tc.engine.project_repo_path(&project.slug)).expect("repo");
    let y = receipt.created.format("%Y").to_string();
    let m = receipt.created.format("%m").to_string();

    let canonical = format!("messages/{}/{}/{}.md", y, m, receipt.id);
    let inbox = format!("agents/Beta/inbox/{}/{}/{}.md", y, m, receipt.id);
    let outbox = format!("agents/Alpha/outbox/{}/{}/{}.md", y, m, receipt.id);
    for rel in [&canonical, &inbox, &outbox] {
        let content = git_store::read_file_content(&repo, rel).expect("archived file");
        assert!(content.starts_with("---json\n"), "{} missing frontmatter", rel);
        assert!(content.ends_with("Hello"));
    }

    let head = repo.head().expect("head").peel_to_commit().expect("commit");
    assert_eq!(head.summary(), Some("mail: Alpha -> Beta | Hi"));
}

#[tokio::test]
async fn test_send_rejects_empty_recipients_and_unknown_agents() {
    let tc = TestContext::new().await.expect("context");
    let (project, _, _) = tc.project_with_agents("/p/demo").await.expect("setup");

    let err = MessageBmc::send(&tc.engine, &project, send_input("Alpha", &[], "Hi", "x"))
        .await
        .expect_err("empty to");
    assert_eq!(err.code(), "INVALID_ARGUMENT");

    let err = MessageBmc::send(&tc.engine, &project, send_input("Alpha", &["Nobody"], "Hi", "x"))
        .await
        .expect_err("unknown recipient");
    assert_eq!(err.code(), "AGENT_NOT_REGISTERED");

    let err = MessageBmc::send(&tc.engine, &project, send_input("Ghost", &["Beta"], "Hi", "x"))
        .await
        .expect_err("unknown sender");
    assert_eq!(err.code(), "AGENT_NOT_REGISTERED");
}

#[tokio::test]
async fn test_reply_keeps_thread_and_prefixes_subject() {
    let tc = TestContext::new().await.expect("context");
    let (project, _, _) = tc.project_with_agents("/p/demo").await.expect("setup");

    let original = MessageBmc::send(
        &tc.engine,
        &project,
        send_input("Alpha", &["Beta"], "Hi", "Hello"),
    )
    .await
    .expect("send");

    let reply = MessageBmc::reply(&tc.engine, &project, &original.id, "Beta", "Ack".into(), None, None)
        .await
        .expect("reply");

    assert_eq!(reply.thread_id, original.thread_id);
    assert_eq!(reply.subject, "Re: Hi");
    assert_eq!(reply.recipients, vec!["Alpha".to_string()]);

    // Replying to a reply does not stack prefixes.
    let reply2 =
        MessageBmc::reply(&tc.engine, &project, &reply.id, "Alpha", "Thanks".into(), None, None)
            .await
            .expect("reply 2");
    assert_eq!(reply2.subject, "Re: Hi");
    assert_eq!(reply2.thread_id, original.thread_id);

    let thread = MessageBmc::list_thread(&tc.engine, project.id, &original.thread_id)
        .await
        .expect("thread");
    assert_eq!(thread.len(), 3);
    assert!(thread.windows(2).all(|w| w[0].created_ts <= w[1].created_ts));
}

#[tokio::test]
async fn test_reply_inherits_importance_and_ack_unless_overridden() {
    let tc = TestContext::new().await.expect("context");
    let (project, _, _) = tc.project_with_agents("/p/demo").await.expect("setup");

    let mut input = send_input("Alpha", &["Beta"], "Deploy", "now");
    input.importance = Importance::Urgent;
    input.ack_required = true;
    let original = MessageBmc::send(&tc.engine, &project, input).await.expect("send");

    let reply = MessageBmc::reply(&tc.engine, &project, &original.id, "Beta", "on it".into(), None, None)
        .await
        .expect("reply");
    let stored = MessageBmc::get(&tc.engine, &reply.id).await.expect("get");
    assert_eq!(stored.importance, Importance::Urgent);
    assert!(stored.ack_required);

    let reply2 = MessageBmc::reply(
        &tc.engine,
        &project,
        &original.id,
        "Beta",
        "done".into(),
        Some(Importance::Low),
        Some(false),
    )
    .await
    .expect("reply with overrides");
    let stored2 = MessageBmc::get(&tc.engine, &reply2.id).await.expect("get");
    assert_eq!(stored2.importance, Importance::Low);
    assert!(!stored2.ack_required);
}

#[tokio::test]
async fn test_inbox_filters_urgent_and_since() {
    let tc = TestContext::new().await.expect("context");
    let (project, _, _) = tc.project_with_agents("/p/demo").await.expect("setup");

    let mut low = send_input("Alpha", &["Beta"], "fyi", "later");
    low.importance = Importance::Low;
    MessageBmc::send(&tc.engine, &project, low).await.expect("send low");

    let mut urgent = send_input("Alpha", &["Beta"], "fire", "now");
    urgent.importance = Importance::Urgent;
    let urgent_receipt = MessageBmc::send(&tc.engine, &project, urgent).await.expect("send urgent");

    let urgent_only = MessageBmc::fetch_inbox(
        &tc.engine,
        &project,
        "Beta",
        &InboxQuery { urgent_only: true, ..InboxQuery::default() },
    )
    .await
    .expect("inbox");
    assert_eq!(urgent_only.len(), 1);
    assert_eq!(urgent_only[0].id, urgent_receipt.id);

    // since_ts excludes everything up to the urgent message.
    let later = MessageBmc::fetch_inbox(
        &tc.engine,
        &project,
        "Beta",
        &InboxQuery { since_ts: Some(urgent_receipt.created), ..InboxQuery::default() },
    )
    .await
    .expect("inbox");
    assert!(later.is_empty());

    // Bodies only appear when asked for.
    let without = MessageBmc::fetch_inbox(&tc.engine, &project, "Beta", &InboxQuery::default())
        .await
        .expect("inbox");
    assert!(without[0].body_md.is_none());
    let with = MessageBmc::fetch_inbox(
        &tc.engine,
        &project,
        "Beta",
        &InboxQuery { include_bodies: true, ..InboxQuery::default() },
    )
    .await
    .expect("inbox");
    assert!(with[0].body_md.is_some());
}

#[tokio::test]
async fn test_mark_read_and_acknowledge_lifecycle() {
    let tc = TestContext::new().await.expect("context");
    let (project, _, _) = tc.project_with_agents("/p/demo").await.expect("setup");

    let mut input = send_input("Alpha", &["Beta"], "please ack", "body");
    input.ack_required = true;
    let receipt = MessageBmc::send(&tc.engine, &project, input).await.expect("send");

    let updated = MessageBmc::mark_read(&tc.engine, &project, "Beta", &receipt.id)
        .await
        .expect("mark read");
    assert!(updated);
    // Second mark is a no-op.
    let updated = MessageBmc::mark_read(&tc.engine, &project, "Beta", &receipt.id)
        .await
        .expect("mark read again");
    assert!(!updated);

    let (_, acked) = MessageBmc::acknowledge(&tc.engine, &project, "Beta", &receipt.id)
        .await
        .expect("ack");
    assert!(acked);

    let recipients = MessageBmc::recipients(&tc.engine, &receipt.id).await.expect("recipients");
    assert_eq!(recipients.len(), 1);
    assert!(recipients[0].read_ts.is_some());
    assert!(recipients[0].ack_ts.is_some());
}

#[tokio::test]
async fn test_cc_and_bcc_delivery() {
    let tc = TestContext::new().await.expect("context");
    let (project, _, _) = tc.project_with_agents("/p/demo").await.expect("setup");
    tc.register(&project, "Gamma").await.expect("gamma");
    tc.register(&project, "Delta").await.expect("delta");

    let input = MessageForSend {
        sender_name: "Alpha".into(),
        to: vec!["Beta".into()],
        cc: vec!["Gamma".into()],
        bcc: vec!["Delta".into()],
        subject: "heads up".into(),
        body_md: "fyi".into(),
        importance: Importance::Normal,
        ack_required: false,
        thread_id: None,
    };
    let receipt = MessageBmc::send(&tc.engine, &project, input).await.expect("send");

    for name in ["Beta", "Gamma", "Delta"] {
        let inbox = MessageBmc::fetch_inbox(&tc.engine, &project, name, &InboxQuery::default())
            .await
            .expect("inbox");
        assert_eq!(inbox.iter().filter(|m| m.id == receipt.id).count(), 1, "{}", name);
    }

    // The canonical frontmatter names to and cc but never bcc.
    let repo = git_store::open_repo(tc.engine.project_repo_path(&project.slug)).expect("repo");
    let y = receipt.created.format("%Y").to_string();
    let m = receipt.created.format("%m").to_string();
    let canonical = git_store::read_file_content(
        &repo,
        format!("messages/{}/{}/{}.md", y, m, receipt.id),
    )
    .expect("canonical");
    assert!(canonical.contains("Gamma"));
    assert!(!canonical.contains("Delta"), "bcc leaked into frontmatter");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_sends_are_strictly_ordered() {
    let tc = TestContext::new().await.expect("context");
    let (project, _, _) = tc.project_with_agents("/p/demo").await.expect("setup");

    const N: usize = 8;
    let mut handles = Vec::new();
    for i in 0..N {
        let engine = tc.engine.clone();
        let project = project.clone();
        handles.push(tokio::spawn(async move {
            MessageBmc::send(
                &engine,
                &project,
                MessageForSend {
                    sender_name: "Alpha".into(),
                    to: vec!["Beta".into()],
                    cc: Vec::new(),
                    bcc: Vec::new(),
                    subject: format!("burst {}", i),
                    body_md: "x".into(),
                    importance: Importance::Normal,
                    ack_required: false,
                    thread_id: None,
                },
            )
            .await
        }));
    }
    for handle in handles {
        handle.await.expect("join").expect("send");
    }

    let inbox = MessageBmc::fetch_inbox(
        &tc.engine,
        &project,
        "Beta",
        &InboxQuery { limit: Some(50), ..InboxQuery::default() },
    )
    .await
    .expect("inbox");
    assert_eq!(inbox.len(), N, "no lost deliveries");

    // Newest-first with a strict (created_ts, id) order.
    for pair in inbox.windows(2) {
        let newer = (&pair[0].created_ts, &pair[0].id);
        let older = (&pair[1].created_ts, &pair[1].id);
        assert!(newer > older, "inbox not strictly ordered: {:?} vs {:?}", newer, older);
    }
}
