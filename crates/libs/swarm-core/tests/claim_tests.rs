//! Lease tests: exclusive non-overlap, TTL expiry and sweep, renewal and
//! release.

#![allow(clippy::unwrap_used, clippy::expect_used)]

#[path = "common/mod.rs"]
mod common;

use common::TestContext;
use swarm_core::model::claim::ClaimBmc;
use swarm_core::types::{fmt_ts, now_ts};

fn paths(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn test_exclusive_glob_blocks_contained_literal() {
    let tc = TestContext::new().await.expect("context");
    let (project, _, _) = tc.project_with_agents("/p/demo").await.expect("setup");

    let first = ClaimBmc::reserve(
        &tc.engine,
        &project,
        "Alpha",
        &paths(&["src/**/*.py"]),
        Some(3600),
        true,
        "refactor",
    )
    .await
    .expect("reserve");
    assert_eq!(first.granted, vec!["src/**/*.py".to_string()]);
    assert!(first.conflicts.is_empty());

    let second = ClaimBmc::reserve(
        &tc.engine,
        &project,
        "Beta",
        &paths(&["src/api/x.py"]),
        Some(3600),
        true,
        "fix",
    )
    .await
    .expect("reserve");
    assert!(second.granted.is_empty());
    assert_eq!(second.conflicts.len(), 1);
    assert_eq!(second.conflicts[0].path, "src/api/x.py");
    assert_eq!(second.conflicts[0].holders.len(), 1);
    assert_eq!(second.conflicts[0].holders[0].agent, "Alpha");
    assert!(second.conflicts[0].holders[0].exclusive);
}

#[tokio::test]
async fn test_partial_grant_with_mixed_conflicts() {
    let tc = TestContext::new().await.expect("context");
    let (project, _, _) = tc.project_with_agents("/p/demo").await.expect("setup");

    ClaimBmc::reserve(&tc.engine, &project, "Alpha", &paths(&["src/*.rs"]), None, true, "")
        .await
        .expect("reserve");

    let outcome = ClaimBmc::reserve(
        &tc.engine,
        &project,
        "Beta",
        &paths(&["src/main.rs", "docs/guide.md"]),
        None,
        true,
        "",
    )
    .await
    .expect("reserve");
    assert_eq!(outcome.granted, vec!["docs/guide.md".to_string()]);
    assert_eq!(outcome.conflicts.len(), 1);
    assert_eq!(outcome.conflicts[0].path, "src/main.rs");
}

#[tokio::test]
async fn test_shared_claims_coexist_but_block_exclusive() {
    let tc = TestContext::new().await.expect("context");
    let (project, _, _) = tc.project_with_agents("/p/demo").await.expect("setup");

    let a = ClaimBmc::reserve(&tc.engine, &project, "Alpha", &paths(&["Cargo.toml"]), None, false, "read")
        .await
        .expect("reserve");
    assert_eq!(a.granted.len(), 1);

    // Shared + shared on the same path is fine.
    let b = ClaimBmc::reserve(&tc.engine, &project, "Beta", &paths(&["Cargo.toml"]), None, false, "read")
        .await
        .expect("reserve");
    assert_eq!(b.granted.len(), 1);
    assert!(b.conflicts.is_empty());

    // Exclusive over existing shared conflicts.
    let c = ClaimBmc::reserve(&tc.engine, &project, "Beta", &paths(&["Cargo.toml"]), None, true, "edit")
        .await
        .expect("reserve");
    assert!(c.granted.is_empty());
    assert_eq!(c.conflicts[0].holders[0].agent, "Alpha");
}

#[tokio::test]
async fn test_own_claims_never_conflict() {
    let tc = TestContext::new().await.expect("context");
    let (project, _, _) = tc.project_with_agents("/p/demo").await.expect("setup");

    ClaimBmc::reserve(&tc.engine, &project, "Alpha", &paths(&["src/**"]), None, true, "")
        .await
        .expect("reserve");
    let again = ClaimBmc::reserve(&tc.engine, &project, "Alpha", &paths(&["src/lib.rs"]), None, true, "")
        .await
        .expect("reserve");
    assert_eq!(again.granted, vec!["src/lib.rs".to_string()]);
}

#[tokio::test]
async fn test_ttl_floor_and_default() {
    let tc = TestContext::new().await.expect("context");
    let (project, _, _) = tc.project_with_agents("/p/demo").await.expect("setup");

    let before = now_ts();
    let outcome = ClaimBmc::reserve(&tc.engine, &project, "Alpha", &paths(&["a.txt"]), Some(5), true, "")
        .await
        .expect("reserve");
    // Requested 5s is raised to the 60s floor.
    assert!(outcome.expires_ts >= before + chrono::Duration::seconds(60));

    let outcome = ClaimBmc::reserve(&tc.engine, &project, "Alpha", &paths(&["b.txt"]), None, true, "")
        .await
        .expect("reserve");
    assert!(outcome.expires_ts >= before + chrono::Duration::seconds(3600));
}

#[tokio::test]
async fn test_expired_claim_is_swept_and_path_freed() {
    let tc = TestContext::new().await.expect("context");
    let (project, alpha, _) = tc.project_with_agents("/p/demo").await.expect("setup");

    // Plant an already-expired exclusive claim for Alpha.
    let past = now_ts() - chrono::Duration::seconds(120);
    let db = tc.engine.db_for_test();
    let stmt = db
        .prepare(
            "INSERT INTO claims (project_id, agent_id, path_pattern, exclusive, reason, created_ts, expires_ts) VALUES (?, ?, ?, 1, '', ?, ?)",
        )
        .await
        .expect("prepare");
    stmt.execute((
        project.id.get(),
        alpha.id.get(),
        "src/main.rs",
        fmt_ts(past - chrono::Duration::seconds(3600)),
        fmt_ts(past),
    ))
    .await
    .expect("insert");

    // Beta's reserve sweeps the stale row and wins the path.
    let outcome = ClaimBmc::reserve(&tc.engine, &project, "Beta", &paths(&["src/main.rs"]), None, true, "")
        .await
        .expect("reserve");
    assert_eq!(outcome.granted, vec!["src/main.rs".to_string()]);

    let all = ClaimBmc::list_all(&tc.engine, project.id).await.expect("list");
    let stale = all.iter().find(|c| c.agent_name == "Alpha").expect("stale row");
    assert!(stale.released_ts.is_some(), "sweep should release the expired row");
}

#[tokio::test]
async fn test_renew_extends_and_never_shortens() {
    let tc = TestContext::new().await.expect("context");
    let (project, _, _) = tc.project_with_agents("/p/demo").await.expect("setup");

    let reserved = ClaimBmc::reserve(&tc.engine, &project, "Alpha", &paths(&["src/lib.rs"]), Some(600), true, "")
        .await
        .expect("reserve");

    let renewed = ClaimBmc::renew(&tc.engine, &project, "Alpha", 300, None)
        .await
        .expect("renew");
    assert_eq!(renewed.renewed, vec!["src/lib.rs".to_string()]);
    let new_expiry = renewed.expires_ts.expect("expiry");
    assert_eq!(new_expiry, reserved.expires_ts + chrono::Duration::seconds(300));

    let err = ClaimBmc::renew(&tc.engine, &project, "Alpha", 0, None)
        .await
        .expect_err("zero extension");
    assert_eq!(err.code(), "INVALID_ARGUMENT");

    // Renewing someone else's claim touches nothing.
    let other = ClaimBmc::renew(&tc.engine, &project, "Beta", 300, None).await.expect("renew");
    assert!(other.renewed.is_empty());
}

#[tokio::test]
async fn test_release_frees_paths_and_archive_file() {
    let tc = TestContext::new().await.expect("context");
    let (project, _, _) = tc.project_with_agents("/p/demo").await.expect("setup");

    ClaimBmc::reserve(&tc.engine, &project, "Alpha", &paths(&["src/lib.rs", "src/main.rs"]), None, true, "")
        .await
        .expect("reserve");

    let to_release = paths(&["src/lib.rs"]);
    let released = ClaimBmc::release(&tc.engine, &project, "Alpha", Some(to_release.as_slice()))
        .await
        .expect("release");
    assert_eq!(released.released_count, 1);

    let active = ClaimBmc::list_active(&tc.engine, project.id).await.expect("active");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].path_pattern, "src/main.rs");

    // Released path is immediately reservable by another agent.
    let outcome = ClaimBmc::reserve(&tc.engine, &project, "Beta", &paths(&["src/lib.rs"]), None, true, "")
        .await
        .expect("reserve");
    assert_eq!(outcome.granted.len(), 1);

    // Release-all cleans up the rest.
    let released = ClaimBmc::release(&tc.engine, &project, "Alpha", None).await.expect("release all");
    assert_eq!(released.released_count, 1);
}

#[tokio::test]
async fn test_reserve_rejects_absolute_and_empty_paths() {
    let tc = TestContext::new().await.expect("context");
    let (project, _, _) = tc.project_with_agents("/p/demo").await.expect("setup");

    let err = ClaimBmc::reserve(&tc.engine, &project, "Alpha", &paths(&["/etc/passwd"]), None, true, "")
        .await
        .expect_err("absolute path");
    assert_eq!(err.code(), "INVALID_ARGUMENT");

    let err = ClaimBmc::reserve(&tc.engine, &project, "Alpha", &[], None, true, "")
        .await
        .expect_err("empty list");
    assert_eq!(err.code(), "INVALID_ARGUMENT");
}
