//! Scoped substring search tests.

use serde_json::json;

use armitage::repos::in_memory::InMemoryMemoryRepository;
use armitage::repos::{MemoryRepository, MemorySearchQuery, MemoryWriteRequest};
use armitage::types::{JsonMap, MemoryScope};

fn obj(v: serde_json::Value) -> JsonMap {
    v.as_object().cloned().unwrap_or_default()
}

async fn seed(
    repo: &InMemoryMemoryRepository,
    tenant: &str,
    session: &str,
    task: &str,
    key: &str,
    value: serde_json::Value,
    scope: MemoryScope,
) {
    repo.write(MemoryWriteRequest {
        tenant_id: tenant.to_owned(),
        session_id: session.to_owned(),
        task_id: task.to_owned(),
        key: key.to_owned(),
        value: obj(value.clone()),
        return_spec_shape: JsonMap::new(),
        scope,
    })
    .await
    .expect("seed write");
}

fn query(tenant: &str, session: &str, text: &str, scope: MemoryScope, top_k: usize) -> MemorySearchQuery {
    MemorySearchQuery {
        tenant_id: tenant.to_owned(),
        user_id: "u1".to_owned(),
        session_id: session.to_owned(),
        query_text: text.to_owned(),
        scope,
        top_k,
    }
}

#[tokio::test]
async fn search_matches_label_and_value_case_insensitively() {
    let repo = InMemoryMemoryRepository::new();
    seed(
        &repo,
        "acme",
        "s1",
        "t1",
        "aws_pref",
        json!({"memory_text": "User prefers 7-day AWS Cost report."}),
        MemoryScope::Session,
    )
    .await;
    seed(
        &repo,
        "acme",
        "s1",
        "t2",
        "other",
        json!({"memory_text": "Unrelated note."}),
        MemoryScope::Session,
    )
    .await;

    let by_value = repo
        .search(query("acme", "s1", "aws cost", MemoryScope::Session, 10))
        .await
        .expect("search");
    assert_eq!(by_value.len(), 1);
    assert_eq!(by_value[0].key, "aws_pref");

    let by_label = repo
        .search(query("acme", "s1", "AWS_PREF", MemoryScope::Session, 10))
        .await
        .expect("search");
    assert_eq!(by_label.len(), 1);
}

#[tokio::test]
async fn search_filters_by_tenant_scope_and_session() {
    let repo = InMemoryMemoryRepository::new();
    seed(&repo, "acme", "s1", "t1", "a", json!({"v": "match me"}), MemoryScope::Session).await;
    seed(&repo, "acme", "s2", "t2", "b", json!({"v": "match me"}), MemoryScope::Session).await;
    seed(&repo, "globex", "s1", "t3", "c", json!({"v": "match me"}), MemoryScope::Session).await;
    seed(&repo, "acme", "s1", "t4", "d", json!({"v": "match me"}), MemoryScope::User).await;

    let session_hits = repo
        .search(query("acme", "s1", "match me", MemoryScope::Session, 10))
        .await
        .expect("search");
    assert_eq!(session_hits.len(), 1);
    assert_eq!(session_hits[0].key, "a");

    // User scope ignores the session filter.
    let user_hits = repo
        .search(query("acme", "s-other", "match me", MemoryScope::User, 10))
        .await
        .expect("search");
    assert_eq!(user_hits.len(), 1);
    assert_eq!(user_hits[0].key, "d");
}

#[tokio::test]
async fn search_caps_results_at_top_k() {
    let repo = InMemoryMemoryRepository::new();
    for i in 0..5 {
        seed(
            &repo,
            "acme",
            "s1",
            &format!("t{i}"),
            &format!("note_{i}"),
            json!({"v": "repeated phrase"}),
            MemoryScope::Session,
        )
        .await;
    }

    let hits = repo
        .search(query("acme", "s1", "repeated phrase", MemoryScope::Session, 3))
        .await
        .expect("search");
    assert_eq!(hits.len(), 3);
}

#[tokio::test]
async fn empty_query_returns_everything_in_scope() {
    let repo = InMemoryMemoryRepository::new();
    seed(&repo, "acme", "s1", "t1", "a", json!({"v": 1}), MemoryScope::Session).await;
    seed(&repo, "acme", "s1", "t2", "b", json!({"v": 2}), MemoryScope::Session).await;

    let hits = repo
        .search(query("acme", "s1", "", MemoryScope::Session, 10))
        .await
        .expect("search");
    assert_eq!(hits.len(), 2);
}
