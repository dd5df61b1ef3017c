//! Dedup tests for the save-memory tools: canonical fingerprints, skip
//! responses, and write idempotence.

use std::sync::Arc;

use serde_json::json;

use armitage::kernel::context::ToolRuntimeContext;
use armitage::repos::in_memory::InMemoryMemoryRepository;
use armitage::repos::{MemoryRepository, MemorySearchQuery};
use armitage::tools::large_response::LargeResponsePipeline;
use armitage::tools::memory::{save_action_memory, save_user_memory};
use armitage::types::canonical::{canonical_json, fingerprint};
use armitage::types::{JsonMap, MemoryScope};

fn context(repo: &Arc<InMemoryMemoryRepository>) -> ToolRuntimeContext {
    ToolRuntimeContext {
        tenant_id: "acme".to_owned(),
        user_id: "u1".to_owned(),
        session_id: "s1".to_owned(),
        plan_id: "plan_adk_dedup".to_owned(),
        memory_repo: Some(Arc::clone(repo) as Arc<dyn MemoryRepository>),
        embedder: None,
        communication_config_path: None,
        large_response: Arc::new(LargeResponsePipeline::default()),
    }
}

fn preference_payload() -> serde_json::Value {
    json!({
        "memory_text": "User prefers 7-day AWS cost report.",
        "domain": "aws_cost",
        "intent": "report_preference",
        "entities": ["7-day"],
        "query_hints": ["aws cost 7 day"],
        "source": "orchestrator",
    })
}

fn save_args(payload: &serde_json::Value) -> JsonMap {
    let mut args = JsonMap::new();
    args.insert("key".into(), json!("aws_report_pref"));
    args.insert("memory_json".into(), json!(payload.to_string()));
    args
}

#[tokio::test]
async fn identical_user_memory_is_skipped_on_the_second_save() {
    let repo = Arc::new(InMemoryMemoryRepository::new());
    let ctx = context(&repo);
    let payload = preference_payload();

    let first = save_user_memory(&ctx, &save_args(&payload))
        .await
        .expect("first save");
    assert_eq!(first["status"], "ok");
    assert_eq!(first["scope"], "user");
    let stored_key = first["namespaced_key"].as_str().expect("key").to_owned();

    let second = save_user_memory(&ctx, &save_args(&payload))
        .await
        .expect("second save");
    assert_eq!(second["status"], "duplicate_skipped");
    assert_eq!(second["namespaced_key"], json!(stored_key));
    assert_eq!(second["reason"], "similar_memory_exists");

    // Exactly one record exists despite two saves.
    let hits = repo
        .search(MemorySearchQuery {
            tenant_id: "acme".to_owned(),
            user_id: "u1".to_owned(),
            session_id: "s1".to_owned(),
            query_text: "aws cost".to_owned(),
            scope: MemoryScope::User,
            top_k: 10,
        })
        .await
        .expect("search");
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn key_order_does_not_defeat_the_fingerprint() {
    let repo = Arc::new(InMemoryMemoryRepository::new());
    let ctx = context(&repo);

    let original = json!({"domain": "aws_cost", "memory_text": "Weekly report preferred."});
    let reordered = json!({"memory_text": "Weekly report preferred.", "domain": "aws_cost"});
    assert_eq!(fingerprint(&original), fingerprint(&reordered));

    let first = save_user_memory(&ctx, &save_args(&original))
        .await
        .expect("first save");
    assert_eq!(first["status"], "ok");
    let second = save_user_memory(&ctx, &save_args(&reordered))
        .await
        .expect("second save");
    assert_eq!(second["status"], "duplicate_skipped");
}

#[tokio::test]
async fn different_payloads_both_persist() {
    let repo = Arc::new(InMemoryMemoryRepository::new());
    let ctx = context(&repo);

    let first = save_user_memory(
        &ctx,
        &save_args(&json!({"memory_text": "Prefers weekly reports."})),
    )
    .await
    .expect("first save");
    let second = save_user_memory(
        &ctx,
        &save_args(&json!({"memory_text": "Prefers monthly reports."})),
    )
    .await
    .expect("second save");

    assert_eq!(first["status"], "ok");
    assert_eq!(second["status"], "ok");
    assert_ne!(first["namespaced_key"], second["namespaced_key"]);
}

#[tokio::test]
async fn action_memory_dedup_is_session_scoped() {
    let repo = Arc::new(InMemoryMemoryRepository::new());
    let ctx = context(&repo);
    let payload = json!({"memory_text": "Step output cached.", "intent": "cache"});

    let first = save_action_memory(&ctx, &save_args(&payload))
        .await
        .expect("first save");
    assert_eq!(first["status"], "ok");
    assert_eq!(first["scope"], "session");
    assert_eq!(first["memory_type"], "action_memory");

    let second = save_action_memory(&ctx, &save_args(&payload))
        .await
        .expect("second save");
    assert_eq!(second["status"], "duplicate_skipped");
}

#[tokio::test]
async fn invalid_memory_json_is_rejected() {
    let repo = Arc::new(InMemoryMemoryRepository::new());
    let ctx = context(&repo);

    let mut args = JsonMap::new();
    args.insert("key".into(), json!("k"));
    args.insert("memory_json".into(), json!("not json at all"));
    let outcome = save_user_memory(&ctx, &args).await.expect("tool returns");
    assert_eq!(outcome["status"], "failed");
    assert_eq!(outcome["reason"], "invalid_memory_json");
}

#[test]
fn canonical_json_is_stable_under_reserialization() {
    let value = json!({"b": [3, 1], "a": {"y": null, "x": "é"}});
    let once = canonical_json(&value);
    let reparsed: serde_json::Value = serde_json::from_str(&once).expect("parses");
    assert_eq!(canonical_json(&reparsed), once);
}
