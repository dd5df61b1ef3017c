//! Contract-gate tests: shape validation happens before lock
//! acquisition, labels stay colon-free, and reads return exact values.

use serde_json::json;

use armitage::repos::contract::build_namespaced_key;
use armitage::repos::in_memory::InMemoryMemoryRepository;
use armitage::repos::{MemoryError, MemoryRepository, MemoryWriteRequest};
use armitage::types::{JsonMap, MemoryScope};

fn obj(v: serde_json::Value) -> JsonMap {
    v.as_object().cloned().unwrap_or_default()
}

fn write(key: &str, value: serde_json::Value, shape: serde_json::Value) -> MemoryWriteRequest {
    MemoryWriteRequest {
        tenant_id: "acme".to_owned(),
        session_id: "s1".to_owned(),
        task_id: "task_a1".to_owned(),
        key: key.to_owned(),
        value: obj(value),
        return_spec_shape: obj(shape),
        scope: MemoryScope::Session,
    }
}

#[tokio::test]
async fn labels_with_colons_are_rejected() {
    let repo = InMemoryMemoryRepository::new();
    let error = repo
        .write(write("bad:label", json!({"a": 1}), json!({})))
        .await
        .expect_err("colon label");
    assert!(matches!(error, MemoryError::InvalidLabel));
}

#[tokio::test]
async fn missing_required_field_is_a_contract_violation_before_locking() {
    let repo = InMemoryMemoryRepository::new();
    let error = repo
        .write(write(
            "out",
            json!({"unexpected": "value"}),
            json!({"intent": "string"}),
        ))
        .await
        .expect_err("missing field");
    assert!(matches!(error, MemoryError::ContractViolation));

    // No lock was taken for the failed write.
    let key = build_namespaced_key("acme", "s1", "task_a1", "out");
    assert!(!repo.lock_held(&key).await);
}

#[tokio::test]
async fn mistyped_field_is_a_contract_violation() {
    let repo = InMemoryMemoryRepository::new();
    let error = repo
        .write(write(
            "out",
            json!({"intent": 42}),
            json!({"intent": "string"}),
        ))
        .await
        .expect_err("mistyped field");
    assert!(matches!(error, MemoryError::ContractViolation));
}

#[tokio::test]
async fn conforming_write_returns_the_namespaced_key_and_round_trips() {
    let repo = InMemoryMemoryRepository::new();
    let value = json!({"intent": "cost_report", "rows": [1, 2, 3]});
    let key = repo
        .write(write(
            "step_1_output",
            value.clone(),
            json!({"intent": "string", "rows": "array"}),
        ))
        .await
        .expect("write succeeds");

    assert_eq!(key, "acme:s1:task_a1:step_1_output");

    let stored = repo
        .read(&key, false)
        .await
        .expect("read succeeds")
        .expect("record exists");
    assert_eq!(serde_json::Value::Object(stored), value);
}

#[tokio::test]
async fn extra_fields_beyond_the_shape_are_allowed() {
    let repo = InMemoryMemoryRepository::new();
    repo.write(write(
        "out",
        json!({"intent": "x", "extra": true}),
        json!({"intent": "string"}),
    ))
    .await
    .expect("extra fields are fine");
}
