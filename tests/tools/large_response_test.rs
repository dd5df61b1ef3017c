//! Tests for the spill/sample/extract pipeline that do not need a Python
//! interpreter: direct projection, spill registry, and the sweeper.

use std::time::Duration;

use serde_json::{json, Value};

use armitage::tools::large_response::{LargeResponseConfig, LargeResponsePipeline};
use armitage::types::JsonMap;

fn shape(fields: &[&str]) -> JsonMap {
    fields
        .iter()
        .map(|f| ((*f).to_owned(), json!("string")))
        .collect()
}

#[tokio::test]
async fn small_json_responses_are_projected_directly() {
    let pipeline = LargeResponsePipeline::default();
    let response = json!({
        "response_text": "The bill was $42.",
        "extra": "dropped",
    })
    .to_string();

    let outcome = pipeline
        .handle(&response, &shape(&["response_text"]), None)
        .await;
    assert_eq!(outcome["status"], "ok");
    assert_eq!(outcome["strategy"], "direct");
    assert_eq!(outcome["large_response"], false);
    assert_eq!(outcome["data"], json!({"response_text": "The bill was $42."}));
    assert_eq!(
        outcome["content_length"],
        json!(response.len())
    );
}

#[tokio::test]
async fn small_non_json_with_one_required_key_wraps_the_raw_string() {
    let pipeline = LargeResponsePipeline::default();
    let outcome = pipeline
        .handle("plain text answer", &shape(&["response_text"]), None)
        .await;
    assert_eq!(outcome["status"], "ok");
    assert_eq!(
        outcome["data"],
        json!({"response_text": "plain text answer"})
    );
}

#[tokio::test]
async fn small_non_json_with_many_required_keys_projects_nothing() {
    let pipeline = LargeResponsePipeline::default();
    let outcome = pipeline
        .handle("plain text", &shape(&["a", "b"]), None)
        .await;
    assert_eq!(outcome["status"], "ok");
    assert_eq!(outcome["data"], json!({}));
}

#[tokio::test]
async fn write_temp_registers_and_read_lines_samples() {
    let pipeline = LargeResponsePipeline::default();
    let spilled = pipeline
        .write_temp("line one\nline two\nline three\n")
        .await
        .expect("spill");
    let file_id = spilled["file_id"].as_str().expect("file id").to_owned();
    assert_eq!(pipeline.registry_len().await, 1);

    let sample = pipeline.read_lines(&file_id, 0, 2).await;
    assert_eq!(sample["lines"], json!(["line one", "line two"]));
    let offset = pipeline.read_lines(&file_id, 1, 5).await;
    assert_eq!(offset["lines"], json!(["line two", "line three"]));

    assert!(pipeline.cleanup(&file_id).await);
    assert_eq!(pipeline.registry_len().await, 0);
    assert_eq!(pipeline.read_lines(&file_id, 0, 2).await["lines"], json!([]));
}

#[tokio::test]
async fn sweeper_removes_only_aged_entries() {
    let config = LargeResponseConfig {
        sweep_max_age: Duration::from_secs(60),
        ..LargeResponseConfig::default()
    };
    let pipeline = LargeResponsePipeline::new(config);

    let old = pipeline.write_temp("old data").await.expect("spill old");
    let old_id = old["file_id"].as_str().expect("id").to_owned();
    let fresh = pipeline.write_temp("fresh data").await.expect("spill fresh");
    let fresh_id = fresh["file_id"].as_str().expect("id").to_owned();

    pipeline
        .backdate_entry(&old_id, Duration::from_secs(120))
        .await;
    let report = pipeline.sweep().await;

    let removed: Vec<&str> = report["removed"]
        .as_array()
        .expect("removed")
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert_eq!(removed, vec![old_id.as_str()]);
    assert!(!std::path::Path::new(&old_id).exists());
    assert!(std::path::Path::new(&fresh_id).exists());

    pipeline.cleanup(&fresh_id).await;
}

#[tokio::test]
async fn files_outside_the_temp_root_are_rejected_without_spawning() {
    let pipeline = LargeResponsePipeline::default();
    let outcome = pipeline
        .exec_python("result = {}", "/etc/hostname")
        .await;
    assert_eq!(outcome["status"], "failed");
    assert_eq!(outcome["reason"], "exec_python_file_outside_tempdir");
    // No success event was recorded.
    assert!(pipeline.recent_events().await.is_empty());
}
