//! Sandboxed extraction evaluator for spilled responses.
//!
//! The script runs in a fresh `python3 -I` worker process. The embedded
//! harness AST-validates the script (no imports, no `with`, no calls to
//! filesystem/introspection builtins), executes it with a whitelisted
//! builtin set plus `json`, `file_id`, and `read_json_file`, and prints a
//! single JSON result line. The parent enforces the temp-root boundary
//! before spawning and the wall-clock timeout by killing the worker.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::warn;

/// Harness program executed as `python3 -I -c`.
///
/// Reads one JSON job (`script`, `file_id`, `max_output_bytes`) from stdin
/// and writes one JSON outcome line to stdout.
const SANDBOX_HARNESS: &str = r#"
import ast, json, sys

BANNED_CALLS = {
    "open", "exec", "eval", "compile", "input", "__import__",
    "globals", "locals", "vars", "getattr", "setattr", "delattr",
}
SAFE_BUILTINS = {
    "len": len, "min": min, "max": max, "sum": sum, "range": range,
    "enumerate": enumerate, "zip": zip, "sorted": sorted, "list": list,
    "dict": dict, "set": set, "tuple": tuple, "int": int, "float": float,
    "str": str, "bool": bool, "abs": abs, "all": all, "any": any,
}

def emit(payload):
    sys.stdout.write(json.dumps(payload) + "\n")
    sys.stdout.flush()

def read_json_file(file_path):
    with open(file_path, "r", encoding="utf-8") as handle:
        payload = json.load(handle)
    if not isinstance(payload, dict):
        raise ValueError("exec_python_json_must_be_object")
    return payload

def validate(script):
    tree = ast.parse(script)
    for node in ast.walk(tree):
        if isinstance(node, (ast.Import, ast.ImportFrom, ast.With, ast.AsyncWith)):
            raise ValueError("exec_python_disallowed_syntax")
        if isinstance(node, ast.Call) and isinstance(node.func, ast.Name):
            if node.func.id in BANNED_CALLS:
                raise ValueError("exec_python_disallowed_call")

def main():
    job = json.loads(sys.stdin.read())
    script = job["script"]
    try:
        validate(script)
    except ValueError as exc:
        emit({"status": "failed", "reason": str(exc)})
        return
    except SyntaxError as exc:
        emit({"status": "failed", "reason": "exec_python_error:%s" % exc})
        return

    safe_globals = {
        "__builtins__": dict(SAFE_BUILTINS),
        "json": json,
        "file_id": job["file_id"],
        "read_json_file": read_json_file,
    }
    local_vars = {}
    try:
        exec(compile(script, "<exec_python>", "exec"), safe_globals, local_vars)
    except Exception as exc:
        emit({"status": "failed", "reason": "exec_python_error:%s" % exc})
        return
    if "result" not in local_vars:
        emit({"status": "failed", "reason": "exec_python_missing_result"})
        return
    encoded = json.dumps(local_vars["result"]).encode("utf-8")
    if len(encoded) > int(job["max_output_bytes"]):
        emit({"status": "failed", "reason": "exec_python_output_too_large"})
        return
    emit({"status": "ok", "result": local_vars["result"]})

main()
"#;

/// Hex SHA-256 of an extraction script.
pub fn script_hash(script: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(script.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn failed(reason: &str, hash: &str, file_id: &str) -> Value {
    json!({
        "status": "failed",
        "reason": reason,
        "script_hash": hash,
        "file_id": file_id,
    })
}

/// Run a sandboxed extraction script against a spilled file.
///
/// Never errors: every outcome is a `{status, ...}` object enriched with
/// `script_hash` and `file_id`.
pub async fn run_exec_python(
    script: &str,
    file_id: &str,
    temp_root: &Path,
    timeout: Duration,
    max_output_bytes: usize,
) -> Value {
    let hash = script_hash(script);

    let resolved = match std::fs::canonicalize(file_id) {
        Ok(resolved) => resolved,
        Err(_) => return failed("exec_python_file_outside_tempdir", &hash, file_id),
    };
    let resolved_root = std::fs::canonicalize(temp_root).unwrap_or_else(|_| temp_root.to_path_buf());
    if !resolved.starts_with(&resolved_root) {
        return failed("exec_python_file_outside_tempdir", &hash, file_id);
    }

    let mut child = match Command::new("python3")
        .arg("-I")
        .arg("-c")
        .arg(SANDBOX_HARNESS)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(error) => {
            warn!(%error, "python3 interpreter unavailable for exec_python");
            return failed("exec_python_unavailable", &hash, file_id);
        }
    };

    let job = json!({
        "script": script,
        "file_id": resolved.to_string_lossy(),
        "max_output_bytes": max_output_bytes,
    })
    .to_string();

    if let Some(mut stdin) = child.stdin.take() {
        if stdin.write_all(job.as_bytes()).await.is_err() {
            return failed("exec_python_failed", &hash, file_id);
        }
        // Dropping stdin closes the pipe so the harness sees EOF.
    }

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(_)) => return failed("exec_python_failed", &hash, file_id),
        // The dropped future kills the worker (kill_on_drop).
        Err(_) => return failed("exec_python_timeout", &hash, file_id),
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let Some(line) = stdout.lines().rev().find(|line| !line.trim().is_empty()) else {
        return failed("exec_python_failed", &hash, file_id);
    };
    let Ok(Value::Object(mut outcome)) = serde_json::from_str::<Value>(line) else {
        return failed("exec_python_invalid_result", &hash, file_id);
    };

    outcome.insert("script_hash".to_owned(), Value::String(hash));
    outcome.insert("file_id".to_owned(), Value::String(file_id.to_owned()));
    Value::Object(outcome)
}
