//! Turning captured child output into response bodies.
//!
//! Kept free of I/O so the JSON re-parse and the error body shapes can be tested on their own.

use serde_json::{json, Value};

use crate::errors::{display_for_bridge_error, BridgeError};
use crate::process::RunOutput;
use crate::response::Response;

/// Best-effort parse of child stdout as JSON. Empty or non-JSON output yields `None`.
pub fn try_parse_json(bytes: &[u8]) -> Option<Value> {
    serde_json::from_slice(bytes).ok()
}

pub fn trimmed(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

/// 200 with stdout re-serialized as JSON when it parses, else stdout verbatim as text.
pub fn stdout_response(stdout: &[u8]) -> Response {
    match try_parse_json(stdout) {
        Some(value) => Response::json(200, &value),
        None => Response::text(200, stdout.to_vec()),
    }
}

/// 500 `{error, stderr}` for a child that could not be started or waited on.
pub fn spawn_failure_response(err: &BridgeError, stderr: &[u8]) -> Response {
    Response::json(
        500,
        &json!({
            "error": display_for_bridge_error(err),
            "stderr": String::from_utf8_lossy(stderr),
        }),
    )
}

/// 500 `{code, stderr, stdout}` for a child that exited nonzero or was killed (`code: null`).
pub fn nonzero_exit_response(out: &RunOutput) -> Response {
    Response::json(
        500,
        &json!({
            "code": out.exit.code,
            "stderr": trimmed(&out.stderr),
            "stdout": trimmed(&out.stdout),
        }),
    )
}

/// 200 diagnostic for a direct command that succeeded without printing anything.
pub fn empty_stdout_response(program: &str, stderr: &[u8]) -> Response {
    Response::json(
        200,
        &json!({
            "message": format!("{program} ran successfully but produced no stdout"),
            "stderr": trimmed(stderr),
        }),
    )
}
