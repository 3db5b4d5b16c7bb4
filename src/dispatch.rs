/*!
Request dispatcher: picks one of four branches per request and builds its response.

- `GET /health`: liveness JSON with the current time.
- `GET /diag`: `<cli> --version`.
- body is `{"tool":"run_gcloud_command","input":{"args":[...]}}`: `<cli> <args...>`.
- anything else: the raw body is piped into the helper's stdin under a deadline.

Processes run through a `ProcessRunner`, so every branch can be exercised with a fake.
*/

use std::time::SystemTime;

use serde::Deserialize;
use serde_json::json;

use crate::config::{BridgeConfig, DIRECT_COMMAND_TAG};
use crate::http::{HttpRequest, Route};
use crate::logging::log_excerpt;
use crate::output::{
    empty_stdout_response, nonzero_exit_response, spawn_failure_response, stdout_response,
    try_parse_json,
};
use crate::process::{Invocation, ProcessRunner, RunOutput};
use crate::response::Response;

/// Body shape that asks for a direct CLI run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandRequest {
    pub tool: String,
    pub input: CommandInput,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CommandInput {
    pub args: Vec<String>,
}

/// Recognize a direct-command body. Anything else (not JSON, other tag, missing or
/// non-string args) is `None` and the request falls through to the helper.
pub fn parse_command_request(body: &[u8]) -> Option<CommandRequest> {
    let value = try_parse_json(body)?;
    let req: CommandRequest = serde_json::from_value(value).ok()?;
    if req.tool == DIRECT_COMMAND_TAG {
        Some(req)
    } else {
        None
    }
}

/// `{"status":"ok","time":"2026-10-16T08:15:00.123Z"}`
pub fn health_response() -> Response {
    let now = humantime::format_rfc3339_millis(SystemTime::now()).to_string();
    Response::json(200, &json!({ "status": "ok", "time": now }))
}

pub struct Dispatcher<R: ProcessRunner> {
    runner: R,
    config: BridgeConfig,
}

impl<R: ProcessRunner> Dispatcher<R> {
    pub fn new(runner: R, config: BridgeConfig) -> Self {
        Dispatcher { runner, config }
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    #[cfg(test)]
    pub(crate) fn runner(&self) -> &R {
        &self.runner
    }

    /// Produce the single response for `req`.
    pub fn dispatch(&self, req: &HttpRequest) -> Response {
        tracing::info!(
            method = %req.method,
            target = %req.target,
            body_len = req.body.len(),
            "request received"
        );
        match req.route() {
            Route::Health => health_response(),
            Route::Diag => self.diag(),
            Route::Relay => match parse_command_request(&req.body) {
                Some(cmd) => self.run_direct(cmd.input.args),
                None => self.run_helper(&req.body),
            },
        }
    }

    fn diag(&self) -> Response {
        let inv = Invocation::new(self.config.cli_program.clone()).args(self.config.diag_argv());
        match self.runner.run(&inv) {
            Err(e) => {
                tracing::error!(program = %inv.program, args = ?inv.args, error = %e, "diagnostic command failed to start");
                spawn_failure_response(&e, b"")
            }
            Ok(out) if !out.exit.success() => nonzero_exit_response(&out),
            Ok(out) => Response::text(200, out.stdout),
        }
    }

    fn run_direct(&self, args: Vec<String>) -> Response {
        tracing::info!("direct {DIRECT_COMMAND_TAG} request; running the CLI directly");
        let inv = Invocation::new(self.config.cli_program.clone()).args(args);
        let out = match self.runner.run(&inv) {
            Ok(out) => out,
            Err(e) => {
                tracing::error!(program = %inv.program, args = ?inv.args, error = %e, "CLI failed to start");
                return spawn_failure_response(&e, b"");
            }
        };
        log_finished(&inv, &out);

        if !out.exit.success() {
            return nonzero_exit_response(&out);
        }
        if out.stdout.iter().all(|b| b.is_ascii_whitespace()) {
            return empty_stdout_response(&self.config.cli_program, &out.stderr);
        }
        stdout_response(&out.stdout)
    }

    fn run_helper(&self, body: &[u8]) -> Response {
        let inv = Invocation::new(self.config.helper_program.clone())
            .args(self.config.helper_argv())
            .stdin(body.to_vec())
            .timeout(self.config.child_timeout());
        tracing::info!(program = %inv.program, args = ?inv.args, "spawning helper");
        let out = match self.runner.run(&inv) {
            Ok(out) => out,
            Err(e) => {
                tracing::error!(program = %inv.program, args = ?inv.args, error = %e, "helper failed to start");
                return spawn_failure_response(&e, b"");
            }
        };
        log_finished(&inv, &out);

        if !out.exit.success() {
            return nonzero_exit_response(&out);
        }
        stdout_response(&out.stdout)
    }
}

fn log_finished(inv: &Invocation, out: &RunOutput) {
    tracing::info!(
        program = %inv.program,
        code = ?out.exit.code,
        signal = ?out.exit.signal,
        timed_out = out.timed_out,
        elapsed_ms = out.duration.as_millis() as u64,
        "child exited"
    );
    tracing::debug!(stdout = %log_excerpt(&out.stdout), "captured stdout");
    tracing::debug!(stderr = %log_excerpt(&out.stderr), "captured stderr");
}
