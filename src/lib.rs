//! gcloud-mcp-bridge: a small HTTP front for the gcloud CLI and the gcloud-mcp stdio helper.
//!
//! Each request is answered by exactly one of: a liveness probe (`GET /health`), a CLI
//! version check (`GET /diag`), a direct CLI run for `run_gcloud_command` bodies, or the
//! helper tool fed the raw body on stdin. See `dispatch` for the routing rules.

pub mod config;
pub mod dispatch;
pub mod errors;
pub mod http;
pub mod logging;
pub mod output;
pub mod process;
pub mod response;
pub mod server;

pub use config::BridgeConfig;
pub use dispatch::{parse_command_request, Dispatcher};
pub use errors::{display_for_bridge_error, exit_code_for_bridge_error, BridgeError};
pub use process::{ExitOutcome, Invocation, ProcessRunner, RunOutput, SystemRunner};
pub use response::{Responder, Response, ResponseState};
pub use server::{start_server, start_server_with, ServerHandle};
