use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use gcloud_mcp_bridge::config::{resolve_program, BridgeConfig};
use gcloud_mcp_bridge::logging::init_logging;
use gcloud_mcp_bridge::{exit_code_for_bridge_error, start_server, BridgeError};

fn log_startup(cfg: &BridgeConfig) {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        build = env!("BRIDGE_BUILD_DATE"),
        target = env!("BRIDGE_BUILD_TARGET"),
        profile = env!("BRIDGE_BUILD_PROFILE"),
        rustc = env!("BRIDGE_BUILD_RUSTC"),
        "gcloud-mcp-bridge starting"
    );
    for program in [&cfg.cli_program, &cfg.helper_program] {
        match resolve_program(program) {
            Some(path) => tracing::info!(program = %program, path = %path.display(), "found on PATH"),
            None => tracing::warn!(program = %program, "not found on PATH; requests using it will fail"),
        }
    }
    match cfg.child_timeout() {
        Some(t) => tracing::info!(timeout_ms = t.as_millis() as u64, "helper timeout"),
        None => tracing::info!("helper timeout disabled"),
    }
}

fn run() -> anyhow::Result<()> {
    let cfg = BridgeConfig::parse();
    init_logging();
    log_startup(&cfg);

    let server = start_server(cfg.clone())
        .with_context(|| format!("failed to start server on {}", cfg.listen_addr()))?;
    tracing::info!("Server listening on port {}", server.port());
    server.wait();
    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("gcloud-mcp-bridge: {e:#}");
            let code = e
                .downcast_ref::<BridgeError>()
                .map(exit_code_for_bridge_error)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}
