//! Stamps the binary with BRIDGE_BUILD_{DATE,TARGET,PROFILE,RUSTC} for the startup log line.

use std::process::Command;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

fn main() {
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-env-changed=SOURCE_DATE_EPOCH");

    emit("BRIDGE_BUILD_DATE", build_date());
    emit("BRIDGE_BUILD_TARGET", cargo_var("TARGET"));
    emit("BRIDGE_BUILD_PROFILE", cargo_var("PROFILE"));
    emit("BRIDGE_BUILD_RUSTC", rustc_version());
}

fn emit(key: &str, value: String) {
    println!("cargo:rustc-env={key}={value}");
}

fn cargo_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| "unknown".to_string())
}

/// RFC 3339 UTC. SOURCE_DATE_EPOCH wins so reproducible builds get a stable stamp.
fn build_date() -> String {
    let when = std::env::var("SOURCE_DATE_EPOCH")
        .ok()
        .and_then(|s| s.trim().parse::<u64>().ok())
        .map(|secs| UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap_or_else(SystemTime::now);
    humantime::format_rfc3339_seconds(when).to_string()
}

fn rustc_version() -> String {
    let rustc = std::env::var_os("RUSTC").unwrap_or_else(|| "rustc".into());
    Command::new(rustc)
        .arg("--version")
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
