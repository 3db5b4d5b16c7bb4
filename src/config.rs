//! Runtime configuration.
//!
//! Every setting is read from the environment (PORT, CHILD_TIMEOUT_MS, ...) and can also be
//! given as a `--flag`. Defaults mirror the historical Cloud Run deployment: port 8080, the
//! `gcloud` CLI for direct commands, and `npx -y @google-cloud/gcloud-mcp` as the stdio helper.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0";
pub const DEFAULT_CHILD_TIMEOUT_MS: u64 = 25_000;
pub const DEFAULT_CLI_PROGRAM: &str = "gcloud";
pub const DEFAULT_HELPER_PROGRAM: &str = "npx";
pub const DEFAULT_HELPER_ARGS: &str = "-y @google-cloud/gcloud-mcp";
pub const DEFAULT_MAX_BODY_BYTES: usize = 16 * 1024 * 1024;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 30_000;

/// Tag a structured body must carry to be run directly through the CLI.
pub const DIRECT_COMMAND_TAG: &str = "run_gcloud_command";

/// Arguments passed to the CLI by `GET /diag`.
pub const DIAG_ARGS: &[&str] = &["--version"];

#[derive(Parser, Debug, Clone)]
#[command(
    name = "gcloud-mcp-bridge",
    version,
    about = "Relay HTTP requests to the gcloud CLI or to a stdio helper tool"
)]
pub struct BridgeConfig {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Address to bind the listener to
    #[arg(long, env = "BIND_ADDR", default_value = DEFAULT_BIND_ADDR)]
    pub bind_addr: String,

    /// Kill the stdin-piped helper after this many milliseconds (0 disables the timeout)
    #[arg(long, env = "CHILD_TIMEOUT_MS", default_value_t = DEFAULT_CHILD_TIMEOUT_MS)]
    pub child_timeout_ms: u64,

    /// CLI used for /diag and for direct run_gcloud_command requests
    #[arg(long, env = "CLI_PROGRAM", default_value = DEFAULT_CLI_PROGRAM)]
    pub cli_program: String,

    /// Helper program fed the raw request body on stdin
    #[arg(long, env = "HELPER_PROGRAM", default_value = DEFAULT_HELPER_PROGRAM)]
    pub helper_program: String,

    /// Arguments for the helper program (shell-like quoting is honored)
    #[arg(
        long,
        env = "HELPER_ARGS",
        default_value = DEFAULT_HELPER_ARGS,
        allow_hyphen_values = true
    )]
    pub helper_args: String,

    /// Largest request body accepted, in bytes
    #[arg(long, env = "MAX_BODY_BYTES", default_value_t = DEFAULT_MAX_BODY_BYTES)]
    pub max_body_bytes: usize,

    /// Drop a client that sends nothing for this many milliseconds while its request is
    /// being read (0 waits forever)
    #[arg(long, env = "READ_TIMEOUT_MS", default_value_t = DEFAULT_READ_TIMEOUT_MS)]
    pub read_timeout_ms: u64,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        BridgeConfig {
            port: DEFAULT_PORT,
            bind_addr: DEFAULT_BIND_ADDR.to_string(),
            child_timeout_ms: DEFAULT_CHILD_TIMEOUT_MS,
            cli_program: DEFAULT_CLI_PROGRAM.to_string(),
            helper_program: DEFAULT_HELPER_PROGRAM.to_string(),
            helper_args: DEFAULT_HELPER_ARGS.to_string(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }
}

impl BridgeConfig {
    /// Helper deadline; `None` when CHILD_TIMEOUT_MS is 0.
    pub fn child_timeout(&self) -> Option<Duration> {
        Some(self.child_timeout_ms)
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
    }

    /// Socket read timeout while a request is arriving; `None` when READ_TIMEOUT_MS is 0.
    pub fn read_timeout(&self) -> Option<Duration> {
        Some(self.read_timeout_ms)
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
    }

    pub fn helper_argv(&self) -> Vec<String> {
        split_helper_args(&self.helper_args)
    }

    pub fn diag_argv(&self) -> Vec<String> {
        DIAG_ARGS.iter().map(|s| s.to_string()).collect()
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

/// Resolve a program on PATH for startup diagnostics. Absolute or relative paths are
/// returned as-is when they exist.
pub fn resolve_program(program: &str) -> Option<PathBuf> {
    if program.contains(std::path::MAIN_SEPARATOR) {
        let p = PathBuf::from(program);
        return if p.exists() { Some(p) } else { None };
    }
    which::which(program).ok()
}

/// Split HELPER_ARGS into words. Whitespace separates words, single quotes are literal,
/// double quotes group, and a backslash outside single quotes takes the next character
/// as-is. `''` is an empty word.
fn split_helper_args(s: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut word: Option<String> = None;
    let mut quote: Option<char> = None;
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        match (quote, c) {
            (Some('\''), '\'') => quote = None,
            (Some('\''), c) => word.get_or_insert_with(String::new).push(c),
            (_, '\\') => {
                if let Some(next) = chars.next() {
                    word.get_or_insert_with(String::new).push(next);
                }
            }
            (Some('"'), '"') => quote = None,
            (None, '\'' | '"') => {
                quote = Some(c);
                word.get_or_insert_with(String::new);
            }
            (None, c) if c.is_whitespace() => words.extend(word.take()),
            (_, c) => word.get_or_insert_with(String::new).push(c),
        }
    }
    words.extend(word);
    words
}
