//! Tracing subscriber setup: human-readable lines on stderr, filtered by RUST_LOG.

use once_cell::sync::OnceCell;
use tracing_subscriber::EnvFilter;

static INIT: OnceCell<()> = OnceCell::new();

const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber once; later calls are no-ops.
pub fn init_logging() {
    INIT.get_or_init(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
        let res = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .try_init();
        if let Err(e) = res {
            // Another subscriber (e.g. from a test harness) is already installed.
            eprintln!("gcloud-mcp-bridge: logging already initialized: {e}");
        }
    });
}

/// Strip trailing newlines for one-line log output; `<empty>` for empty captures.
pub(crate) fn log_excerpt(bytes: &[u8]) -> String {
    let s = String::from_utf8_lossy(bytes);
    let trimmed = s.trim_end_matches(&['\n', '\r'][..]);
    if trimmed.is_empty() {
        "<empty>".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_trims_newlines() {
        assert_eq!(log_excerpt(b"hello\n\n"), "hello");
        assert_eq!(log_excerpt(b""), "<empty>");
        assert_eq!(log_excerpt(b"\n"), "<empty>");
        assert_eq!(log_excerpt(b"  x  \n"), "  x  ");
    }

    #[test]
    fn init_is_idempotent() {
        init_logging();
        init_logging();
    }
}
