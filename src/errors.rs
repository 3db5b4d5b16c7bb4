//! Error mapping guide:
//! - Spawn failures keep the program name so the 500 body can say what failed to start.
//! - Everything else is either an io::Error or a plain message.
//! - Render user-visible strings through `display_for_bridge_error` so HTTP bodies and logs agree.
use std::fmt;
use std::io;

#[derive(Debug)]
pub enum BridgeError {
    /// The OS refused to start the program (not found, not executable, ...).
    Spawn { program: String, source: io::Error },
    Io(io::Error),
    Message(String),
}

impl From<io::Error> for BridgeError {
    fn from(e: io::Error) -> Self {
        BridgeError::Io(e)
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&display_for_bridge_error(self))
    }
}

impl std::error::Error for BridgeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BridgeError::Spawn { source, .. } => Some(source),
            BridgeError::Io(e) => Some(e),
            BridgeError::Message(_) => None,
        }
    }
}

/// Render a user-facing string for BridgeError.
pub fn display_for_bridge_error(e: &BridgeError) -> String {
    match e {
        BridgeError::Spawn { program, source } => format!("spawn {program} failed: {source}"),
        BridgeError::Io(ioe) => ioe.to_string(),
        BridgeError::Message(s) => s.clone(),
    }
}

/// Map a BridgeError to a process exit code:
/// - 127 when the program was not found
/// - 1 for all other errors
pub fn exit_code_for_bridge_error(e: &BridgeError) -> u8 {
    match e {
        BridgeError::Spawn { source, .. } | BridgeError::Io(source)
            if source.kind() == io::ErrorKind::NotFound =>
        {
            127
        }
        _ => 1,
    }
}
