//! Error type for kernel session operations.

use std::path::PathBuf;

/// Errors surfaced by [`crate::session::KernelSession`] and its collaborators.
///
/// Only [`SessionError::Connection`] is meant to reach the user as a hard
/// failure. Timeouts and malformed content are normally recovered where they
/// happen and turned into empty results.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Failed to connect to kernel: {0}")]
    Connection(String),

    #[error("No connection file found{}", .0.as_deref().map(|p| format!(" matching {p}")).unwrap_or_default())]
    NoConnectionFile(Option<String>),

    #[error("Failed to read connection file {path:?}: {reason}")]
    ConnectionFile { path: PathBuf, reason: String },

    #[error("Not connected to a kernel")]
    NotConnected,

    #[error("No reply from kernel within {0:?}")]
    Timeout(std::time::Duration),

    #[error("Malformed {msg_type} message: missing {field}")]
    MalformedMessage {
        msg_type: String,
        field: &'static str,
    },

    #[error("Kernel channel error: {0}")]
    Transport(String),

    #[error("Cannot determine the kernel's process id")]
    UnknownPid,

    #[error("Unable to signal pid {pid}: {reason}")]
    ProcessSignal { pid: u32, reason: String },

    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

impl SessionError {
    /// Whether this error came from establishing the connection.
    pub fn is_connection_failure(&self) -> bool {
        matches!(
            self,
            SessionError::Connection(_)
                | SessionError::NoConnectionFile(_)
                | SessionError::ConnectionFile { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
