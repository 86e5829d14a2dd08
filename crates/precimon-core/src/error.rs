//! Fatal errors of an agent run and their process exit codes.

use crate::collector::procfs::CollectError;
use crate::writer::WriterError;
use std::io;

/// Exit status for an unreadable required source or invalid configuration.
pub const EXIT_SOURCE: i32 = 1;
/// Exit status for a document nesting violation.
pub const EXIT_NESTING: i32 = 70;
/// Exit status for a failed sink write.
pub const EXIT_SINK: i32 = 99;

/// Error that stops the run.
#[derive(Debug)]
pub enum AgentError {
    /// A required `/proc` file could not be read.
    Source { path: String, source: io::Error },
    /// Process table enumeration failed.
    Collect(CollectError),
    /// Writer open/close calls did not nest.
    Nesting(WriterError),
    /// The sink rejected a buffer.
    Sink(io::Error),
    /// Invalid agent settings.
    Config(String),
}

impl AgentError {
    pub fn unreadable(path: impl Into<String>, source: io::Error) -> Self {
        AgentError::Source {
            path: path.into(),
            source,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            AgentError::Source { .. } | AgentError::Collect(_) | AgentError::Config(_) => {
                EXIT_SOURCE
            }
            AgentError::Nesting(_) => EXIT_NESTING,
            AgentError::Sink(_) => EXIT_SINK,
        }
    }
}

impl std::fmt::Display for AgentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AgentError::Source { path, source } => write!(f, "cannot read {}: {}", path, source),
            AgentError::Collect(e) => write!(f, "process collection failed: {}", e),
            AgentError::Nesting(e) => write!(f, "document nesting violation: {}", e),
            AgentError::Sink(e) => write!(f, "output write failed: {}", e),
            AgentError::Config(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for AgentError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AgentError::Source { source, .. } => Some(source),
            AgentError::Collect(e) => Some(e),
            AgentError::Nesting(e) => Some(e),
            AgentError::Sink(e) => Some(e),
            AgentError::Config(_) => None,
        }
    }
}

impl From<WriterError> for AgentError {
    fn from(e: WriterError) -> Self {
        AgentError::Nesting(e)
    }
}

impl From<CollectError> for AgentError {
    fn from(e: CollectError) -> Self {
        AgentError::Collect(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes() {
        let e = AgentError::unreadable("/proc/stat", io::Error::from(io::ErrorKind::NotFound));
        assert_eq!(e.exit_code(), 1);

        let e = AgentError::from(WriterError::ElementOutsideArray);
        assert_eq!(e.exit_code(), 70);

        let e = AgentError::Sink(io::Error::from(io::ErrorKind::BrokenPipe));
        assert_eq!(e.exit_code(), 99);
    }

    #[test]
    fn test_display_names_path() {
        let e = AgentError::unreadable("/proc/diskstats", io::Error::from(io::ErrorKind::NotFound));
        assert!(e.to_string().contains("/proc/diskstats"));
    }
}
