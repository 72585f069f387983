//! Error types for the MTS runtime
//!
//! API-level operations (registration, connection, configuration) return
//! [`MtsResult`]. Command invocation never does: it reports through
//! [`ExecutionResult`](crate::command::ExecutionResult) codes so a failing
//! call cannot unwind across a component boundary.

use crate::command::ExecutionResult;
use thiserror::Error;

/// Result alias used throughout the crate
pub type MtsResult<T> = Result<T, MtsError>;

#[derive(Debug, Error)]
pub enum MtsError {
    /// A process, component, interface or command name could not be resolved
    #[error("No such interface or command: {0}")]
    NoSuchInterfaceOrCommand(String),

    /// A name is already registered in the scope that must keep it unique
    #[error("Duplicate name: {0}")]
    DuplicateName(String),

    /// A connection for the same required/provided pair already exists
    #[error("Already connected: {0}")]
    AlreadyConnected(String),

    /// Argument prototypes or command kinds do not line up
    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    /// Network or proxy failure (disconnect, timeout, closed session)
    #[error("Transport failure: {0}")]
    Transport(String),

    /// Corrupt or unrecognized encoded payload
    #[error("Serialization failure: {0}")]
    Serialization(String),

    /// Operation not allowed in the current lifecycle state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MtsError {
    pub fn config<S: Into<String>>(msg: S) -> Self {
        MtsError::Config(msg.into())
    }

    pub fn transport<S: Into<String>>(msg: S) -> Self {
        MtsError::Transport(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        MtsError::NoSuchInterfaceOrCommand(msg.into())
    }

    /// Whether this error came from the transport and should degrade a session
    pub fn is_transport(&self) -> bool {
        matches!(self, MtsError::Transport(_) | MtsError::Io(_))
    }

    /// Code reported when this error surfaces through a command invocation
    pub fn to_execution_result(&self) -> ExecutionResult {
        match self {
            MtsError::Transport(_) | MtsError::Io(_) => ExecutionResult::TransportFailure,
            MtsError::Serialization(_) => ExecutionResult::SerializationFailure,
            MtsError::TypeMismatch(_) => ExecutionResult::BadInput,
            MtsError::NoSuchInterfaceOrCommand(_) => ExecutionResult::InvalidCommandId,
            _ => ExecutionResult::MethodFailed,
        }
    }
}

impl From<bincode::Error> for MtsError {
    fn from(err: bincode::Error) -> Self {
        MtsError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for MtsError {
    fn from(err: serde_yaml::Error) -> Self {
        MtsError::Config(format!("YAML: {}", err))
    }
}

impl From<toml::de::Error> for MtsError {
    fn from(err: toml::de::Error) -> Self {
        MtsError::Config(format!("TOML: {}", err))
    }
}

impl From<serde_json::Error> for MtsError {
    fn from(err: serde_json::Error) -> Self {
        MtsError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_map_to_transport_failure() {
        let err = MtsError::transport("connection reset");
        assert!(err.is_transport());
        assert_eq!(err.to_execution_result(), ExecutionResult::TransportFailure);

        let io = MtsError::from(std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout"));
        assert!(io.is_transport());
    }

    #[test]
    fn test_display_includes_context() {
        let err = MtsError::not_found("component 'arm'");
        assert_eq!(
            err.to_string(),
            "No such interface or command: component 'arm'"
        );
    }
}
