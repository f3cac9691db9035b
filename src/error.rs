//! Error types
//!
//! Defines every error the polling engine can report. Construction and lookup
//! errors reach the caller synchronously; per-tag read failures are folded into
//! sample batches instead of being returned.

use thiserror::Error;

use crate::adapter::AdapterError;

/// Errors that can occur in the polling engine
#[derive(Error, Debug)]
pub enum ProcessLinkError {
    /// A required configuration field was absent
    #[error("Missing expected property: {0}")]
    MissingProperty(String),

    /// A configuration field was present but unusable
    #[error("Invalid property {key}: {reason}")]
    InvalidProperty { key: String, reason: String },

    /// No constructor is registered for a connection or tag type
    #[error("Unknown type: {0}")]
    UnknownType(UnknownType),

    /// Operation on a connection id the manager does not hold
    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    /// A connection with this id already exists
    #[error("Duplicate connection id: {0}")]
    DuplicateId(String),

    /// Reading a single tag failed
    #[error("Failed to read tag {tag_id}: {reason}")]
    TagRead { tag_id: String, reason: String },

    /// The polled-tag lock could not be acquired in time
    #[error("Timed out waiting for the polled-tag lock of connection {connection_id}")]
    LockTimeout { connection_id: String },

    /// The polling worker did not exit within the bounded wait
    #[error("Polling worker of connection {connection_id} did not stop in time")]
    StopTimeout { connection_id: String },

    /// Protocol adapter failure outside of a per-tag read
    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration store failure
    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Stored parameters could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Which registry lookup failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnknownType {
    Connection(String),
    Tag {
        connection_type: String,
        tag_type: String,
    },
}

impl std::fmt::Display for UnknownType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnknownType::Connection(name) => write!(f, "connection type '{}'", name),
            UnknownType::Tag {
                connection_type,
                tag_type,
            } => write!(
                f,
                "tag type '{}' for connection type '{}'",
                tag_type, connection_type
            ),
        }
    }
}

impl ProcessLinkError {
    /// Shorthand for [`ProcessLinkError::InvalidProperty`]
    pub fn invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        ProcessLinkError::InvalidProperty {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Result type alias for engine operations
pub type Result<T, E = ProcessLinkError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ProcessLinkError::MissingProperty("id".to_string());
        assert_eq!(err.to_string(), "Missing expected property: id");

        let err = ProcessLinkError::UnknownType(UnknownType::Tag {
            connection_type: "local".to_string(),
            tag_type: "modbus".to_string(),
        });
        assert_eq!(
            err.to_string(),
            "Unknown type: tag type 'modbus' for connection type 'local'"
        );
    }

    #[test]
    fn test_adapter_error_conversion() {
        let err: ProcessLinkError = AdapterError::Connect("refused".to_string()).into();
        assert!(matches!(err, ProcessLinkError::Adapter(_)));
    }
}
