//! Pipeline error taxonomy
//!
//! Every store-side error carries the destination identity, the table or
//! collection involved, the offending fields where they are known, and the
//! backend's native error text.

use thiserror::Error;

/// Errors surfaced to the caller of a write
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Store unreachable, malformed pool options, or pool exhaustion
    #[error("connection error on {identity}: {detail}")]
    Connection { identity: String, detail: String },

    /// Malformed or ambiguous input item
    #[error("malformed item for '{table}': {detail}")]
    Shape { table: String, detail: String },

    /// DDL failure other than "already exists"; the write is not attempted
    #[error("schema change on {identity} table '{table}' (fields: {}) failed: {detail}", .fields.join(", "))]
    SchemaApply {
        identity: String,
        table: String,
        fields: Vec<String>,
        detail: String,
    },

    /// Unique-constraint violation on a plain insert in strict mode
    #[error("duplicate key on {identity} table '{table}': {detail}")]
    DuplicateKey {
        identity: String,
        table: String,
        detail: String,
    },

    /// Any other backend rejection
    #[error("write to {identity} table '{table}' (fields: {}) failed: {detail}", .fields.join(", "))]
    Write {
        identity: String,
        table: String,
        fields: Vec<String>,
        detail: String,
    },

    /// The caller's deadline expired during `operation`
    #[error("deadline exceeded on {identity} during {operation}")]
    Timeout { identity: String, operation: String },
}

impl PipelineError {
    pub(crate) fn shape(table: &str, detail: impl Into<String>) -> Self {
        PipelineError::Shape {
            table: table.to_string(),
            detail: detail.into(),
        }
    }

    pub(crate) fn connection(identity: &str, detail: impl ToString) -> Self {
        PipelineError::Connection {
            identity: identity.to_string(),
            detail: detail.to_string(),
        }
    }

    /// Whether the error is a deadline expiry
    pub fn is_timeout(&self) -> bool {
        matches!(self, PipelineError::Timeout { .. })
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_carry_identity_and_fields() {
        let err = PipelineError::SchemaApply {
            identity: "sqlite:///tmp/a.db".to_string(),
            table: "posts".to_string(),
            fields: vec!["likes".to_string(), "shares".to_string()],
            detail: "disk I/O error".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("sqlite:///tmp/a.db"));
        assert!(msg.contains("posts"));
        assert!(msg.contains("likes, shares"));
        assert!(msg.contains("disk I/O error"));
    }

    #[test]
    fn test_is_timeout() {
        let err = PipelineError::Timeout {
            identity: "x".to_string(),
            operation: "insert".to_string(),
        };
        assert!(err.is_timeout());
        assert!(!PipelineError::shape("t", "bad").is_timeout());
    }
}
