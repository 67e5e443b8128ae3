// taskboard-core/src/error.rs
//! Error taxonomy shared by the parser, the statistics merger and the
//! project service.

use thiserror::Error;

/// Context tag applied to store failures raised while parsing call data
pub const PARSING_CALL_DATA: &str = "parsing call data";

#[derive(Error, Debug)]
pub enum TaskboardError {
    /// A call-data value failed its shape, validator or existence check
    #[error("Invalid value for field '{field}': {message}")]
    ParseFailure {
        field: String,
        message: String,
        /// Offending id for failed existence checks
        id: Option<String>,
    },

    #[error("Invalid stats state: {0}")]
    InvalidStateFilter(String),

    #[error("Invalid project id: {0}")]
    InvalidProjectReference(String),

    /// Project still referenced by live tasks or models
    #[error("Project {id} has {count} {entity}, use force=true to delete")]
    BlockedDeletion {
        entity: String,
        id: String,
        count: u64,
    },

    #[error("Storage error while {context}: {message}")]
    Storage { context: String, message: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Aggregation error: {0}")]
    AggregationError(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TaskboardError {
    pub fn parse_failure(field: impl Into<String>, message: impl Into<String>) -> Self {
        TaskboardError::ParseFailure {
            field: field.into(),
            message: message.into(),
            id: None,
        }
    }

    /// Re-tag a lower-level store failure with the operation it happened in.
    ///
    /// Domain errors (parse failures, invalid references, blocked deletions,
    /// state filters) pass through untouched.
    pub fn in_context(self, context: &str) -> Self {
        match self {
            TaskboardError::Storage { message, .. } => TaskboardError::Storage {
                context: context.to_string(),
                message,
            },
            TaskboardError::InvalidQuery(message)
            | TaskboardError::AggregationError(message)
            | TaskboardError::Config(message) => TaskboardError::Storage {
                context: context.to_string(),
                message,
            },
            TaskboardError::Serialization(e) => TaskboardError::Storage {
                context: context.to_string(),
                message: e.to_string(),
            },
            TaskboardError::Io(e) => TaskboardError::Storage {
                context: context.to_string(),
                message: e.to_string(),
            },
            other => other,
        }
    }

    /// True for failures caused by the caller's input rather than the store
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            TaskboardError::ParseFailure { .. }
                | TaskboardError::InvalidStateFilter(_)
                | TaskboardError::InvalidProjectReference(_)
                | TaskboardError::BlockedDeletion { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, TaskboardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_are_retagged() {
        let err = TaskboardError::InvalidQuery("$in operator requires an array".to_string())
            .in_context(PARSING_CALL_DATA);
        match &err {
            TaskboardError::Storage { context, message } => {
                assert_eq!(context, PARSING_CALL_DATA);
                assert!(message.contains("$in"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(!err.is_client_error());
        assert!(err.to_string().contains("while parsing call data"));
    }

    #[test]
    fn test_domain_errors_pass_through() {
        let err = TaskboardError::parse_failure("tags", "expecting list").in_context("anything");
        assert!(matches!(err, TaskboardError::ParseFailure { ref field, .. } if field == "tags"));
        assert!(err.is_client_error());
    }

    #[test]
    fn test_blocked_deletion_message() {
        let err = TaskboardError::BlockedDeletion {
            entity: "tasks".to_string(),
            id: "p1".to_string(),
            count: 2,
        };
        assert_eq!(err.to_string(), "Project p1 has 2 tasks, use force=true to delete");
    }
}
