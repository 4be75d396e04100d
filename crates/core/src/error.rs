//! Error types for Tessera
//!
//! This module defines every error surfaced by the identity cache, the
//! SQL generator, the trigger dispatcher and the row-store collaborator.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! ## Propagation
//!
//! - Registration and mapping errors indicate programmer error and are never retried.
//! - Backend errors are surfaced to the caller of the specific get/persist/delete.
//! - Trigger failures are collected, not propagated through the mutation that fired them.

use crate::event::EventKind;
use std::io;
use thiserror::Error;

/// Result type alias for Tessera operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Tessera
#[derive(Debug, Error)]
pub enum Error {
    /// Operation against an entity type that was never registered
    #[error("Entity type '{0}' is not registered")]
    UnregisteredType(String),

    /// The mapping layer cannot resolve columns for the type
    #[error("Entity type '{0}' has no field mapping")]
    UnmappedType(String),

    /// A second registration under an existing type name
    #[error("Entity type '{0}' is already registered")]
    DuplicateType(String),

    /// DDL request the dialect cannot express
    #[error("Dialect {dialect} does not support {feature}")]
    UnsupportedDialectFeature {
        /// Dialect name
        dialect: &'static str,
        /// Requested feature
        feature: String,
    },

    /// Row-store call failed or timed out
    #[error("Backend unavailable during {operation}: {reason}")]
    BackendUnavailable {
        /// Operation that required the backend
        operation: String,
        /// Failure reported by the row store
        reason: String,
    },

    /// A registered trigger raised during dispatch
    #[error("Trigger '{trigger}' failed on {event} of {entity_type}[{key}]: {reason}")]
    TriggerFailed {
        /// Name of the offending trigger
        trigger: String,
        /// Event being dispatched
        event: EventKind,
        /// Entity type of the event
        entity_type: String,
        /// Rendered identity key of the event
        key: String,
        /// Failure message
        reason: String,
    },

    /// Null/empty or otherwise invalid arguments
    #[error("Illegal argument: {0}")]
    IllegalArgument(String),

    /// A draft modifies a key the backend does not hold
    #[error("No {entity_type} with key {key}")]
    NotFound {
        /// Entity type name
        entity_type: String,
        /// Rendered identity key
        key: String,
    },

    /// A value does not fit the declared scalar type of its field
    #[error("Type mismatch for {field}: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Field (or column) name
        field: String,
        /// Declared scalar type
        expected: String,
        /// Observed value type
        actual: &'static str,
    },

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error (config files, database files)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// Backend failure for `operation`
    pub fn backend(operation: impl Into<String>, reason: impl ToString) -> Self {
        Error::BackendUnavailable {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Illegal argument with a message
    pub fn illegal(message: impl Into<String>) -> Self {
        Error::IllegalArgument(message.into())
    }

    /// Whether this error came from the row store
    pub fn is_backend(&self) -> bool {
        matches!(self, Error::BackendUnavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_unregistered() {
        let err = Error::UnregisteredType("Person".to_string());
        assert!(err.to_string().contains("Person"));
        assert!(err.to_string().contains("not registered"));
    }

    #[test]
    fn test_error_display_dialect_feature() {
        let err = Error::UnsupportedDialectFeature {
            dialect: "sqlite",
            feature: "clustered index".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("sqlite"));
        assert!(msg.contains("clustered index"));
    }

    #[test]
    fn test_error_display_trigger_failed() {
        let err = Error::TriggerFailed {
            trigger: "audit".to_string(),
            event: EventKind::Created,
            entity_type: "Person".to_string(),
            key: "1".to_string(),
            reason: "boom".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("audit"));
        assert!(msg.contains("created"));
        assert!(msg.contains("Person[1]"));
    }

    #[test]
    fn test_backend_constructor() {
        let err = Error::backend("select", "connection reset");
        assert!(err.is_backend());
        assert!(err.to_string().contains("connection reset"));
        assert!(!Error::illegal("x").is_backend());
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
