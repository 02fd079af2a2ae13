//! Error types for vmagent.
//!
//! Messages follow one format: `"<operation> failed: <reason>"` for failures
//! and `"<entity> not found: <identifier>"` for lookups, all lowercase, with
//! the session host id or assignment id included whenever one is known.

use crate::state::ResourceRetrievalResult;
use thiserror::Error;
use vmagent_protocol::SessionHostStatus;

/// Result type alias using vmagent's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in vmagent operations.
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Session Host Errors
    // ========================================================================
    /// A heartbeat claimed a status the host may not move to.
    #[error("invalid transition for session host {session_host_id}: {from} -> {to}")]
    InvalidTransition {
        /// Session host that sent the heartbeat.
        session_host_id: String,
        /// Previously recorded status.
        from: SessionHostStatus,
        /// Claimed status.
        to: SessionHostStatus,
    },

    /// Session host id is not in the map.
    #[error("session host not found: {id}")]
    SessionHostNotFound {
        /// Unknown id.
        id: String,
    },

    // ========================================================================
    // Assignment Errors
    // ========================================================================
    /// The VM is already serving a different assignment.
    #[error("assignment conflict: vm holds {current}, requested {requested}")]
    AssignmentConflict {
        /// Assignment currently held.
        current: String,
        /// Assignment that was requested.
        requested: String,
    },

    /// The VM is in the wrong state for the requested operation.
    #[error("invalid vm state: expected {expected}, got {actual}")]
    InvalidState {
        /// Expected state(s).
        expected: String,
        /// Actual state.
        actual: String,
    },

    /// The assignment document failed validation.
    #[error("invalid start info: {0}")]
    InvalidStartInfo(String),

    // ========================================================================
    // Collaborator Errors
    // ========================================================================
    /// Asset, image or certificate retrieval failed.
    #[error("{resource} retrieval failed ({outcome:?}): {reason}")]
    Retrieval {
        /// Which resource ("asset", "image", "certificate").
        resource: String,
        /// Classified outcome recorded in the persisted state.
        outcome: ResourceRetrievalResult,
        /// Underlying reason.
        reason: String,
    },

    /// Session host runner operation failed.
    #[error("runner operation failed: {operation}: {reason}")]
    Runner {
        /// The operation that failed (e.g. "create", "stop", "collect logs").
        operation: String,
        /// The reason for the failure.
        reason: String,
    },

    /// External command failed.
    #[error("command '{command}' failed: {reason}")]
    CommandFailed {
        /// The command that failed.
        command: String,
        /// Error message or exit status.
        reason: String,
    },

    // ========================================================================
    // Persistence and Configuration Errors
    // ========================================================================
    /// Persisted state could not be read or written.
    #[error("persisted state operation failed: {operation}: {reason}")]
    Persistence {
        /// The operation that failed (e.g. "read", "parse", "write").
        operation: String,
        /// The reason for the failure.
        reason: String,
    },

    /// Configuration operation failed.
    #[error("config operation failed: {operation}: {reason}")]
    Config {
        /// The operation that failed (e.g. "load", "parse").
        operation: String,
        /// The reason for the failure.
        reason: String,
    },

    // ========================================================================
    // IO Errors
    // ========================================================================
    /// IO error wrapper.
    #[error("io operation failed: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a session host not found error.
    pub fn session_host_not_found(id: impl Into<String>) -> Self {
        Self::SessionHostNotFound { id: id.into() }
    }

    /// Create an invalid state error.
    pub fn invalid_state(expected: impl Into<String>, actual: impl std::fmt::Display) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            actual: actual.to_string(),
        }
    }

    /// Create a retrieval error with a classified outcome.
    pub fn retrieval(
        resource: impl Into<String>,
        outcome: ResourceRetrievalResult,
        reason: impl Into<String>,
    ) -> Self {
        Self::Retrieval {
            resource: resource.into(),
            outcome,
            reason: reason.into(),
        }
    }

    /// Create a runner error.
    pub fn runner(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Runner {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a command failure error.
    pub fn command_failed(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CommandFailed {
            command: command.into(),
            reason: reason.into(),
        }
    }

    /// Create a persistence error.
    pub fn persistence(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Persistence {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error.
    pub fn config(operation: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Config {
            operation: operation.into(),
            reason: reason.into(),
        }
    }

    /// Retrieval outcome carried by this error.
    ///
    /// Errors that were not classified at the source count as
    /// [`ResourceRetrievalResult::Other`].
    pub fn retrieval_outcome(&self) -> ResourceRetrievalResult {
        match self {
            Error::Retrieval { outcome, .. } => *outcome,
            _ => ResourceRetrievalResult::Other,
        }
    }
}
