//! Error types for tagflow-core

use crate::Tag;
use std::fmt;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Why a connection between two ports was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionRejection {
    /// Source and destination are the same port
    SelfLoop,
    /// A caller port must be connected to a callee port and vice versa
    CallerCalleeMismatch,
    /// The destination already has a source (fan-in)
    AlreadyConnected,
    /// The destination is written by reactions of its container
    WrittenByReaction,
    /// The ports are not visible from the connecting reactor
    OutOfScope,
    /// Input ports can never feed output ports directly
    InputToOutput,
    /// The connection closes a dependency cycle
    Cycle,
    /// The connection adds a new input to output path at the reactor boundary
    ZeroDelayFeedback,
}

impl fmt::Display for ConnectionRejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            ConnectionRejection::SelfLoop => "self loop",
            ConnectionRejection::CallerCalleeMismatch => "caller/callee mismatch",
            ConnectionRejection::AlreadyConnected => "destination already has a source",
            ConnectionRejection::WrittenByReaction => "destination is written by reactions",
            ConnectionRejection::OutOfScope => "ports are out of scope",
            ConnectionRejection::InputToOutput => "input cannot feed an output",
            ConnectionRejection::Cycle => "connection introduces a cycle",
            ConnectionRejection::ZeroDelayFeedback => "connection introduces zero-delay feedback",
        };
        f.write_str(reason)
    }
}

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("Illegal connection from {src} to {dst}: {reason}")]
    IllegalConnection {
        src: String,
        dst: String,
        reason: ConnectionRejection,
    },

    #[error("Cycle detected in the precedence graph")]
    CycleDetected,

    #[error("Callee port {0} already has a procedure")]
    MultipleProcedures(String),

    #[error("Procedure {0} must have exactly one trigger")]
    ProcedureTriggers(String),

    #[error("Out of scope: {0}")]
    OutOfScope(String),

    #[error("Runtime already started")]
    AlreadyStarted,

    #[error("Runtime not started")]
    NotStarted,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Tag mismatch: expected {expected}, found {found}")]
    TagMismatch { expected: Tag, found: Tag },

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Trigger not found: {0}")]
    UnknownTrigger(String),

    #[error("Reactor not found: {0}")]
    UnknownReactor(String),

    #[error("Reaction not found: {0}")]
    UnknownReaction(String),

    #[error("Procedure {0} is already executing")]
    ReentrantInvocation(String),

    #[error("Not connected to a federation")]
    NotFederated,

    #[error("Reaction {reaction} failed: {source}")]
    ReactionFailed {
        reaction: String,
        #[source]
        source: Box<Error>,
    },

    #[error("{0}")]
    Custom(String),
}

impl Error {
    /// Create an error from user code inside a reaction body
    pub fn custom(message: impl Into<String>) -> Self {
        Error::Custom(message.into())
    }

    /// Check if this error is a configuration error (raised before any event is processed)
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Error::IllegalConnection { .. }
                | Error::CycleDetected
                | Error::MultipleProcedures(_)
                | Error::ProcedureTriggers(_)
                | Error::OutOfScope(_)
                | Error::Config(_)
        )
    }

    /// Get the rejection reason if this is an illegal connection
    pub fn rejection(&self) -> Option<ConnectionRejection> {
        match self {
            Error::IllegalConnection { reason, .. } => Some(*reason),
            Error::ReactionFailed { source, .. } => source.rejection(),
            _ => None,
        }
    }
}

impl From<ron::error::SpannedError> for Error {
    fn from(err: ron::error::SpannedError) -> Self {
        Error::Config(err.to_string())
    }
}

// Compile-time check that Error is Send + Sync.
fn _assert_error_send_sync<T: Send + Sync>() {}
fn _error_is_send_sync() {
    _assert_error_send_sync::<Error>();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_display() {
        let err = Error::IllegalConnection {
            src: "app.a.out".into(),
            dst: "app.b.in".into(),
            reason: ConnectionRejection::AlreadyConnected,
        };
        assert_eq!(
            err.to_string(),
            "Illegal connection from app.a.out to app.b.in: destination already has a source"
        );
        assert_eq!(err.rejection(), Some(ConnectionRejection::AlreadyConnected));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_reaction_failed_unwraps_rejection() {
        let err = Error::ReactionFailed {
            reaction: "app[M0]".into(),
            source: Box::new(Error::IllegalConnection {
                src: "a".into(),
                dst: "b".into(),
                reason: ConnectionRejection::Cycle,
            }),
        };
        assert_eq!(err.rejection(), Some(ConnectionRejection::Cycle));
        assert!(!err.is_configuration());
    }
}
