//! Error types for the Pod Resource Manager
//!
//! Provides structured error types for every stage of a pod operation:
//! session establishment, inventory discovery, composition planning,
//! composition execution and power control.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Why a session to a pod could not be established or was lost
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionFailure {
    /// The remote side closed the connection during login
    ClosedByRemote,
    /// No prompt or response arrived within the session timeout
    Timeout,
    /// The transport reached end-of-stream unexpectedly
    Eof,
    /// The endpoint could not be reached at all
    Unreachable,
}

impl fmt::Display for ConnectionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionFailure::ClosedByRemote => write!(f, "connection closed by remote host"),
            ConnectionFailure::Timeout => write!(f, "timed out"),
            ConnectionFailure::Eof => write!(f, "unexpected end of stream"),
            ConnectionFailure::Unreachable => write!(f, "unreachable"),
        }
    }
}

/// Kind of capacity exhausted when a compose request cannot be satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    LocalStorage,
    RemoteStorage,
    Cores,
    Memory,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceKind::LocalStorage => write!(f, "local storage"),
            ResourceKind::RemoteStorage => write!(f, "remote iSCSI storage"),
            ResourceKind::Cores => write!(f, "cores"),
            ResourceKind::Memory => write!(f, "memory"),
        }
    }
}

/// Unified error type for pod operations
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Session Errors
    // =========================================================================
    #[error("Connection to {endpoint} failed: {failure}")]
    Connection {
        endpoint: String,
        failure: ConnectionFailure,
    },

    #[error("Authentication to {endpoint} rejected: {reason}")]
    Authentication { endpoint: String, reason: String },

    // =========================================================================
    // Discovery Errors
    // =========================================================================
    #[error("Incomplete data for {resource}: {reason}")]
    PartialDiscovery { resource: String, reason: String },

    #[error("Unsupported architecture: {architecture}")]
    UnsupportedArchitecture { architecture: String },

    #[error("Failed to parse output of '{command}': {reason}")]
    Parse { command: String, reason: String },

    // =========================================================================
    // Planning Errors
    // =========================================================================
    #[error("Insufficient {kind}: {detail}")]
    InsufficientResources { kind: ResourceKind, detail: String },

    #[error("No viable network attachment: {0}")]
    NoViableNetwork(String),

    // =========================================================================
    // Execution Errors
    // =========================================================================
    #[error("Pod reported a terminal failure: {0}")]
    PodFatal(String),

    #[error("Pod rejected {action}: {message}")]
    PodAction { action: String, message: String },

    #[error("Timed out after {waited:?} waiting for {operation}")]
    Timeout { operation: String, waited: Duration },

    // =========================================================================
    // Encoding Errors
    // =========================================================================
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("XML error: {0}")]
    Xml(String),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<quick_xml::Error> for Error {
    fn from(err: quick_xml::Error) -> Self {
        Error::Xml(err.to_string())
    }
}

/// Action the calling orchestrator should take on error.
///
/// The core never retries on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Retry the whole operation with backoff
    RetryWithBackoff,
    /// Retry after a specific duration
    RetryAfter(Duration),
    /// Operator input or pod configuration must change first
    NoRetry,
}

impl Error {
    /// Build a `PodAction` error
    pub fn pod_action(action: impl Into<String>, message: impl Into<String>) -> Self {
        Error::PodAction {
            action: action.into(),
            message: message.into(),
        }
    }

    /// Build an `InsufficientResources` error
    pub fn insufficient(kind: ResourceKind, detail: impl Into<String>) -> Self {
        Error::InsufficientResources {
            kind,
            detail: detail.into(),
        }
    }

    /// Determine what action the caller should take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Transport problems - retry with backoff
            Error::Connection { .. } | Error::Http(_) | Error::Io(_) => {
                ErrorAction::RetryWithBackoff
            }

            // Asynchronous remote work that did not settle
            Error::Timeout { .. } => ErrorAction::RetryAfter(Duration::from_secs(60)),

            // Capacity may free up as other machines are decomposed
            Error::InsufficientResources { .. } => {
                ErrorAction::RetryAfter(Duration::from_secs(300))
            }

            // Needs an operator
            Error::Authentication { .. }
            | Error::Configuration(_)
            | Error::UnsupportedArchitecture { .. }
            | Error::NoViableNetwork(_)
            | Error::PodFatal(_)
            | Error::PodAction { .. } => ErrorAction::NoRetry,

            _ => ErrorAction::NoRetry,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRetry)
    }

    /// Check if this error came from a connection that was closed or refused,
    /// as opposed to one that merely timed out.
    pub fn is_connection_closed(&self) -> bool {
        matches!(
            self,
            Error::Connection {
                failure: ConnectionFailure::ClosedByRemote | ConnectionFailure::Eof,
                ..
            }
        )
    }

    /// The session to the pod is unusable, so no further call can succeed.
    /// Any other error reading one machine only excludes that machine.
    pub fn is_session_fatal(&self) -> bool {
        matches!(self, Error::Connection { .. } | Error::Authentication { .. })
    }

    /// Errors raised while planning never touched remote state
    pub fn is_planning_failure(&self) -> bool {
        matches!(
            self,
            Error::InsufficientResources { .. }
                | Error::NoViableNetwork(_)
                | Error::UnsupportedArchitecture { .. }
        )
    }
}

/// Result type alias for pod operations
pub type Result<T> = std::result::Result<T, Error>;
