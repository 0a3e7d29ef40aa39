//! Error types for the lifecycle adapter and the remote protocol bridge.
//!
//! Every failure in the crate is an [`Error`]. Callers match on
//! [`Error::kind`] (a closed enumeration) rather than on specific variants,
//! so a local "not running" and a remote `container_not_running` reply are
//! handled the same way.

use crate::entity::{EntityKind, LifecycleState};
use crate::rpc::RemoteErrorCode;
use std::time::Duration;

/// Result type alias for adapter and bridge operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing pods and containers.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // =========================================================================
    // Resolution Errors
    // =========================================================================
    /// No container matches the given name, ID or ID prefix.
    #[error("no such container: {0}")]
    NoSuchContainer(String),

    /// No pod matches the given name, ID or ID prefix.
    #[error("no such pod: {0}")]
    NoSuchPod(String),

    /// `latest` was requested but no entity of that kind exists.
    #[error("no {0}s present, cannot select the latest one")]
    NoLatest(EntityKind),

    /// An ID prefix matched more than one entity.
    #[error("identifier '{token}' matches more than one {kind}")]
    AmbiguousId { token: String, kind: EntityKind },

    /// The caller's selection flags are inconsistent.
    #[error("invalid selector: {0}")]
    InvalidSelector(String),

    /// A caller-supplied value is malformed (unknown signal, bad name).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    // =========================================================================
    // Per-Entity Errors
    // =========================================================================
    /// Entity is in the wrong state for the requested operation.
    #[error("{kind} '{id}' is in state '{state}', expected {expected}")]
    InvalidState {
        kind: EntityKind,
        id: String,
        state: LifecycleState,
        expected: String,
    },

    /// Entity is not running (stop/kill in strict mode).
    #[error("{kind} '{id}' is not running")]
    NotRunning { kind: EntityKind, id: String },

    /// Entity must be stopped before it can be removed.
    #[error("{kind} '{id}' is {state} and not stopped; stop it first or use force")]
    NotStopped {
        kind: EntityKind,
        id: String,
        state: String,
    },

    /// Name is already held by another entity of the same kind.
    #[error("name '{0}' is already in use")]
    NameInUse(String),

    /// A member container of a pod failed during the pod's own fan-out.
    #[error("container '{container}': {source}")]
    MemberFailed {
        container: String,
        #[source]
        source: Box<Error>,
    },

    /// The underlying container runtime reported a failure.
    #[error("runtime failed to {operation} '{id}': {reason}")]
    RuntimeFailed {
        operation: String,
        id: String,
        reason: String,
    },

    /// A pool job panicked. Siblings are unaffected.
    #[error("job '{id}' panicked: {message}")]
    JobPanicked { id: String, message: String },

    // =========================================================================
    // Transport Errors
    // =========================================================================
    /// Operation exceeded its deadline.
    #[error("operation timed out after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// Peer closed the connection while a reply was outstanding.
    #[error("connection closed by peer during '{method}'")]
    ConnectionClosed { method: String },

    /// Channel was left in an unknown state by an earlier failure.
    #[error("channel is unusable after a previous failure, reconnect required")]
    ChannelPoisoned,

    /// Could not establish the remote connection.
    #[error("failed to connect to {address}: {source}")]
    ConnectFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Generic I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // =========================================================================
    // Protocol Errors
    // =========================================================================
    /// Well-formed reply carrying an application-level failure.
    #[error("remote error ({code}): {message}")]
    Remote {
        code: RemoteErrorCode,
        message: String,
    },

    /// Peer violated the wire protocol.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// JSON encoding or decoding failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Event record carried a value outside the closed wire enumerations.
    #[error("invalid event {field} '{value}'")]
    InvalidEvent { field: &'static str, value: String },

    // =========================================================================
    // Transfer Errors
    // =========================================================================
    /// Raw transfer moved a different number of bytes than declared.
    #[error("file transfer failed: expected {expected} bytes, got {actual}")]
    TransferLengthMismatch { expected: u64, actual: u64 },

    /// Raw transfer acknowledgement was malformed or missing.
    #[error("file transfer framing error: {0}")]
    TransferFraming(String),

    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Configuration failed validation or could not be parsed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Operation not available on this adapter.
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// Internal error (should not happen).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Closed classification of [`Error`] values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoSuchEntity,
    NoLatest,
    AmbiguousId,
    InvalidSelector,
    InvalidInput,
    InvalidState,
    NotRunning,
    NotStopped,
    NameInUse,
    RuntimeFailure,
    JobPanicked,
    Timeout,
    ConnectionClosed,
    ChannelPoisoned,
    Io,
    Remote,
    Protocol,
    InvalidEvent,
    TransferLength,
    TransferFraming,
    Config,
    NotSupported,
    Internal,
}

/// Coarse error taxonomy used to decide propagation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Selector cannot be satisfied; the whole call fails.
    Resolution,
    /// Per-entity failure; captured into a batch result.
    Entity,
    /// Connection-level failure; fatal to the call and the channel.
    Transport,
    /// Well-formed reply reporting an application failure.
    Protocol,
    /// Raw transfer framing or length failure.
    Transfer,
    /// Configuration or caller misuse.
    Usage,
    /// Bug or unexpected condition.
    Internal,
}

impl Error {
    /// Returns the closed kind of this error.
    ///
    /// Remote errors are mapped onto the same kinds as their local
    /// counterparts, and member failures report the member's kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoSuchContainer(_) | Self::NoSuchPod(_) => ErrorKind::NoSuchEntity,
            Self::NoLatest(_) => ErrorKind::NoLatest,
            Self::AmbiguousId { .. } => ErrorKind::AmbiguousId,
            Self::InvalidSelector(_) => ErrorKind::InvalidSelector,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::NotRunning { .. } => ErrorKind::NotRunning,
            Self::NotStopped { .. } => ErrorKind::NotStopped,
            Self::NameInUse(_) => ErrorKind::NameInUse,
            Self::MemberFailed { source, .. } => source.kind(),
            Self::RuntimeFailed { .. } => ErrorKind::RuntimeFailure,
            Self::JobPanicked { .. } => ErrorKind::JobPanicked,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ConnectionClosed { .. } | Self::ConnectFailed { .. } => {
                ErrorKind::ConnectionClosed
            }
            Self::ChannelPoisoned => ErrorKind::ChannelPoisoned,
            Self::Io(_) => ErrorKind::Io,
            Self::Remote { code, .. } => code.kind(),
            Self::Protocol(_) | Self::Serialization(_) => ErrorKind::Protocol,
            Self::InvalidEvent { .. } => ErrorKind::InvalidEvent,
            Self::TransferLengthMismatch { .. } => ErrorKind::TransferLength,
            Self::TransferFraming(_) => ErrorKind::TransferFraming,
            Self::InvalidConfig(_) => ErrorKind::Config,
            Self::NotSupported(_) => ErrorKind::NotSupported,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns the taxonomy class of this error.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Remote { .. } => ErrorCategory::Protocol,
            Self::MemberFailed { source, .. } => source.category(),
            _ => match self.kind() {
                ErrorKind::NoSuchEntity | ErrorKind::NoLatest | ErrorKind::AmbiguousId => {
                    ErrorCategory::Resolution
                }
                ErrorKind::InvalidState
                | ErrorKind::NotRunning
                | ErrorKind::NotStopped
                | ErrorKind::NameInUse
                | ErrorKind::RuntimeFailure
                | ErrorKind::JobPanicked => ErrorCategory::Entity,
                ErrorKind::Timeout
                | ErrorKind::ConnectionClosed
                | ErrorKind::ChannelPoisoned
                | ErrorKind::Io => ErrorCategory::Transport,
                ErrorKind::Remote | ErrorKind::Protocol | ErrorKind::InvalidEvent => {
                    ErrorCategory::Protocol
                }
                ErrorKind::TransferLength | ErrorKind::TransferFraming => {
                    ErrorCategory::Transfer
                }
                ErrorKind::InvalidSelector
                | ErrorKind::InvalidInput
                | ErrorKind::Config
                | ErrorKind::NotSupported => ErrorCategory::Usage,
                ErrorKind::Internal => ErrorCategory::Internal,
            },
        }
    }

    /// Returns true if this error leaves a connection in an unknown state.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        self.category() == ErrorCategory::Transport
    }

    /// Wraps a member container's error with the container's ID.
    pub(crate) fn member(container: impl Into<String>, source: Error) -> Self {
        Self::MemberFailed {
            container: container.into(),
            source: Box::new(source),
        }
    }

    /// Builds a "no such entity" error for the given kind.
    pub(crate) fn no_such(kind: EntityKind, token: impl Into<String>) -> Self {
        match kind {
            EntityKind::Pod => Self::NoSuchPod(token.into()),
            EntityKind::Container => Self::NoSuchContainer(token.into()),
        }
    }
}
