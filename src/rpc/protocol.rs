//! Wire protocol of the remote management service.
//!
//! # Protocol Format
//!
//! - **Transport**: Unix socket or TCP
//! - **Encoding**: JSON
//! - **Framing**: Newline-delimited (each message ends with `\n`)
//!
//! # Call/Reply Flow
//!
//! ```text
//! Client                                  Service
//!   |  {"method":"StopContainer",...}\n      |
//!   |--------------------------------------->|
//!   |  {"parameters":{...}}\n                |
//!   |<---------------------------------------|
//!   |                                        |
//!   |  {"method":"GetEvents","more":true}\n  |
//!   |--------------------------------------->|
//!   |  {"parameters":{...},"continues":true} |
//!   |<---------------------------------------|   (zero or more)
//!   |  {"parameters":{...}}\n                |
//!   |<---------------------------------------|   (terminal)
//! ```
//!
//! A call flagged `upgrade` turns the connection into a raw byte stream
//! once the service has replied; see [`crate::transfer`].

use crate::error::{Error, ErrorKind, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// =============================================================================
// Method Names
// =============================================================================

/// Method names understood by the remote service.
pub mod methods {
    pub const GET_CONTAINERS_BY_CONTEXT: &str = "GetContainersByContext";
    pub const GET_PODS_BY_CONTEXT: &str = "GetPodsByContext";
    pub const LIST_CONTAINERS: &str = "ListContainers";
    pub const LIST_PODS: &str = "ListPods";

    pub const START_CONTAINER: &str = "StartContainer";
    pub const STOP_CONTAINER: &str = "StopContainer";
    pub const KILL_CONTAINER: &str = "KillContainer";
    pub const PAUSE_CONTAINER: &str = "PauseContainer";
    pub const UNPAUSE_CONTAINER: &str = "UnpauseContainer";
    pub const RESTART_CONTAINER: &str = "RestartContainer";
    pub const REMOVE_CONTAINER: &str = "RemoveContainer";
    pub const PRUNE_CONTAINERS: &str = "PruneContainers";
    pub const EXPORT_CONTAINER: &str = "ExportContainer";

    pub const START_POD: &str = "StartPod";
    pub const STOP_POD: &str = "StopPod";
    pub const KILL_POD: &str = "KillPod";
    pub const PAUSE_POD: &str = "PausePod";
    pub const UNPAUSE_POD: &str = "UnpausePod";
    pub const RESTART_POD: &str = "RestartPod";
    pub const REMOVE_POD: &str = "RemovePod";
    pub const PRUNE_PODS: &str = "PrunePods";

    pub const SEND_FILE: &str = "SendFile";
    pub const RECEIVE_FILE: &str = "ReceiveFile";
    pub const GET_EVENTS: &str = "GetEvents";
}

fn is_false(b: &bool) -> bool {
    !*b
}

// =============================================================================
// Call
// =============================================================================

/// Request from client to service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    /// Method name.
    pub method: String,
    /// Method parameters (object or null).
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub parameters: Value,
    /// Caller accepts multiple replies.
    #[serde(default, skip_serializing_if = "is_false")]
    pub more: bool,
    /// Connection switches to raw mode after the reply.
    #[serde(default, skip_serializing_if = "is_false")]
    pub upgrade: bool,
}

impl Call {
    /// A plain request expecting exactly one reply.
    #[must_use]
    pub fn new(method: impl Into<String>, parameters: Value) -> Self {
        Self {
            method: method.into(),
            parameters,
            more: false,
            upgrade: false,
        }
    }

    /// A request expecting a stream of replies.
    #[must_use]
    pub fn streaming(method: impl Into<String>, parameters: Value) -> Self {
        Self {
            more: true,
            ..Self::new(method, parameters)
        }
    }

    /// A request that upgrades the connection to raw mode.
    #[must_use]
    pub fn upgrading(method: impl Into<String>, parameters: Value) -> Self {
        Self {
            upgrade: true,
            ..Self::new(method, parameters)
        }
    }

    /// Serializes to a JSON line (with trailing newline).
    pub fn to_json_line(&self) -> Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Parses from a JSON line.
    pub fn from_json(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }
}

// =============================================================================
// Reply
// =============================================================================

/// Response from service to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    /// Reply payload.
    #[serde(default)]
    pub parameters: Value,
    /// More replies follow for the same call.
    #[serde(default, skip_serializing_if = "is_false")]
    pub continues: bool,
    /// Application-level failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

impl Reply {
    /// Final successful reply.
    #[must_use]
    pub fn ok(parameters: Value) -> Self {
        Self {
            parameters,
            continues: false,
            error: None,
        }
    }

    /// Intermediate reply of a stream.
    #[must_use]
    pub fn chunk(parameters: Value) -> Self {
        Self {
            continues: true,
            ..Self::ok(parameters)
        }
    }

    /// Error reply.
    #[must_use]
    pub fn failure(code: RemoteErrorCode, message: impl Into<String>) -> Self {
        Self {
            parameters: Value::Null,
            continues: false,
            error: Some(RemoteError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Serializes to a JSON line (with trailing newline).
    pub fn to_json_line(&self) -> Result<String> {
        let mut json = serde_json::to_string(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Parses from a JSON line.
    pub fn from_json(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }

    /// Returns the payload, or the carried error.
    pub fn into_result(self) -> Result<Value> {
        match self.error {
            Some(err) => Err(err.into()),
            None => Ok(self.parameters),
        }
    }
}

/// Error carried by a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Error code.
    pub code: RemoteErrorCode,
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
}

impl From<RemoteError> for Error {
    fn from(err: RemoteError) -> Self {
        Error::Remote {
            code: err.code,
            message: err.message,
        }
    }
}

/// Error codes returned by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorCode {
    NoSuchContainer,
    NoSuchPod,
    NoLatest,
    AmbiguousId,
    InvalidState,
    ContainerNotRunning,
    ContainerNotStopped,
    PodNotStopped,
    NameInUse,
    RuntimeFailure,
    InvalidArgument,
    MethodNotFound,
    Internal,
    /// Any code this client does not know.
    #[serde(other)]
    Unknown,
}

impl RemoteErrorCode {
    /// Local error kind equivalent to this code.
    #[must_use]
    pub fn kind(self) -> ErrorKind {
        match self {
            Self::NoSuchContainer | Self::NoSuchPod => ErrorKind::NoSuchEntity,
            Self::NoLatest => ErrorKind::NoLatest,
            Self::AmbiguousId => ErrorKind::AmbiguousId,
            Self::InvalidState => ErrorKind::InvalidState,
            Self::ContainerNotRunning => ErrorKind::NotRunning,
            Self::ContainerNotStopped | Self::PodNotStopped => ErrorKind::NotStopped,
            Self::NameInUse => ErrorKind::NameInUse,
            Self::RuntimeFailure => ErrorKind::RuntimeFailure,
            Self::InvalidArgument => ErrorKind::InvalidInput,
            Self::MethodNotFound => ErrorKind::NotSupported,
            Self::Internal | Self::Unknown => ErrorKind::Remote,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::NoSuchContainer => "no_such_container",
            Self::NoSuchPod => "no_such_pod",
            Self::NoLatest => "no_latest",
            Self::AmbiguousId => "ambiguous_id",
            Self::InvalidState => "invalid_state",
            Self::ContainerNotRunning => "container_not_running",
            Self::ContainerNotStopped => "container_not_stopped",
            Self::PodNotStopped => "pod_not_stopped",
            Self::NameInUse => "name_in_use",
            Self::RuntimeFailure => "runtime_failure",
            Self::InvalidArgument => "invalid_argument",
            Self::MethodNotFound => "method_not_found",
            Self::Internal => "internal",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for RemoteErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_call_omits_unset_flags() {
        let line = Call::new("StopContainer", json!({"name": "web"}))
            .to_json_line()
            .unwrap();
        assert!(line.ends_with('\n'));
        assert!(!line.contains("more"));
        assert!(!line.contains("upgrade"));

        let line = Call::streaming("GetEvents", Value::Null).to_json_line().unwrap();
        assert_eq!(line, "{\"method\":\"GetEvents\",\"more\":true}\n");
    }

    #[test]
    fn test_reply_defaults() {
        let reply = Reply::from_json("{}").unwrap();
        assert!(!reply.continues);
        assert!(reply.error.is_none());
        assert_eq!(reply.parameters, Value::Null);
    }

    #[test]
    fn test_unknown_code_is_tolerated() {
        let reply =
            Reply::from_json(r#"{"error":{"code":"disk_on_fire","message":"hot"}}"#).unwrap();
        let err = reply.into_result().unwrap_err();
        assert!(matches!(
            err,
            Error::Remote {
                code: RemoteErrorCode::Unknown,
                ..
            }
        ));
    }

    #[test]
    fn test_not_running_code_maps_to_local_kind() {
        let reply = Reply::failure(RemoteErrorCode::ContainerNotRunning, "stopped");
        let line = reply.to_json_line().unwrap();
        assert!(line.contains("container_not_running"));
        let err = Reply::from_json(&line).unwrap().into_result().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotRunning);
    }
}
