//! Container runtime seam used by the local engine.
//!
//! The engine owns the lifecycle state machine and calls a
//! [`ContainerRuntime`] only once a transition is known to be valid. The
//! runtime drives the actual processes and reports what happened.
//!
//! | Implementation | Backend |
//! |----------------|---------|
//! | [`OciCliRuntime`](crate::runtimes::OciCliRuntime) | OCI runtime binary (`crun`, `runc`) |
//! | [`SimulatedRuntime`](crate::runtimes::SimulatedRuntime) | In-memory, for tests and dry runs |

use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// =============================================================================
// Signals
// =============================================================================

/// Signal to send to a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Signal {
    /// SIGTERM (graceful shutdown).
    Term,
    /// SIGKILL (force kill).
    Kill,
    /// SIGHUP (hangup).
    Hup,
    /// SIGINT (interrupt).
    Int,
    /// SIGQUIT.
    Quit,
    /// SIGUSR1.
    Usr1,
    /// SIGUSR2.
    Usr2,
}

impl Signal {
    /// Returns the signal number.
    #[cfg(unix)]
    #[must_use]
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::Term => libc::SIGTERM,
            Self::Kill => libc::SIGKILL,
            Self::Hup => libc::SIGHUP,
            Self::Int => libc::SIGINT,
            Self::Quit => libc::SIGQUIT,
            Self::Usr1 => libc::SIGUSR1,
            Self::Usr2 => libc::SIGUSR2,
        }
    }

    #[cfg(not(unix))]
    #[must_use]
    pub fn as_i32(&self) -> i32 {
        match self {
            Self::Term => 15,
            Self::Kill => 9,
            Self::Hup => 1,
            Self::Int => 2,
            Self::Quit => 3,
            Self::Usr1 => 10,
            Self::Usr2 => 12,
        }
    }

    /// Returns true if the default disposition ends the process.
    ///
    /// SIGKILL cannot be caught; the others here are only assumed to end a
    /// process that does not install a handler.
    #[must_use]
    pub fn terminates(&self) -> bool {
        matches!(self, Self::Kill | Self::Term | Self::Int | Self::Quit)
    }

    /// Exit code conventionally reported for a process ended by this signal.
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        128 + self.as_i32()
    }

    /// Signal name without the `SIG` prefix, as OCI runtimes accept it.
    #[must_use]
    pub fn short_name(&self) -> &'static str {
        match self {
            Self::Term => "TERM",
            Self::Kill => "KILL",
            Self::Hup => "HUP",
            Self::Int => "INT",
            Self::Quit => "QUIT",
            Self::Usr1 => "USR1",
            Self::Usr2 => "USR2",
        }
    }
}

impl std::str::FromStr for Signal {
    type Err = Error;

    /// Parses from signal name (e.g., "SIGTERM", "TERM", "15").
    fn from_str(s: &str) -> Result<Self> {
        let upper = s.to_uppercase();
        let name = upper.strip_prefix("SIG").unwrap_or(&upper);
        match name {
            "TERM" | "15" => Ok(Self::Term),
            "KILL" | "9" => Ok(Self::Kill),
            "HUP" | "1" => Ok(Self::Hup),
            "INT" | "2" => Ok(Self::Int),
            "QUIT" | "3" => Ok(Self::Quit),
            "USR1" | "10" => Ok(Self::Usr1),
            "USR2" | "12" => Ok(Self::Usr2),
            _ => Err(Error::InvalidInput(format!("unknown signal '{s}'"))),
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SIG{}", self.short_name())
    }
}

impl From<Signal> for String {
    fn from(signal: Signal) -> Self {
        signal.to_string()
    }
}

impl TryFrom<String> for Signal {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

// =============================================================================
// Runtime Trait
// =============================================================================

/// Process-level operations on one container.
///
/// Implementations must be safe to call concurrently for different IDs.
/// The engine never issues two operations for the same ID at once.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    /// Starts the container's process.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RuntimeFailed`] if the process could not be started.
    async fn start(&self, id: &str) -> Result<()>;

    /// Sends SIGTERM, waits up to `timeout`, then sends SIGKILL.
    ///
    /// Returns the exit code when the backend knows it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RuntimeFailed`] if the process survived SIGKILL or
    /// could not be signalled.
    async fn stop(&self, id: &str, timeout: Duration) -> Result<Option<i32>>;

    /// Delivers a signal.
    ///
    /// Returns the exit code if the process has exited as a result, `None`
    /// if it is still running.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RuntimeFailed`] if the signal could not be delivered.
    async fn kill(&self, id: &str, signal: Signal) -> Result<Option<i32>>;

    /// Freezes the container's processes.
    async fn pause(&self, id: &str) -> Result<()>;

    /// Thaws the container's processes.
    async fn unpause(&self, id: &str) -> Result<()>;

    /// Releases the container's runtime resources.
    ///
    /// With `force`, a still-running process is killed first.
    async fn delete(&self, id: &str, force: bool) -> Result<()>;
}
