//! # Adapter Constants
//!
//! Timeouts, wire limits and defaults shared by the local job pool and the
//! remote protocol bridge. Configuration values in [`crate::config`] fall
//! back to these when unset.

use std::path::PathBuf;
use std::time::Duration;

// =============================================================================
// Lifecycle Timeouts
// =============================================================================

/// Default grace period between SIGTERM and SIGKILL when stopping.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound accepted for a caller-supplied stop timeout.
pub const MAX_STOP_TIMEOUT: Duration = Duration::from_secs(300);

/// Poll interval while waiting for a signalled container to exit.
pub const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default poll interval of a container wait.
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

// =============================================================================
// Remote Channel
// =============================================================================

/// Default deadline for a single remote reply.
///
/// Applies per reply, so a long streaming call is bounded by the gap
/// between chunks, not by its total length.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for establishing a remote connection.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Maximum size of one protocol frame (16 MiB).
///
/// A peer sending a longer line without a newline is treated as a protocol
/// violation rather than buffered without bound.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

// =============================================================================
// File Transfer
// =============================================================================

/// Delimiter terminating the acknowledgement token after a raw send.
pub const TRANSFER_ACK_DELIMITER: u8 = b':';

/// Maximum length of the acknowledgement token (bytes, delimiter included).
pub const MAX_TRANSFER_ACK_LEN: usize = 4096;

// =============================================================================
// Events
// =============================================================================

/// Capacity of the local event broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Paths
// =============================================================================

/// Socket file name of the remote service.
pub const SOCKET_NAME: &str = "podbridge.sock";

/// Returns the default socket path of the remote service.
///
/// `$XDG_RUNTIME_DIR/podbridge/podbridge.sock` when a runtime directory is
/// known, otherwise `/run/podbridge/podbridge.sock`.
#[must_use]
pub fn default_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .map(|d| d.join("podbridge").join(SOCKET_NAME))
        .unwrap_or_else(|| PathBuf::from("/run/podbridge").join(SOCKET_NAME))
}

/// Returns the default OCI runtime state root for the local backend.
#[must_use]
pub fn default_runtime_root() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/run/podbridge/runtime")
    }

    #[cfg(not(target_os = "linux"))]
    {
        dirs::home_dir()
            .map(|h| h.join(".podbridge").join("runtime"))
            .unwrap_or_else(|| PathBuf::from(".podbridge/runtime"))
    }
}
