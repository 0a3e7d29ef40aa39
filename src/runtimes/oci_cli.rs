//! # OCI CLI Runtime
//!
//! Drives an OCI runtime binary (`crun`, `runc`, `youki`) through
//! `tokio::process`, one invocation per operation:
//!
//! | Operation | Invocation |
//! |-----------|------------|
//! | start     | `<bin> --root <root> start <id>` |
//! | kill      | `<bin> --root <root> kill <id> <SIG>` |
//! | state     | `<bin> --root <root> state <id>` |
//! | pause     | `<bin> --root <root> pause <id>` |
//! | unpause   | `<bin> --root <root> resume <id>` |
//! | delete    | `<bin> --root <root> delete [--force] <id>` |
//!
//! Stop is composed from kill and state: SIGTERM, poll until the runtime
//! reports `stopped` or the timeout elapses, then SIGKILL.

use crate::constants::STOP_POLL_INTERVAL;
use crate::error::{Error, Result};
use crate::runtime::{ContainerRuntime, Signal};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::{Instant, timeout};
use tracing::{debug, info, warn};

/// Deadline for a single runtime invocation.
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// How long to wait for exit after SIGKILL.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Maximum captured stderr (64 KiB).
const MAX_STDERR: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
struct StateOutput {
    status: String,
}

/// Runtime backed by an OCI runtime binary.
#[derive(Debug, Clone)]
pub struct OciCliRuntime {
    binary: PathBuf,
    root: PathBuf,
}

impl OciCliRuntime {
    /// Creates a runtime using `binary` with state under `root`.
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>, root: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            root: root.into(),
        }
    }

    /// Runtime binary path.
    #[must_use]
    pub fn binary(&self) -> &std::path::Path {
        &self.binary
    }

    /// Runs one invocation and returns stdout.
    async fn run(&self, operation: &str, id: &str, args: &[&str]) -> Result<Vec<u8>> {
        debug!(
            "{} --root {} {}",
            self.binary.display(),
            self.root.display(),
            args.join(" ")
        );

        let mut cmd = Command::new(&self.binary);
        cmd.arg("--root").arg(&self.root).args(args);
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let output = timeout(COMMAND_TIMEOUT, cmd.output())
            .await
            .map_err(|_| Error::Timeout {
                operation: format!("{operation} {id}"),
                duration: COMMAND_TIMEOUT,
            })?
            .map_err(|e| Error::RuntimeFailed {
                operation: operation.to_string(),
                id: id.to_string(),
                reason: format!("failed to run {}: {e}", self.binary.display()),
            })?;

        if !output.status.success() {
            let mut stderr = output.stderr;
            stderr.truncate(MAX_STDERR);
            return Err(Error::RuntimeFailed {
                operation: operation.to_string(),
                id: id.to_string(),
                reason: String::from_utf8_lossy(&stderr).trim().to_string(),
            });
        }
        Ok(output.stdout)
    }

    async fn status(&self, id: &str) -> Result<String> {
        let stdout = self.run("state", id, &["state", id]).await?;
        let state: StateOutput = serde_json::from_slice(&stdout)?;
        Ok(state.status)
    }

    async fn signal(&self, id: &str, signal: Signal) -> Result<()> {
        self.run("kill", id, &["kill", id, signal.short_name()])
            .await
            .map(|_| ())
    }

    /// Polls until the runtime reports `stopped` or `limit` elapses.
    async fn wait_stopped(&self, id: &str, limit: Duration) -> Result<bool> {
        let deadline = Instant::now() + limit;
        loop {
            if self.status(id).await? == "stopped" {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl ContainerRuntime for OciCliRuntime {
    fn name(&self) -> &str {
        "oci-cli"
    }

    async fn start(&self, id: &str) -> Result<()> {
        self.run("start", id, &["start", id]).await?;
        info!("Started container {}", id);
        Ok(())
    }

    async fn stop(&self, id: &str, timeout: Duration) -> Result<Option<i32>> {
        if !timeout.is_zero() {
            self.signal(id, Signal::Term).await?;
            if self.wait_stopped(id, timeout).await? {
                info!("Container {} exited after SIGTERM", id);
                return Ok(Some(Signal::Term.exit_code()));
            }
            warn!(
                "Container {} did not exit within {:?}, sending SIGKILL",
                id, timeout
            );
        }

        self.signal(id, Signal::Kill).await?;
        if self.wait_stopped(id, KILL_GRACE).await? {
            info!("Container {} killed", id);
            return Ok(Some(Signal::Kill.exit_code()));
        }
        Err(Error::RuntimeFailed {
            operation: "stop".to_string(),
            id: id.to_string(),
            reason: format!("still running {KILL_GRACE:?} after SIGKILL"),
        })
    }

    async fn kill(&self, id: &str, signal: Signal) -> Result<Option<i32>> {
        self.signal(id, signal).await?;
        info!("Sent {} to container {}", signal, id);
        if signal.terminates() && self.wait_stopped(id, STOP_POLL_INTERVAL * 10).await? {
            return Ok(Some(signal.exit_code()));
        }
        Ok(None)
    }

    async fn pause(&self, id: &str) -> Result<()> {
        self.run("pause", id, &["pause", id]).await?;
        Ok(())
    }

    async fn unpause(&self, id: &str) -> Result<()> {
        self.run("unpause", id, &["resume", id]).await?;
        Ok(())
    }

    async fn delete(&self, id: &str, force: bool) -> Result<()> {
        if force {
            self.run("delete", id, &["delete", "--force", id]).await?;
        } else {
            self.run("delete", id, &["delete", id]).await?;
        }
        info!("Deleted container {}", id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_missing_binary_is_runtime_failure() {
        let runtime = OciCliRuntime::new("/nonexistent/oci-runtime", "/tmp/podbridge-test");
        let err = runtime.start("abc").await.unwrap_err();
        assert!(matches!(err, Error::RuntimeFailed { ref operation, .. } if operation == "start"));
    }
}
