//! Engine configuration.
//!
//! Parsed from YAML via `serde_yaml` or built in code. Every field has a
//! default, so an empty document is a valid local configuration.
//!
//! ```yaml
//! connection:
//!   type: remote
//!   socket: /run/podbridge/podbridge.sock
//! max_workers: 8
//! stop_timeout_secs: 10
//! call_timeout_secs: 30
//! runtime:
//!   binary: crun
//!   root: /run/podbridge/runtime
//! ```

use crate::constants::{
    DEFAULT_CALL_TIMEOUT, DEFAULT_STOP_TIMEOUT, MAX_STOP_TIMEOUT, default_runtime_root,
    default_socket_path,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Largest configuration file accepted (1 MiB).
const MAX_CONFIG_SIZE: usize = 1024 * 1024;

/// Where lifecycle operations are carried out.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Connection {
    /// In-process engine.
    #[default]
    Local,
    /// Remote management service.
    Remote(RemoteEndpoint),
}

/// Address of the remote service. Exactly one field must be set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    /// Unix socket path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub socket: Option<PathBuf>,
    /// TCP `host:port`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl RemoteEndpoint {
    /// Endpoint at the default socket path.
    #[must_use]
    pub fn default_socket() -> Self {
        Self {
            socket: Some(default_socket_path()),
            address: None,
        }
    }
}

/// Local OCI runtime backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Runtime binary name or path.
    #[serde(default = "default_binary")]
    pub binary: PathBuf,
    /// Runtime state root.
    #[serde(default = "default_runtime_root")]
    pub root: PathBuf,
}

fn default_binary() -> PathBuf {
    PathBuf::from("crun")
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            root: default_runtime_root(),
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub connection: Connection,
    /// Overrides the per-operation default worker counts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_workers: Option<usize>,
    /// Default grace period before SIGKILL.
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
    /// Per-reply deadline on remote channels; `0` disables it.
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

fn default_stop_timeout_secs() -> u64 {
    DEFAULT_STOP_TIMEOUT.as_secs()
}

fn default_call_timeout_secs() -> u64 {
    DEFAULT_CALL_TIMEOUT.as_secs()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connection: Connection::Local,
            max_workers: None,
            stop_timeout_secs: default_stop_timeout_secs(),
            call_timeout_secs: default_call_timeout_secs(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Local configuration with defaults.
    #[must_use]
    pub fn local() -> Self {
        Self::default()
    }

    /// Remote configuration with defaults.
    #[must_use]
    pub fn remote(endpoint: RemoteEndpoint) -> Self {
        Self {
            connection: Connection::Remote(endpoint),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = Some(workers);
        self
    }

    /// Parses and validates a YAML document.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] on oversized input, syntax errors or
    /// failed validation.
    pub fn from_yaml(yaml: &[u8]) -> Result<Self> {
        if yaml.len() > MAX_CONFIG_SIZE {
            return Err(Error::InvalidConfig(format!(
                "configuration size {} exceeds limit of {}",
                yaml.len(),
                MAX_CONFIG_SIZE
            )));
        }
        let config: Self = if yaml.iter().all(u8::is_ascii_whitespace) {
            Self::default()
        } else {
            serde_yaml::from_slice(yaml).map_err(|e| Error::InvalidConfig(e.to_string()))?
        };
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a YAML file.
    pub async fn from_file(path: &Path) -> Result<Self> {
        let yaml = tokio::fs::read(path).await?;
        Self::from_yaml(&yaml)
    }

    /// Serializes to YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::InvalidConfig(e.to_string()))
    }

    /// Checks field bounds.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == Some(0) {
            return Err(Error::InvalidConfig(
                "max_workers must be at least 1".to_string(),
            ));
        }
        if self.stop_timeout() > MAX_STOP_TIMEOUT {
            return Err(Error::InvalidConfig(format!(
                "stop_timeout_secs {} exceeds maximum of {}",
                self.stop_timeout_secs,
                MAX_STOP_TIMEOUT.as_secs()
            )));
        }
        if let Connection::Remote(endpoint) = &self.connection {
            match (&endpoint.socket, &endpoint.address) {
                (Some(_), None) | (None, Some(_)) => {}
                (Some(_), Some(_)) => {
                    return Err(Error::InvalidConfig(
                        "remote connection takes either socket or address, not both".to_string(),
                    ));
                }
                (None, None) => {
                    return Err(Error::InvalidConfig(
                        "remote connection needs a socket or an address".to_string(),
                    ));
                }
            }
        }
        if self.runtime.binary.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("runtime.binary is empty".to_string()));
        }
        Ok(())
    }

    /// Default stop timeout.
    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Per-reply deadline, `None` when disabled.
    #[must_use]
    pub fn call_timeout(&self) -> Option<Duration> {
        (self.call_timeout_secs > 0).then(|| Duration::from_secs(self.call_timeout_secs))
    }
}
