//! Connection establishment for remote channels.
//!
//! A [`Connector`] knows how to reach the service and produces a fresh
//! [`RpcChannel`] on demand. The remote adapter calls it again after a
//! transfer consumed its channel or a failure poisoned it.

use super::channel::RpcChannel;
use crate::constants::DEFAULT_CONNECT_TIMEOUT;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Source of fresh channels to one service endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new connection and wraps it in a channel.
    async fn connect(&self) -> Result<RpcChannel>;

    /// Human-readable endpoint, for logs and errors.
    fn address(&self) -> String;
}

async fn connect_within<S, F>(address: &str, timeout: Duration, connect: F) -> Result<S>
where
    F: Future<Output = std::io::Result<S>>,
{
    tokio::time::timeout(timeout, connect)
        .await
        .map_err(|_| Error::Timeout {
            operation: format!("connect to {address}"),
            duration: timeout,
        })?
        .map_err(|source| Error::ConnectFailed {
            address: address.to_string(),
            source,
        })
}

// =============================================================================
// Unix Socket
// =============================================================================

/// Connects to the service over a Unix domain socket.
#[cfg(unix)]
#[derive(Debug, Clone)]
pub struct UnixConnector {
    path: std::path::PathBuf,
    connect_timeout: Duration,
    call_timeout: Option<Duration>,
}

#[cfg(unix)]
impl UnixConnector {
    /// Creates a connector for the socket at `path`.
    #[must_use]
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self {
            path: path.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            call_timeout: None,
        }
    }

    /// Sets the connect deadline.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the per-reply deadline applied to produced channels.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }
}

#[cfg(unix)]
#[async_trait]
impl Connector for UnixConnector {
    async fn connect(&self) -> Result<RpcChannel> {
        let address = self.address();
        debug!("Connecting to {}", address);
        let stream = connect_within(
            &address,
            self.connect_timeout,
            tokio::net::UnixStream::connect(&self.path),
        )
        .await?;
        Ok(RpcChannel::new(stream).with_timeout(self.call_timeout))
    }

    fn address(&self) -> String {
        format!("unix:{}", self.path.display())
    }
}

// =============================================================================
// TCP
// =============================================================================

/// Connects to the service over TCP (`host:port`).
#[derive(Debug, Clone)]
pub struct TcpConnector {
    address: String,
    connect_timeout: Duration,
    call_timeout: Option<Duration>,
}

impl TcpConnector {
    /// Creates a connector for `host:port`.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            call_timeout: None,
        }
    }

    /// Sets the connect deadline.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the per-reply deadline applied to produced channels.
    #[must_use]
    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    async fn connect(&self) -> Result<RpcChannel> {
        debug!("Connecting to tcp:{}", self.address);
        let stream = connect_within(
            &self.address,
            self.connect_timeout,
            tokio::net::TcpStream::connect(self.address.as_str()),
        )
        .await?;
        stream.set_nodelay(true)?;
        Ok(RpcChannel::new(stream).with_timeout(self.call_timeout))
    }

    fn address(&self) -> String {
        format!("tcp:{}", self.address)
    }
}
