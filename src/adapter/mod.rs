//! Lifecycle adapter: one interface over the local engine and a remote
//! management service.
//!
//! Every bulk operation takes an [`EntityKind`] and a [`Selector`] and
//! returns a [`BatchResult`]. Per-entity failures never fail the call;
//! only selector resolution (`Latest` with nothing present) and transport
//! failures do.
//!
//! | Adapter | Execution |
//! |---------|-----------|
//! | [`LocalAdapter`] | Job pool over the in-process engine |
//! | [`RemoteAdapter`] | Sequential calls on one protocol channel |
//!
//! Use [`from_config`] to pick an implementation from [`EngineConfig`].

mod local;
mod remote;

pub use local::LocalAdapter;
pub use remote::RemoteAdapter;

use crate::batch::BatchResult;
use crate::config::{Connection, EngineConfig};
use crate::constants::WAIT_POLL_INTERVAL;
use crate::engine::LocalEngine;
use crate::entity::{EntityKind, LifecycleState, Selector};
use crate::error::{Error, ErrorKind, Result};
use crate::rpc::{Connector, TcpConnector};
use crate::runtime::Signal;
use crate::status::{ContainerSnapshot, PodSnapshot};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

// =============================================================================
// Options
// =============================================================================

/// Options for stop.
#[derive(Debug, Clone, Copy, Default)]
pub struct StopOptions {
    /// Grace period before SIGKILL; engine default when unset.
    pub timeout: Option<Duration>,
    /// Fail for entities that are not running.
    pub strict: bool,
    /// Drop names that match nothing instead of reporting them.
    pub ignore: bool,
}

impl StopOptions {
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    #[must_use]
    pub fn ignore(mut self) -> Self {
        self.ignore = true;
        self
    }
}

/// Options for kill.
#[derive(Debug, Clone, Copy)]
pub struct KillOptions {
    pub signal: Signal,
    /// Fail for entities that are not running.
    pub strict: bool,
}

impl Default for KillOptions {
    fn default() -> Self {
        Self {
            signal: Signal::Kill,
            strict: false,
        }
    }
}

impl KillOptions {
    #[must_use]
    pub fn with_signal(mut self, signal: Signal) -> Self {
        self.signal = signal;
        self
    }
}

/// Options for remove.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveOptions {
    /// Stop running entities first instead of failing them.
    pub force: bool,
    /// Drop names that match nothing instead of reporting them.
    pub ignore: bool,
}

impl RemoveOptions {
    #[must_use]
    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    #[must_use]
    pub fn ignore(mut self) -> Self {
        self.ignore = true;
        self
    }
}

/// Options for prune.
#[derive(Debug, Clone, Copy, Default)]
pub struct PruneOptions {
    /// Include running entities, stopping them first.
    pub force: bool,
    /// Worker count override for this call.
    pub workers: Option<usize>,
}

/// Container state a wait blocks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WaitCondition {
    /// Stopped or exited.
    #[default]
    Exited,
    Running,
    Paused,
}

impl WaitCondition {
    /// Returns true if `state` satisfies the condition.
    #[must_use]
    pub fn is_met(self, state: LifecycleState) -> bool {
        match self {
            Self::Exited => matches!(state, LifecycleState::Exited | LifecycleState::Stopped),
            Self::Running => state == LifecycleState::Running,
            Self::Paused => state == LifecycleState::Paused,
        }
    }
}

/// Options for wait.
#[derive(Debug, Clone, Copy)]
pub struct WaitOptions {
    pub condition: WaitCondition,
    /// Delay between state checks.
    pub interval: Duration,
    /// Give up after this long. Waits forever when unset.
    pub timeout: Option<Duration>,
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self {
            condition: WaitCondition::default(),
            interval: WAIT_POLL_INTERVAL,
            timeout: None,
        }
    }
}

impl WaitOptions {
    #[must_use]
    pub fn with_condition(mut self, condition: WaitCondition) -> Self {
        self.condition = condition;
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Outcome of waiting for one container.
#[derive(Debug)]
pub struct WaitReport {
    /// Container ID, or the input token when it did not resolve.
    pub id: String,
    /// Exit code when waiting for [`WaitCondition::Exited`].
    pub exit_code: Option<i32>,
    pub error: Option<Error>,
}

impl WaitReport {
    fn new(id: String, outcome: Result<Option<i32>>) -> Self {
        match outcome {
            Ok(exit_code) => Self {
                id,
                exit_code,
                error: None,
            },
            Err(e) => Self::failed(id, e),
        }
    }

    fn failed(id: String, error: Error) -> Self {
        Self {
            id,
            exit_code: None,
            error: Some(error),
        }
    }
}

/// Polls `fetch` until the container meets the condition or the wait
/// times out.
async fn wait_for<F, Fut>(id: &str, opts: WaitOptions, mut fetch: F) -> Result<Option<i32>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ContainerSnapshot>>,
{
    let poll = poll_until(opts, &mut fetch);
    match opts.timeout {
        Some(limit) => tokio::time::timeout(limit, poll)
            .await
            .map_err(|_| Error::Timeout {
                operation: format!("wait for container {id}"),
                duration: limit,
            })?,
        None => poll.await,
    }
}

async fn poll_until<F, Fut>(opts: WaitOptions, fetch: &mut F) -> Result<Option<i32>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ContainerSnapshot>>,
{
    loop {
        let snapshot = fetch().await?;
        if opts.condition.is_met(snapshot.state) {
            let exit_code = match opts.condition {
                WaitCondition::Exited => snapshot.exit_code,
                _ => None,
            };
            return Ok(exit_code);
        }
        tokio::time::sleep(opts.interval).await;
    }
}

/// Records a token that did not resolve. Names matching nothing are
/// dropped when `ignore_missing` is set.
fn record_unresolved(batch: &mut BatchResult, token: String, error: Error, ignore_missing: bool) {
    if ignore_missing && error.kind() == ErrorKind::NoSuchEntity {
        debug!("Ignoring missing '{}'", token);
        return;
    }
    batch.record_failure(token, error);
}

/// Maps "no such entity" onto `false` for existence checks.
fn exists_from(lookup: Result<bool>) -> Result<bool> {
    match lookup {
        Err(e) if e.kind() == ErrorKind::NoSuchEntity => Ok(false),
        other => other,
    }
}

// =============================================================================
// Adapter Trait
// =============================================================================

/// Bulk lifecycle operations on pods and containers.
///
/// # Thread Safety
///
/// Implementations are `Send + Sync`. The remote adapter serializes all
/// calls on its single channel.
#[async_trait]
pub trait LifecycleAdapter: Send + Sync {
    /// Short adapter name for logs.
    fn name(&self) -> &str;

    /// Starts entities. Already running is success.
    async fn start(&self, kind: EntityKind, selector: &Selector) -> Result<BatchResult>;

    /// Stops entities gracefully, then forcibly.
    async fn stop(
        &self,
        kind: EntityKind,
        selector: &Selector,
        opts: StopOptions,
    ) -> Result<BatchResult>;

    /// Delivers a signal.
    async fn kill(
        &self,
        kind: EntityKind,
        selector: &Selector,
        opts: KillOptions,
    ) -> Result<BatchResult>;

    /// Freezes running entities.
    async fn pause(&self, kind: EntityKind, selector: &Selector) -> Result<BatchResult>;

    /// Thaws paused entities.
    async fn unpause(&self, kind: EntityKind, selector: &Selector) -> Result<BatchResult>;

    /// Stops (when running) and starts again.
    async fn restart(
        &self,
        kind: EntityKind,
        selector: &Selector,
        timeout: Option<Duration>,
    ) -> Result<BatchResult>;

    /// Removes entities. A removed entity no longer resolves.
    async fn remove(
        &self,
        kind: EntityKind,
        selector: &Selector,
        opts: RemoveOptions,
    ) -> Result<BatchResult>;

    /// Removes every stopped entity of a kind.
    async fn prune(&self, kind: EntityKind, opts: PruneOptions) -> Result<BatchResult>;

    /// Returns true if `token` names exactly one entity of the kind.
    ///
    /// # Errors
    ///
    /// An ambiguous ID prefix and transport failures.
    async fn exists(&self, kind: EntityKind, token: &str) -> Result<bool>;

    /// Blocks until each selected container meets `opts.condition`.
    ///
    /// Containers are waited for one after another. Unresolved names and
    /// per-container failures are reported in the returned list.
    async fn wait(&self, selector: &Selector, opts: WaitOptions) -> Result<Vec<WaitReport>>;

    /// Snapshots of all pods with their members.
    async fn list_pods(&self) -> Result<Vec<PodSnapshot>>;

    /// Snapshots of all containers.
    async fn list_containers(&self) -> Result<Vec<ContainerSnapshot>>;
}

impl std::fmt::Debug for dyn LifecycleAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleAdapter")
            .field("name", &self.name())
            .finish()
    }
}

/// Builds the adapter selected by `config.connection`.
///
/// The remote adapter connects lazily on its first call.
///
/// # Errors
///
/// [`Error::InvalidConfig`] if the configuration does not validate.
pub fn from_config(config: &EngineConfig) -> Result<Arc<dyn LifecycleAdapter>> {
    config.validate()?;
    match &config.connection {
        Connection::Local => {
            let engine = Arc::new(LocalEngine::from_config(config));
            Ok(Arc::new(LocalAdapter::new(engine)))
        }
        Connection::Remote(endpoint) => {
            let connector: Box<dyn Connector> = match (&endpoint.socket, &endpoint.address) {
                #[cfg(unix)]
                (Some(path), _) => Box::new(
                    crate::rpc::UnixConnector::new(path).with_call_timeout(config.call_timeout()),
                ),
                (_, Some(address)) => Box::new(
                    TcpConnector::new(address.clone()).with_call_timeout(config.call_timeout()),
                ),
                _ => {
                    return Err(Error::InvalidConfig(
                        "remote connection has no usable endpoint".to_string(),
                    ));
                }
            };
            Ok(Arc::new(
                RemoteAdapter::new(connector).with_stop_timeout(config.stop_timeout()),
            ))
        }
    }
}
