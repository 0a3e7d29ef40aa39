//! Adapter over the remote management service.
//!
//! All calls share one [`RpcChannel`] behind an async mutex, so per-entity
//! calls of a batch are issued one after another. The channel is opened
//! lazily and reopened when an earlier failure poisoned it or a file
//! transfer consumed it.
//!
//! ```text
//!  RemoteAdapter
//!       │ lock
//!       ▼
//!  Option<RpcChannel> ──None/poisoned──▶ Connector::connect()
//!       │
//!       ├── call()            resolve, stop, kill, ...
//!       ├── call_replies()    GetEvents
//!       └── take() + upgrade  SendFile / ReceiveFile
//! ```

use super::{
    KillOptions, LifecycleAdapter, PruneOptions, RemoveOptions, StopOptions, WaitOptions,
    WaitReport, exists_from, record_unresolved, wait_for,
};
use crate::batch::BatchResult;
use crate::constants::DEFAULT_STOP_TIMEOUT;
use crate::entity::{EntityKind, Selector};
use crate::error::{Error, ErrorKind, Result};
use crate::events::{DomainEvent, EventOptions, EventStream};
use crate::rpc::protocol::methods;
use crate::rpc::{Connector, RemoteError, RpcChannel};
use crate::status::{ContainerSnapshot, PodSnapshot};
use crate::transfer;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// One failed member reported inside a successful pod reply.
#[derive(Debug, Deserialize)]
struct MemberError {
    id: String,
    error: RemoteError,
}

#[derive(Debug, Default, Deserialize)]
struct PodReply {
    #[serde(default)]
    errors: Vec<MemberError>,
}

#[derive(Debug, Default, Deserialize)]
struct PruneReply {
    #[serde(default)]
    pruned: Vec<String>,
    #[serde(default)]
    failed: BTreeMap<String, RemoteError>,
}

/// Adapter speaking the remote protocol.
pub struct RemoteAdapter {
    connector: Box<dyn Connector>,
    channel: Mutex<Option<RpcChannel>>,
    stop_timeout: Duration,
}

impl std::fmt::Debug for RemoteAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteAdapter")
            .field("address", &self.connector.address())
            .field("stop_timeout", &self.stop_timeout)
            .finish_non_exhaustive()
    }
}

impl RemoteAdapter {
    /// Creates an adapter that connects on first use.
    #[must_use]
    pub fn new(connector: Box<dyn Connector>) -> Self {
        Self {
            connector,
            channel: Mutex::new(None),
            stop_timeout: DEFAULT_STOP_TIMEOUT,
        }
    }

    /// Default grace period sent with stop and restart calls.
    #[must_use]
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Address of the remote service.
    #[must_use]
    pub fn address(&self) -> String {
        self.connector.address()
    }

    // =========================================================================
    // Channel Management
    // =========================================================================

    async fn ensure<'s>(&self, slot: &'s mut Option<RpcChannel>) -> Result<&'s mut RpcChannel> {
        if slot.as_ref().is_some_and(RpcChannel::is_poisoned) {
            warn!(
                "Channel to {} is unusable, reconnecting",
                self.connector.address()
            );
            *slot = None;
        }
        if slot.is_none() {
            debug!("Connecting to {}", self.connector.address());
            *slot = Some(self.connector.connect().await?);
        }
        slot.as_mut()
            .ok_or_else(|| Error::Internal("channel missing after connect".to_string()))
    }

    async fn call(&self, method: &str, parameters: Value) -> Result<Value> {
        let mut slot = self.channel.lock().await;
        let channel = self.ensure(&mut slot).await?;
        channel.call(method, parameters).await
    }

    /// Hands out the channel for an upgrade. The next call reconnects.
    async fn take_channel(&self) -> Result<RpcChannel> {
        let mut slot = self.channel.lock().await;
        self.ensure(&mut slot).await?;
        slot.take()
            .ok_or_else(|| Error::Internal("channel missing after connect".to_string()))
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    async fn lookup(
        &self,
        kind: EntityKind,
        all: bool,
        latest: bool,
        args: &[&str],
    ) -> Result<Vec<String>> {
        let (method, key) = match kind {
            EntityKind::Container => (methods::GET_CONTAINERS_BY_CONTEXT, "containers"),
            EntityKind::Pod => (methods::GET_PODS_BY_CONTEXT, "pods"),
        };
        let reply = self
            .call(method, json!({ "all": all, "latest": latest, "args": args }))
            .await?;
        let ids = reply.get(key).cloned().unwrap_or(Value::Array(Vec::new()));
        Ok(serde_json::from_value(ids)?)
    }

    /// Resolves a selector on the service. Token failures land in `batch`.
    async fn resolve(
        &self,
        kind: EntityKind,
        selector: &Selector,
        ignore_missing: bool,
        batch: &mut BatchResult,
    ) -> Result<Vec<String>> {
        let ids = match selector {
            Selector::All => self.lookup(kind, true, false, &[]).await?,
            Selector::Latest => {
                let ids = self.lookup(kind, false, true, &[]).await?;
                if ids.is_empty() {
                    return Err(Error::NoLatest(kind));
                }
                ids
            }
            Selector::Names(tokens) => {
                let mut ids = Vec::with_capacity(tokens.len());
                for token in tokens {
                    match self.lookup(kind, false, false, &[token.as_str()]).await {
                        Ok(found) if found.is_empty() => {
                            let missing = Error::no_such(kind, token.as_str());
                            record_unresolved(batch, token.clone(), missing, ignore_missing);
                        }
                        Ok(found) => ids.extend(found),
                        Err(e) if e.is_transport() => return Err(e),
                        Err(e) => record_unresolved(batch, token.clone(), e, ignore_missing),
                    }
                }
                ids
            }
        };
        let mut seen = HashSet::new();
        Ok(ids.into_iter().filter(|id| seen.insert(id.clone())).collect())
    }

    // =========================================================================
    // Batches
    // =========================================================================

    /// Issues one call per resolved entity, in order.
    ///
    /// `tolerate` lists error kinds that count as success, for the entity
    /// and for pod members alike. A transport failure is recorded against
    /// the entity in flight and every entity after it fails with
    /// [`Error::ChannelPoisoned`]. Only resolution failures abort the batch.
    async fn batch<P>(
        &self,
        kind: EntityKind,
        selector: &Selector,
        method: &str,
        request: Request<'_>,
        params: P,
    ) -> Result<BatchResult>
    where
        P: Fn(&str) -> Value + Send + Sync,
    {
        let mut batch = BatchResult::new();
        let ids = self
            .resolve(kind, selector, request.ignore_missing, &mut batch)
            .await?;
        let mut remaining = ids.into_iter();
        while let Some(id) = remaining.next() {
            match self.call(method, params(&id)).await {
                Ok(reply) => record_reply(&mut batch, kind, &id, reply, request.tolerate),
                Err(e) if request.tolerate.contains(&e.kind()) => {
                    debug!("{} on {} tolerated: {}", method, id, e);
                    batch.record_success(id);
                }
                Err(e) if e.is_transport() => {
                    warn!("{} on {} lost the channel: {}", method, id, e);
                    batch.record_failure(id, e);
                    for skipped in remaining.by_ref() {
                        batch.record_failure(skipped, Error::ChannelPoisoned);
                    }
                }
                Err(e) => batch.record_failure(id, e),
            }
        }
        Ok(batch)
    }

    /// Whole seconds sent on the wire. Sub-second remainders round up.
    fn timeout_secs(&self, timeout: Option<Duration>) -> u64 {
        let timeout = timeout.unwrap_or(self.stop_timeout);
        timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0)
    }

    /// Current snapshot of one container.
    async fn container(&self, id: &str) -> Result<ContainerSnapshot> {
        self.list_containers()
            .await?
            .into_iter()
            .find(|c| c.id == id)
            .ok_or_else(|| Error::NoSuchContainer(id.to_string()))
    }

    // =========================================================================
    // Remote-Only Operations
    // =========================================================================

    /// Exports a container's filesystem as a tarball to `dest`.
    ///
    /// The service writes the tarball to a temporary path, which is then
    /// pulled over a raw transfer and deleted on the service side.
    ///
    /// # Errors
    ///
    /// Resolution, remote and transfer failures.
    pub async fn export_container(&self, name: &str, dest: &Path) -> Result<u64> {
        let reply = self
            .call(methods::EXPORT_CONTAINER, json!({ "name": name, "path": "" }))
            .await?;
        let tarfile = reply
            .get("tarfile")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol("ExportContainer reply has no tarfile".to_string()))?
            .to_string();
        let channel = self.take_channel().await?;
        let written = transfer::receive_file(channel, &tarfile, dest, true).await?;
        info!("Exported container {} to {} ({} bytes)", name, dest.display(), written);
        Ok(written)
    }

    /// Uploads a local file and returns its temporary name on the service.
    ///
    /// # Errors
    ///
    /// I/O, remote and transfer failures.
    pub async fn upload(&self, source: &Path) -> Result<String> {
        let channel = self.take_channel().await?;
        let name = transfer::send_file(channel, source).await?;
        info!("Uploaded {} as {}", source.display(), name);
        Ok(name)
    }

    /// Reads events, handing each to `on_event` until it returns false or
    /// the stream ends. Returns the number of events delivered.
    ///
    /// Stopping early leaves a streaming call unfinished; the channel is
    /// then reopened on the next call.
    ///
    /// # Errors
    ///
    /// Remote, transport and event decoding failures.
    pub async fn events<F>(&self, options: &EventOptions, mut on_event: F) -> Result<usize>
    where
        F: FnMut(DomainEvent) -> bool + Send,
    {
        let mut slot = self.channel.lock().await;
        let channel = self.ensure(&mut slot).await?;
        let mut stream = EventStream::open(channel, options).await?;
        let mut delivered = 0;
        while let Some(event) = stream.next().await? {
            delivered += 1;
            if !on_event(event) {
                debug!("Event consumer stopped after {} events", delivered);
                break;
            }
        }
        Ok(delivered)
    }

    /// Collects all events matching `options`. Meant for non-streaming
    /// queries.
    pub async fn collect_events(&self, options: &EventOptions) -> Result<Vec<DomainEvent>> {
        let mut events = Vec::new();
        self.events(options, |event| {
            events.push(event);
            true
        })
        .await?;
        Ok(events)
    }
}

/// Per-batch handling of error replies.
#[derive(Debug, Clone, Copy, Default)]
struct Request<'a> {
    tolerate: &'a [ErrorKind],
    ignore_missing: bool,
}

impl<'a> Request<'a> {
    fn tolerating(tolerate: &'a [ErrorKind]) -> Self {
        Self {
            tolerate,
            ignore_missing: false,
        }
    }

    fn ignore_missing(mut self, ignore_missing: bool) -> Self {
        self.ignore_missing = ignore_missing;
        self
    }
}

/// Kinds a stop or kill tolerates unless strict.
fn not_running_tolerance(strict: bool) -> &'static [ErrorKind] {
    if strict { &[] } else { &[ErrorKind::NotRunning] }
}

/// Records a successful reply, unpacking member failures of pod replies.
fn record_reply(
    batch: &mut BatchResult,
    kind: EntityKind,
    id: &str,
    reply: Value,
    tolerate: &[ErrorKind],
) {
    if kind == EntityKind::Container || reply.is_null() {
        batch.record_success(id);
        return;
    }
    let errors = match serde_json::from_value::<PodReply>(reply) {
        Ok(PodReply { errors }) => errors,
        Err(e) => {
            batch.record_failure(id, Error::Serialization(e));
            return;
        }
    };
    let errors = errors
        .into_iter()
        .filter_map(|MemberError { id: member, error }| {
            let error = Error::from(error);
            if tolerate.contains(&error.kind()) {
                debug!("Member {} of pod {} tolerated: {}", member, id, error);
                None
            } else {
                Some(Error::member(member, error))
            }
        })
        .collect();
    batch.record_errors(id, errors);
}

#[async_trait]
impl LifecycleAdapter for RemoteAdapter {
    fn name(&self) -> &str {
        "remote"
    }

    async fn start(&self, kind: EntityKind, selector: &Selector) -> Result<BatchResult> {
        let method = match kind {
            EntityKind::Container => methods::START_CONTAINER,
            EntityKind::Pod => methods::START_POD,
        };
        self.batch(kind, selector, method, Request::default(), |id| json!({ "name": id }))
            .await
    }

    async fn stop(
        &self,
        kind: EntityKind,
        selector: &Selector,
        opts: StopOptions,
    ) -> Result<BatchResult> {
        let method = match kind {
            EntityKind::Container => methods::STOP_CONTAINER,
            EntityKind::Pod => methods::STOP_POD,
        };
        let request =
            Request::tolerating(not_running_tolerance(opts.strict)).ignore_missing(opts.ignore);
        let timeout = self.timeout_secs(opts.timeout);
        self.batch(kind, selector, method, request, |id| {
            json!({ "name": id, "timeout": timeout })
        })
        .await
    }

    async fn kill(
        &self,
        kind: EntityKind,
        selector: &Selector,
        opts: KillOptions,
    ) -> Result<BatchResult> {
        let method = match kind {
            EntityKind::Container => methods::KILL_CONTAINER,
            EntityKind::Pod => methods::KILL_POD,
        };
        let request = Request::tolerating(not_running_tolerance(opts.strict));
        let signal = opts.signal.as_i32();
        self.batch(kind, selector, method, request, |id| {
            json!({ "name": id, "signal": signal })
        })
        .await
    }

    async fn pause(&self, kind: EntityKind, selector: &Selector) -> Result<BatchResult> {
        let method = match kind {
            EntityKind::Container => methods::PAUSE_CONTAINER,
            EntityKind::Pod => methods::PAUSE_POD,
        };
        self.batch(kind, selector, method, Request::default(), |id| json!({ "name": id }))
            .await
    }

    async fn unpause(&self, kind: EntityKind, selector: &Selector) -> Result<BatchResult> {
        let method = match kind {
            EntityKind::Container => methods::UNPAUSE_CONTAINER,
            EntityKind::Pod => methods::UNPAUSE_POD,
        };
        self.batch(kind, selector, method, Request::default(), |id| json!({ "name": id }))
            .await
    }

    async fn restart(
        &self,
        kind: EntityKind,
        selector: &Selector,
        timeout: Option<Duration>,
    ) -> Result<BatchResult> {
        let method = match kind {
            EntityKind::Container => methods::RESTART_CONTAINER,
            EntityKind::Pod => methods::RESTART_POD,
        };
        let timeout = self.timeout_secs(timeout);
        self.batch(kind, selector, method, Request::default(), |id| {
            json!({ "name": id, "timeout": timeout })
        })
        .await
    }

    async fn remove(
        &self,
        kind: EntityKind,
        selector: &Selector,
        opts: RemoveOptions,
    ) -> Result<BatchResult> {
        let method = match kind {
            EntityKind::Container => methods::REMOVE_CONTAINER,
            EntityKind::Pod => methods::REMOVE_POD,
        };
        let RemoveOptions { force, ignore } = opts;
        let request = Request::default().ignore_missing(ignore);
        self.batch(kind, selector, method, request, |id| {
            json!({ "name": id, "force": force })
        })
        .await
    }

    async fn prune(&self, kind: EntityKind, opts: PruneOptions) -> Result<BatchResult> {
        let method = match kind {
            EntityKind::Container => methods::PRUNE_CONTAINERS,
            EntityKind::Pod => methods::PRUNE_PODS,
        };
        if opts.workers.is_some() {
            debug!("Worker override ignored for remote {}", method);
        }
        let reply = self.call(method, json!({ "force": opts.force })).await?;
        let PruneReply { pruned, failed } = serde_json::from_value(reply)?;
        let mut batch = BatchResult::new();
        for id in pruned {
            batch.record_success(id);
        }
        for (id, error) in failed {
            batch.record_failure(id, error.into());
        }
        Ok(batch)
    }

    async fn exists(&self, kind: EntityKind, token: &str) -> Result<bool> {
        let found = self.lookup(kind, false, false, &[token]).await;
        exists_from(found.map(|ids| !ids.is_empty()))
    }

    async fn wait(&self, selector: &Selector, opts: WaitOptions) -> Result<Vec<WaitReport>> {
        let mut unresolved = BatchResult::new();
        let ids = self
            .resolve(EntityKind::Container, selector, false, &mut unresolved)
            .await?;
        let mut reports = Vec::with_capacity(ids.len());
        for id in ids {
            let name = id.as_str();
            let outcome = wait_for(name, opts, move || self.container(name)).await;
            reports.push(WaitReport::new(id, outcome));
        }
        let (_, failed) = unresolved.into_parts();
        for (token, errors) in failed {
            for e in errors {
                reports.push(WaitReport::failed(token.clone(), e));
            }
        }
        Ok(reports)
    }

    async fn list_pods(&self) -> Result<Vec<PodSnapshot>> {
        let reply = self.call(methods::LIST_PODS, Value::Null).await?;
        let pods = reply.get("pods").cloned().unwrap_or(Value::Array(Vec::new()));
        Ok(serde_json::from_value(pods)?)
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSnapshot>> {
        let reply = self.call(methods::LIST_CONTAINERS, Value::Null).await?;
        let containers = reply
            .get("containers")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));
        Ok(serde_json::from_value(containers)?)
    }
}
