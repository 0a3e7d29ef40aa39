//! Local lifecycle engine.
//!
//! The engine owns the [`StateStore`] and a [`ContainerRuntime`]. Every
//! operation checks the transition against the stored state first, marks
//! intermediate states (`Stopping`, `Removing`) while the runtime works,
//! and reverts on runtime failure.
//!
//! ```text
//!  LocalAdapter ──▶ LocalEngine ──check──▶ StateStore
//!                        │
//!                        ├──act───▶ ContainerRuntime
//!                        │
//!                        └──publish──▶ broadcast<DomainEvent>
//! ```
//!
//! Pod operations fan out over the pod's members through a [`JobPool`] and
//! report the pod-level outcome separately from the members' outcomes.

mod store;

pub use store::{ContainerRecord, PodRecord, StateStore};

use crate::batch::BatchResult;
use crate::config::EngineConfig;
use crate::constants::EVENT_CHANNEL_CAPACITY;
use crate::entity::{EntityKind, LifecycleState, Selector};
use crate::error::{Error, Result};
use crate::events::{DomainEvent, EventStatus, EventType};
use crate::pool::{Job, JobPool, PoolOp, pool_size};
use crate::runtime::{ContainerRuntime, Signal};
use crate::runtimes::OciCliRuntime;
use crate::status::{ContainerSnapshot, PodSnapshot};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

// =============================================================================
// Resolution
// =============================================================================

/// Outcome of resolving a selector.
#[derive(Debug, Default)]
pub struct Resolved {
    /// Distinct IDs, in selector order.
    pub ids: Vec<String>,
    /// Tokens that did not resolve, with the reason.
    pub unresolved: Vec<(String, Error)>,
}

/// Result of one pod-level operation.
#[derive(Debug, Default)]
pub struct PodOutcome {
    /// Failure of the pod itself (vanished, not removable, ...).
    pub pod_error: Option<Error>,
    /// Outcomes per member container.
    pub members: BatchResult,
}

impl PodOutcome {
    fn failed(error: Error) -> Self {
        Self {
            pod_error: Some(error),
            members: BatchResult::new(),
        }
    }

    /// Returns true if neither the pod nor any member failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.pod_error.is_none() && self.members.is_success()
    }

    /// Every error of both layers, the pod's own first. Member errors are
    /// wrapped with the member's ID.
    #[must_use]
    pub fn into_errors(self) -> Vec<Error> {
        let mut errors: Vec<Error> = self.pod_error.into_iter().collect();
        let (_, member_failures) = self.members.into_parts();
        for (container, member_errors) in member_failures {
            errors.extend(
                member_errors
                    .into_iter()
                    .map(|e| Error::member(container.clone(), e)),
            );
        }
        errors
    }

    /// Folds both layers into `batch` under the pod's ID.
    pub fn merge_into(self, pod_id: &str, batch: &mut BatchResult) {
        batch.record_errors(pod_id, self.into_errors());
    }
}

// =============================================================================
// Engine
// =============================================================================

/// In-process pod and container lifecycle engine.
pub struct LocalEngine {
    store: StateStore,
    runtime: Arc<dyn ContainerRuntime>,
    events: broadcast::Sender<DomainEvent>,
    stop_timeout: Duration,
    max_workers: Option<usize>,
}

impl std::fmt::Debug for LocalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalEngine")
            .field("runtime", &self.runtime.name())
            .field("stop_timeout", &self.stop_timeout)
            .field("max_workers", &self.max_workers)
            .finish_non_exhaustive()
    }
}

impl LocalEngine {
    /// Creates an engine on top of a runtime backend.
    #[must_use]
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            store: StateStore::new(),
            runtime,
            events,
            stop_timeout: crate::constants::DEFAULT_STOP_TIMEOUT,
            max_workers: None,
        }
    }

    /// Creates an engine driving the configured OCI runtime binary.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        let runtime = OciCliRuntime::new(&config.runtime.binary, &config.runtime.root);
        Self::new(Arc::new(runtime))
            .with_stop_timeout(config.stop_timeout())
            .with_max_workers(config.max_workers)
    }

    /// Sets the default stop timeout.
    #[must_use]
    pub fn with_stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Overrides the per-operation default worker counts.
    #[must_use]
    pub fn with_max_workers(mut self, workers: Option<usize>) -> Self {
        self.max_workers = workers;
        self
    }

    #[must_use]
    pub fn store(&self) -> &StateStore {
        &self.store
    }

    #[must_use]
    pub fn stop_timeout(&self) -> Duration {
        self.stop_timeout
    }

    #[must_use]
    pub fn max_workers(&self) -> Option<usize> {
        self.max_workers
    }

    /// Subscribes to lifecycle events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DomainEvent> {
        self.events.subscribe()
    }

    fn publish(&self, kind: EventType, status: EventStatus, id: &str, name: &str, image: &str) {
        // No subscribers is fine.
        let _ = self
            .events
            .send(DomainEvent::now(kind, status, id, name).with_image(image));
    }

    fn container_event(&self, status: EventStatus, record: &ContainerRecord) {
        self.publish(
            EventType::Container,
            status,
            &record.id,
            &record.name,
            &record.image,
        );
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Registers a new pod.
    ///
    /// # Errors
    ///
    /// [`Error::NameInUse`] if the name is held.
    pub fn create_pod(&self, name: &str) -> Result<String> {
        let pod = self.store.insert_pod(name)?;
        info!("Created pod {} ({})", pod.name, pod.id);
        self.publish(EventType::Pod, EventStatus::Create, &pod.id, &pod.name, "");
        Ok(pod.id)
    }

    /// Registers a new container in state `Created`.
    ///
    /// # Errors
    ///
    /// [`Error::NameInUse`] if the name is held, [`Error::NoSuchPod`] if
    /// `pod` does not resolve.
    pub fn create_container(&self, name: &str, image: &str, pod: Option<&str>) -> Result<String> {
        let record = self.store.insert_container(name, image, pod)?;
        info!("Created container {} ({})", record.name, record.id);
        self.container_event(EventStatus::Create, &record);
        Ok(record.id)
    }

    /// Resolves a selector to distinct IDs.
    ///
    /// # Errors
    ///
    /// [`Error::NoLatest`] if `Latest` finds nothing; lookup failures of
    /// `Names` tokens are returned in [`Resolved::unresolved`] instead.
    pub fn resolve(&self, kind: EntityKind, selector: &Selector) -> Result<Resolved> {
        let mut resolved = Resolved::default();
        match selector {
            Selector::All => resolved.ids = self.store.ids(kind)?,
            Selector::Latest => match self.store.latest(kind)? {
                Some(id) => resolved.ids.push(id),
                None => return Err(Error::NoLatest(kind)),
            },
            Selector::Names(tokens) => {
                let mut seen = HashSet::new();
                for token in tokens {
                    match self.store.lookup(kind, token) {
                        Ok(id) => {
                            if seen.insert(id.clone()) {
                                resolved.ids.push(id);
                            }
                        }
                        Err(e) => resolved.unresolved.push((token.clone(), e)),
                    }
                }
            }
        }
        Ok(resolved)
    }

    /// Snapshots of every container.
    pub fn list_containers(&self) -> Result<Vec<ContainerSnapshot>> {
        self.store.container_snapshots()
    }

    /// Snapshots of every pod.
    pub fn list_pods(&self) -> Result<Vec<PodSnapshot>> {
        self.store.pod_snapshots()
    }

    // =========================================================================
    // Container Operations
    // =========================================================================

    /// Starts a container that is not running. Already running is success.
    pub async fn start_container(&self, id: &str) -> Result<()> {
        let record = self.store.container(id)?;
        match record.state {
            LifecycleState::Running => return Ok(()),
            state if state.is_stopped() => {}
            state => return Err(invalid_state(id, state, "created, stopped or exited")),
        }
        self.runtime.start(id).await?;
        self.store.set_state(id, LifecycleState::Running, None)?;
        info!("Container {} started", id);
        self.container_event(EventStatus::Start, &record);
        Ok(())
    }

    /// SIGTERM, wait, SIGKILL. Not running is success unless `strict`.
    pub async fn stop_container(
        &self,
        id: &str,
        timeout: Option<Duration>,
        strict: bool,
    ) -> Result<()> {
        let timeout = timeout.unwrap_or(self.stop_timeout);
        let record = self.store.container(id)?;
        let previous = self.store.transition(id, |r| match r.state {
            LifecycleState::Running | LifecycleState::Paused => Ok(LifecycleState::Stopping),
            _ => Ok(r.state),
        })?;
        match previous {
            LifecycleState::Running | LifecycleState::Paused => {}
            LifecycleState::Stopping => {
                return Err(invalid_state(id, previous, "running or paused"));
            }
            _ if strict => {
                return Err(Error::NotRunning {
                    kind: EntityKind::Container,
                    id: id.to_string(),
                });
            }
            _ => {
                debug!("Container {} already stopped", id);
                return Ok(());
            }
        }

        let stopped = async {
            if previous == LifecycleState::Paused {
                self.runtime.unpause(id).await?;
            }
            self.runtime.stop(id, timeout).await
        }
        .await;
        match stopped {
            Ok(exit_code) => {
                self.store.set_state(id, LifecycleState::Exited, exit_code)?;
                info!("Container {} stopped", id);
                self.container_event(EventStatus::Stop, &record);
                Ok(())
            }
            Err(e) => {
                self.store.set_state(id, previous, None)?;
                Err(e)
            }
        }
    }

    /// Delivers a signal to a running or paused container.
    pub async fn kill_container(&self, id: &str, signal: Signal, strict: bool) -> Result<()> {
        let record = self.store.container(id)?;
        if !matches!(record.state, LifecycleState::Running | LifecycleState::Paused) {
            if strict {
                return Err(Error::NotRunning {
                    kind: EntityKind::Container,
                    id: id.to_string(),
                });
            }
            debug!("Container {} not running, skipping {}", id, signal);
            return Ok(());
        }
        if let Some(exit_code) = self.runtime.kill(id, signal).await? {
            self.store
                .set_state(id, LifecycleState::Exited, Some(exit_code))?;
        }
        info!("Sent {} to container {}", signal, id);
        self.container_event(EventStatus::Kill, &record);
        Ok(())
    }

    /// Freezes a running container.
    pub async fn pause_container(&self, id: &str) -> Result<()> {
        let record = self.store.container(id)?;
        if record.state != LifecycleState::Running {
            return Err(invalid_state(id, record.state, "running"));
        }
        self.runtime.pause(id).await?;
        self.store.set_state(id, LifecycleState::Paused, None)?;
        info!("Container {} paused", id);
        self.container_event(EventStatus::Pause, &record);
        Ok(())
    }

    /// Thaws a paused container.
    pub async fn unpause_container(&self, id: &str) -> Result<()> {
        let record = self.store.container(id)?;
        if record.state != LifecycleState::Paused {
            return Err(invalid_state(id, record.state, "paused"));
        }
        self.runtime.unpause(id).await?;
        self.store.set_state(id, LifecycleState::Running, None)?;
        info!("Container {} unpaused", id);
        self.container_event(EventStatus::Unpause, &record);
        Ok(())
    }

    /// Stops the container if it runs, then starts it. Paused fails.
    pub async fn restart_container(&self, id: &str, timeout: Option<Duration>) -> Result<()> {
        let record = self.store.container(id)?;
        match record.state {
            LifecycleState::Running => self.stop_container(id, timeout, false).await?,
            state if state.is_stopped() => {}
            state => return Err(invalid_state(id, state, "running or stopped")),
        }
        self.start_container(id).await?;
        self.container_event(EventStatus::Restart, &record);
        Ok(())
    }

    /// Removes a stopped container; with `force`, stops it first.
    pub async fn remove_container(&self, id: &str, force: bool) -> Result<()> {
        let record = self.store.container(id)?;
        if !record.state.is_stopped() {
            if !force {
                return Err(Error::NotStopped {
                    kind: EntityKind::Container,
                    id: id.to_string(),
                    state: record.state.to_string(),
                });
            }
            self.stop_container(id, None, false).await?;
        }

        let previous = self.store.transition(id, |r| {
            if r.state.is_stopped() || (force && r.state == LifecycleState::ErrorState) {
                Ok(LifecycleState::Removing)
            } else {
                Err(Error::NotStopped {
                    kind: EntityKind::Container,
                    id: r.id.clone(),
                    state: r.state.to_string(),
                })
            }
        })?;
        if let Err(e) = self.runtime.delete(id, force).await {
            self.store.set_state(id, previous, None)?;
            return Err(e);
        }
        self.store.remove_container(id)?;
        info!("Container {} removed", id);
        self.container_event(EventStatus::Remove, &record);
        Ok(())
    }

    // =========================================================================
    // Pod Operations
    // =========================================================================

    /// Runs `op` on every member of a pod through a job pool.
    async fn fan_out<F, Fut>(self: &Arc<Self>, pod_id: &str, op: PoolOp, f: F) -> PodOutcome
    where
        F: Fn(Arc<Self>, String) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let members = match self.store.pod(pod_id) {
            Ok(pod) => pod.members,
            Err(e) => return PodOutcome::failed(e),
        };
        let mut pool = JobPool::with_capacity(
            format!("pod_{}", op.name()),
            pool_size(op, self.max_workers),
            members.len(),
        );
        for member in members {
            pool.add(Job::new(member.clone(), f(Arc::clone(self), member)));
        }
        let members = pool.run().await;

        let pod_error = match self.store.has_pod(pod_id) {
            Ok(true) => None,
            Ok(false) => Some(Error::NoSuchPod(pod_id.to_string())),
            Err(e) => Some(e),
        };
        PodOutcome { pod_error, members }
    }

    fn pod_event(&self, status: EventStatus, pod_id: &str) {
        if let Ok(pod) = self.store.pod(pod_id) {
            self.publish(EventType::Pod, status, &pod.id, &pod.name, "");
        }
    }

    /// Starts every member of a pod.
    pub async fn start_pod(self: &Arc<Self>, pod_id: &str) -> PodOutcome {
        let outcome = self
            .fan_out(pod_id, PoolOp::Start, |engine, id| async move {
                engine.start_container(&id).await
            })
            .await;
        if outcome.is_success() {
            self.pod_event(EventStatus::Start, pod_id);
        }
        outcome
    }

    /// Stops every running member of a pod.
    pub async fn stop_pod(self: &Arc<Self>, pod_id: &str, timeout: Option<Duration>) -> PodOutcome {
        let outcome = self
            .fan_out(pod_id, PoolOp::Stop, move |engine, id| async move {
                engine.stop_container(&id, timeout, false).await
            })
            .await;
        if outcome.is_success() {
            self.pod_event(EventStatus::Stop, pod_id);
        }
        outcome
    }

    /// Signals every running member of a pod.
    pub async fn kill_pod(self: &Arc<Self>, pod_id: &str, signal: Signal) -> PodOutcome {
        let outcome = self
            .fan_out(pod_id, PoolOp::Kill, move |engine, id| async move {
                engine.kill_container(&id, signal, false).await
            })
            .await;
        if outcome.is_success() {
            self.pod_event(EventStatus::Kill, pod_id);
        }
        outcome
    }

    /// Pauses every running member of a pod; others are left alone.
    pub async fn pause_pod(self: &Arc<Self>, pod_id: &str) -> PodOutcome {
        let outcome = self
            .fan_out(pod_id, PoolOp::Pause, |engine, id| async move {
                match engine.store.container(&id)?.state {
                    LifecycleState::Running => engine.pause_container(&id).await,
                    _ => Ok(()),
                }
            })
            .await;
        if outcome.is_success() {
            self.pod_event(EventStatus::Pause, pod_id);
        }
        outcome
    }

    /// Unpauses every paused member of a pod; others are left alone.
    pub async fn unpause_pod(self: &Arc<Self>, pod_id: &str) -> PodOutcome {
        let outcome = self
            .fan_out(pod_id, PoolOp::Unpause, |engine, id| async move {
                match engine.store.container(&id)?.state {
                    LifecycleState::Paused => engine.unpause_container(&id).await,
                    _ => Ok(()),
                }
            })
            .await;
        if outcome.is_success() {
            self.pod_event(EventStatus::Unpause, pod_id);
        }
        outcome
    }

    /// Restarts every member of a pod.
    pub async fn restart_pod(
        self: &Arc<Self>,
        pod_id: &str,
        timeout: Option<Duration>,
    ) -> PodOutcome {
        let outcome = self
            .fan_out(pod_id, PoolOp::Restart, move |engine, id| async move {
                engine.restart_container(&id, timeout).await
            })
            .await;
        if outcome.is_success() {
            self.pod_event(EventStatus::Restart, pod_id);
        }
        outcome
    }

    /// Removes a pod and all its members.
    ///
    /// Without `force`, a pod with any active member fails as a whole and
    /// nothing is removed. With `force`, members are stopped first.
    pub async fn remove_pod(self: &Arc<Self>, pod_id: &str, force: bool) -> PodOutcome {
        let pod = match self.store.pod(pod_id) {
            Ok(pod) => pod,
            Err(e) => return PodOutcome::failed(e),
        };
        if !force {
            for member in &pod.members {
                if let Ok(record) = self.store.container(member)
                    && !record.state.is_stopped()
                {
                    return PodOutcome::failed(Error::NotStopped {
                        kind: EntityKind::Pod,
                        id: pod_id.to_string(),
                        state: format!("running container {}", record.id),
                    });
                }
            }
        }

        let mut outcome = self
            .fan_out(pod_id, PoolOp::Remove, move |engine, id| async move {
                engine.remove_container(&id, force).await
            })
            .await;
        if !outcome.is_success() {
            return outcome;
        }
        match self.store.remove_pod(pod_id) {
            Ok(pod) => {
                info!("Pod {} removed", pod_id);
                self.publish(EventType::Pod, EventStatus::Remove, &pod.id, &pod.name, "");
            }
            Err(e) => outcome.pod_error = Some(e),
        }
        outcome
    }
}

fn invalid_state(id: &str, state: LifecycleState, expected: &str) -> Error {
    Error::InvalidState {
        kind: EntityKind::Container,
        id: id.to_string(),
        state,
        expected: expected.to_string(),
    }
}
