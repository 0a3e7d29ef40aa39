//! In-process adapter over [`LocalEngine`].
//!
//! Container batches are resolved first, then run through one
//! [`JobPool`] sized for the operation. Pod batches run pod by pod, each
//! pod fanning out over its members inside the engine.

use super::{
    KillOptions, LifecycleAdapter, PruneOptions, RemoveOptions, StopOptions, WaitOptions,
    WaitReport, exists_from, record_unresolved, wait_for,
};
use crate::batch::BatchResult;
use crate::engine::{LocalEngine, PodOutcome};
use crate::entity::{EntityKind, Selector};
use crate::error::Result;
use crate::events::DomainEvent;
use crate::pool::{Job, JobPool, PoolOp, pool_size};
use crate::status::{ContainerSnapshot, DisplayStatus, PodSnapshot};
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::debug;

/// Adapter running every operation in this process.
#[derive(Debug, Clone)]
pub struct LocalAdapter {
    engine: Arc<LocalEngine>,
}

impl LocalAdapter {
    #[must_use]
    pub fn new(engine: Arc<LocalEngine>) -> Self {
        Self { engine }
    }

    /// The engine behind this adapter.
    #[must_use]
    pub fn engine(&self) -> &Arc<LocalEngine> {
        &self.engine
    }

    /// Lifecycle events published by the engine from now on.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<DomainEvent> {
        self.engine.subscribe()
    }

    async fn container_batch<F, Fut>(
        &self,
        op: PoolOp,
        selector: &Selector,
        ignore_missing: bool,
        f: F,
    ) -> Result<BatchResult>
    where
        F: Fn(Arc<LocalEngine>, String) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let resolved = self.engine.resolve(EntityKind::Container, selector)?;
        let mut pool = JobPool::with_capacity(
            op.name(),
            pool_size(op, self.engine.max_workers()),
            resolved.ids.len(),
        );
        for id in resolved.ids {
            pool.add(Job::new(id.clone(), f(Arc::clone(&self.engine), id)));
        }
        let mut batch = pool.run().await;
        for (token, e) in resolved.unresolved {
            record_unresolved(&mut batch, token, e, ignore_missing);
        }
        Ok(batch)
    }

    async fn pod_batch<F, Fut>(
        &self,
        selector: &Selector,
        ignore_missing: bool,
        f: F,
    ) -> Result<BatchResult>
    where
        F: Fn(Arc<LocalEngine>, String) -> Fut,
        Fut: Future<Output = PodOutcome>,
    {
        let resolved = self.engine.resolve(EntityKind::Pod, selector)?;
        let mut batch = BatchResult::new();
        for id in resolved.ids {
            let outcome = f(Arc::clone(&self.engine), id.clone()).await;
            outcome.merge_into(&id, &mut batch);
        }
        for (token, e) in resolved.unresolved {
            record_unresolved(&mut batch, token, e, ignore_missing);
        }
        Ok(batch)
    }

    fn prune_candidates(&self, kind: EntityKind, force: bool) -> Result<Vec<String>> {
        let ids = match kind {
            EntityKind::Container => self
                .engine
                .list_containers()?
                .into_iter()
                .filter(|c| force || c.state.is_stopped())
                .map(|c| c.id)
                .collect(),
            EntityKind::Pod => self
                .engine
                .list_pods()?
                .into_iter()
                .filter(|p| {
                    force || p.members.is_empty() || p.status() == DisplayStatus::Exited
                })
                .map(|p| p.id)
                .collect(),
        };
        Ok(ids)
    }
}

#[async_trait]
impl LifecycleAdapter for LocalAdapter {
    fn name(&self) -> &str {
        "local"
    }

    async fn start(&self, kind: EntityKind, selector: &Selector) -> Result<BatchResult> {
        match kind {
            EntityKind::Container => {
                self.container_batch(PoolOp::Start, selector, false, |engine, id| async move {
                    engine.start_container(&id).await
                })
                .await
            }
            EntityKind::Pod => {
                self.pod_batch(selector, false, |engine, id| async move {
                    engine.start_pod(&id).await
                })
                .await
            }
        }
    }

    async fn stop(
        &self,
        kind: EntityKind,
        selector: &Selector,
        opts: StopOptions,
    ) -> Result<BatchResult> {
        let StopOptions {
            timeout,
            strict,
            ignore,
        } = opts;
        match kind {
            EntityKind::Container => {
                self.container_batch(PoolOp::Stop, selector, ignore, move |engine, id| async move {
                    engine.stop_container(&id, timeout, strict).await
                })
                .await
            }
            EntityKind::Pod => {
                self.pod_batch(selector, ignore, move |engine, id| async move {
                    engine.stop_pod(&id, timeout).await
                })
                .await
            }
        }
    }

    async fn kill(
        &self,
        kind: EntityKind,
        selector: &Selector,
        opts: KillOptions,
    ) -> Result<BatchResult> {
        let KillOptions { signal, strict } = opts;
        match kind {
            EntityKind::Container => {
                self.container_batch(PoolOp::Kill, selector, false, move |engine, id| async move {
                    engine.kill_container(&id, signal, strict).await
                })
                .await
            }
            EntityKind::Pod => {
                self.pod_batch(selector, false, move |engine, id| async move {
                    engine.kill_pod(&id, signal).await
                })
                .await
            }
        }
    }

    async fn pause(&self, kind: EntityKind, selector: &Selector) -> Result<BatchResult> {
        match kind {
            EntityKind::Container => {
                self.container_batch(PoolOp::Pause, selector, false, |engine, id| async move {
                    engine.pause_container(&id).await
                })
                .await
            }
            EntityKind::Pod => {
                self.pod_batch(selector, false, |engine, id| async move {
                    engine.pause_pod(&id).await
                })
                .await
            }
        }
    }

    async fn unpause(&self, kind: EntityKind, selector: &Selector) -> Result<BatchResult> {
        match kind {
            EntityKind::Container => {
                self.container_batch(PoolOp::Unpause, selector, false, |engine, id| async move {
                    engine.unpause_container(&id).await
                })
                .await
            }
            EntityKind::Pod => {
                self.pod_batch(selector, false, |engine, id| async move {
                    engine.unpause_pod(&id).await
                })
                .await
            }
        }
    }

    async fn restart(
        &self,
        kind: EntityKind,
        selector: &Selector,
        timeout: Option<Duration>,
    ) -> Result<BatchResult> {
        match kind {
            EntityKind::Container => {
                self.container_batch(
                    PoolOp::Restart,
                    selector,
                    false,
                    move |engine, id| async move { engine.restart_container(&id, timeout).await },
                )
                .await
            }
            EntityKind::Pod => {
                self.pod_batch(selector, false, move |engine, id| async move {
                    engine.restart_pod(&id, timeout).await
                })
                .await
            }
        }
    }

    async fn remove(
        &self,
        kind: EntityKind,
        selector: &Selector,
        opts: RemoveOptions,
    ) -> Result<BatchResult> {
        let RemoveOptions { force, ignore } = opts;
        match kind {
            EntityKind::Container => {
                self.container_batch(
                    PoolOp::Remove,
                    selector,
                    ignore,
                    move |engine, id| async move { engine.remove_container(&id, force).await },
                )
                .await
            }
            EntityKind::Pod => {
                self.pod_batch(selector, ignore, move |engine, id| async move {
                    engine.remove_pod(&id, force).await
                })
                .await
            }
        }
    }

    async fn prune(&self, kind: EntityKind, opts: PruneOptions) -> Result<BatchResult> {
        let candidates = self.prune_candidates(kind, opts.force)?;
        let workers = pool_size(PoolOp::Prune, opts.workers.or(self.engine.max_workers()));
        debug!("Pruning {} {}s with {} workers", candidates.len(), kind, workers);

        let force = opts.force;
        let mut pool = JobPool::with_capacity(format!("{kind}_prune"), workers, candidates.len());
        for id in candidates {
            let engine = Arc::clone(&self.engine);
            let job_id = id.clone();
            match kind {
                EntityKind::Container => pool.add(Job::new(job_id, async move {
                    engine.remove_container(&id, force).await
                })),
                EntityKind::Pod => pool.add(Job::collecting(job_id, async move {
                    engine.remove_pod(&id, force).await.into_errors()
                })),
            }
        }
        Ok(pool.run().await)
    }

    async fn exists(&self, kind: EntityKind, token: &str) -> Result<bool> {
        exists_from(self.engine.store().lookup(kind, token).map(|_| true))
    }

    async fn wait(&self, selector: &Selector, opts: WaitOptions) -> Result<Vec<WaitReport>> {
        let resolved = self.engine.resolve(EntityKind::Container, selector)?;
        let mut reports = Vec::with_capacity(resolved.ids.len() + resolved.unresolved.len());
        for id in resolved.ids {
            let store = self.engine.store();
            let outcome = wait_for(&id, opts, || {
                std::future::ready(store.container(&id).map(|record| record.snapshot()))
            })
            .await;
            reports.push(WaitReport::new(id, outcome));
        }
        for (token, e) in resolved.unresolved {
            reports.push(WaitReport::failed(token, e));
        }
        Ok(reports)
    }

    async fn list_pods(&self) -> Result<Vec<PodSnapshot>> {
        self.engine.list_pods()
    }

    async fn list_containers(&self) -> Result<Vec<ContainerSnapshot>> {
        self.engine.list_containers()
    }
}
