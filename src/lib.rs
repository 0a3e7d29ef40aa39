//! # podbridge
//!
//! **Uniform Pod and Container Lifecycle Adapter**
//!
//! This crate runs bulk lifecycle operations (start, stop, kill, pause,
//! unpause, restart, remove, prune) over pods and containers through one
//! interface, either in-process or against a remote management service.
//!
//! # Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                           podbridge                                 │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────────────────────────────────────────────────────┐    │
//! │  │                 LifecycleAdapter Trait                      │    │
//! │  │   stop/kill/pause/unpause/restart/remove/prune(kind, sel)   │    │
//! │  │                   → BatchResult                             │    │
//! │  └─────────────────────────────────────────────────────────────┘    │
//! │                 │                               │                   │
//! │  ┌──────────────┴──────────────┐  ┌─────────────┴───────────────┐   │
//! │  │        LocalAdapter         │  │        RemoteAdapter        │   │
//! │  │  JobPool ─▶ LocalEngine     │  │  RpcChannel (JSON lines)    │   │
//! │  │  StateStore │ broadcast     │  │  ReplyStream │ upgrade      │   │
//! │  └──────────────┬──────────────┘  └─────────────┬───────────────┘   │
//! │                 │                               │                   │
//! │  ┌──────────────┴──────────────┐  ┌─────────────┴───────────────┐   │
//! │  │      ContainerRuntime       │  │  transfer │ events          │   │
//! │  │  OciCliRuntime │ Simulated  │  │  raw files │ GetEvents      │   │
//! │  └─────────────────────────────┘  └─────────────────────────────┘   │
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  status: DisplayStatus, pod aggregation, tabular views              │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Batch Semantics
//!
//! Selector resolution happens before any work is queued:
//!
//! | Selector | Nothing present | Unresolvable input |
//! |----------|-----------------|--------------------|
//! | `All` | empty [`BatchResult`] | n/a |
//! | `Latest` | call fails with [`Error::NoLatest`] | n/a |
//! | `Names` | n/a | failure keyed by the token |
//!
//! Stop and remove accept `ignore`, which drops names that match nothing.
//!
//! Per-entity failures never fail the call. A pod succeeds only when
//! neither the pod itself nor any of its members failed.
//!
//! # Error Handling
//!
//! Match on [`Error::kind`] rather than on variants: a local "not running"
//! and a remote `container_not_running` reply share
//! [`ErrorKind::NotRunning`].
//!
//! # Example
//!
//! ```rust,no_run
//! use podbridge::{EngineConfig, EntityKind, Selector, StopOptions, adapter};
//!
//! # async fn demo() -> podbridge::Result<()> {
//! let adapter = adapter::from_config(&EngineConfig::local())?;
//! let batch = adapter
//!     .stop(EntityKind::Pod, &Selector::All, StopOptions::default())
//!     .await?;
//! for (id, errors) in batch.failed() {
//!     eprintln!("{id}: {} errors", errors.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod batch;
pub mod config;
pub mod constants;
pub mod engine;
pub mod entity;
pub mod error;
pub mod events;
pub mod pool;
pub mod rpc;
pub mod runtime;
pub mod status;
pub mod transfer;

pub mod runtimes;

// Re-exports
pub use adapter::{
    KillOptions, LifecycleAdapter, LocalAdapter, PruneOptions, RemoteAdapter, RemoveOptions,
    StopOptions, WaitCondition, WaitOptions, WaitReport,
};
pub use batch::{BatchReport, BatchResult};
pub use config::{Connection, EngineConfig, RemoteEndpoint, RuntimeConfig};
pub use engine::LocalEngine;
pub use entity::{EntityKind, LifecycleState, Selector};
pub use error::{Error, ErrorCategory, ErrorKind, Result};
pub use events::{DomainEvent, EventOptions, EventStatus, EventStream, EventType};
pub use pool::{Job, JobPool, PoolOp};
pub use rpc::{Connector, RemoteErrorCode, RpcChannel};
pub use runtime::{ContainerRuntime, Signal};
pub use runtimes::{OciCliRuntime, SimulatedRuntime};
pub use status::{ContainerSnapshot, DisplayStatus, PodSnapshot};
