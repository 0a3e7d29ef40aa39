//! Display status of containers and derived status of pods.
//!
//! Pods carry no state of their own. Their status is computed from the
//! members' states every time it is asked for:
//!
//! | Members                          | Pod status |
//! |----------------------------------|------------|
//! | any `Running`                    | Running    |
//! | else any `Paused`                | Paused     |
//! | else all exited (and at least 1) | Exited     |
//! | otherwise, including no members  | Created    |

pub mod view;

use crate::entity::LifecycleState;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// User-facing status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DisplayStatus {
    Created,
    Running,
    Paused,
    Exited,
    Error,
}

impl DisplayStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Created => "Created",
            Self::Running => "Running",
            Self::Paused => "Paused",
            Self::Exited => "Exited",
            Self::Error => "Error",
        }
    }
}

impl std::fmt::Display for DisplayStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps a container state onto its display status.
#[must_use]
pub fn container_status(state: LifecycleState) -> DisplayStatus {
    match state {
        LifecycleState::Created | LifecycleState::Configured => DisplayStatus::Created,
        LifecycleState::Running => DisplayStatus::Running,
        LifecycleState::Paused => DisplayStatus::Paused,
        LifecycleState::Exited | LifecycleState::Stopped => DisplayStatus::Exited,
        _ => DisplayStatus::Error,
    }
}

/// Derives a pod's status from its members' states.
#[must_use]
pub fn pod_status<I>(members: I) -> DisplayStatus
where
    I: IntoIterator<Item = LifecycleState>,
{
    let mut total = 0usize;
    let mut exited = 0usize;
    let mut paused = false;
    for state in members {
        total += 1;
        match state {
            LifecycleState::Running => return DisplayStatus::Running,
            LifecycleState::Paused => paused = true,
            LifecycleState::Exited | LifecycleState::Stopped => exited += 1,
            _ => {}
        }
    }
    if paused {
        DisplayStatus::Paused
    } else if total > 0 && exited == total {
        DisplayStatus::Exited
    } else {
        DisplayStatus::Created
    }
}

// =============================================================================
// Snapshots
// =============================================================================

/// Point-in-time view of one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerSnapshot {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub image: String,
    pub state: LifecycleState,
    #[serde(default)]
    pub pod: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

impl ContainerSnapshot {
    #[must_use]
    pub fn status(&self) -> DisplayStatus {
        container_status(self.state)
    }
}

/// Point-in-time view of one pod and the members that still existed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodSnapshot {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub members: Vec<ContainerSnapshot>,
}

impl PodSnapshot {
    /// Derived pod status.
    #[must_use]
    pub fn status(&self) -> DisplayStatus {
        pod_status(self.members.iter().map(|m| m.state))
    }
}

/// Builds a pod snapshot by fetching each listed member.
///
/// `fetch` returns `Ok(None)` (or a "no such container" error) for a member
/// that was removed after the pod was listed; such members are skipped.
///
/// # Errors
///
/// Any other fetch error is returned.
pub fn resolve_pod<F>(
    id: &str,
    name: &str,
    created_at: DateTime<Utc>,
    member_ids: &[String],
    mut fetch: F,
) -> Result<PodSnapshot>
where
    F: FnMut(&str) -> Result<Option<ContainerSnapshot>>,
{
    let mut members = Vec::with_capacity(member_ids.len());
    for member in member_ids {
        match fetch(member) {
            Ok(Some(snapshot)) => members.push(snapshot),
            Ok(None) | Err(Error::NoSuchContainer(_)) => {
                warn!("Container {} of pod {} vanished during listing", member, id);
            }
            Err(e) => return Err(e),
        }
    }
    Ok(PodSnapshot {
        id: id.to_string(),
        name: name.to_string(),
        created_at,
        members,
    })
}
