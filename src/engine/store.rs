//! In-memory state store for the local engine.
//!
//! Holds every container and pod record behind one lock so pod membership
//! and container records never disagree. Lookups accept a full ID, an
//! exact name, or a unique ID prefix.

use crate::entity::{EntityKind, LifecycleState, generate_id};
use crate::error::{Error, Result};
use crate::status::{ContainerSnapshot, PodSnapshot, resolve_pod};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Stored state of one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    pub id: String,
    pub name: String,
    pub image: String,
    pub created_at: DateTime<Utc>,
    pub state: LifecycleState,
    pub pod: Option<String>,
    pub exit_code: Option<i32>,
}

impl ContainerRecord {
    #[must_use]
    pub fn snapshot(&self) -> ContainerSnapshot {
        ContainerSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            image: self.image.clone(),
            state: self.state,
            pod: self.pod.clone(),
            created_at: self.created_at,
            exit_code: self.exit_code,
        }
    }
}

/// Stored state of one pod. Pods keep membership only, never a state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodRecord {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub members: Vec<String>,
}

#[derive(Debug, Default)]
struct Inner {
    containers: HashMap<String, ContainerRecord>,
    pods: HashMap<String, PodRecord>,
}

/// Container and pod records.
#[derive(Debug, Default)]
pub struct StateStore {
    inner: RwLock<Inner>,
}

impl StateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|e| Error::Internal(format!("lock poisoned: {e}")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|e| Error::Internal(format!("lock poisoned: {e}")))
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Registers a pod with no members.
    ///
    /// # Errors
    ///
    /// [`Error::NameInUse`] if another pod holds the name.
    pub fn insert_pod(&self, name: &str) -> Result<PodRecord> {
        let mut inner = self.write()?;
        if inner.pods.values().any(|p| p.name == name) {
            return Err(Error::NameInUse(name.to_string()));
        }
        let created_at = Utc::now();
        let record = PodRecord {
            id: generate_id(name, created_at),
            name: name.to_string(),
            created_at,
            members: Vec::new(),
        };
        inner.pods.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    /// Registers a container in state `Created`, optionally inside a pod.
    ///
    /// # Errors
    ///
    /// [`Error::NameInUse`] if another container holds the name,
    /// [`Error::NoSuchPod`] if `pod` does not resolve.
    pub fn insert_container(
        &self,
        name: &str,
        image: &str,
        pod: Option<&str>,
    ) -> Result<ContainerRecord> {
        let mut inner = self.write()?;
        if inner.containers.values().any(|c| c.name == name) {
            return Err(Error::NameInUse(name.to_string()));
        }
        let pod_id = match pod {
            Some(token) => Some(lookup_in(&inner, EntityKind::Pod, token)?),
            None => None,
        };
        let created_at = Utc::now();
        let record = ContainerRecord {
            id: generate_id(name, created_at),
            name: name.to_string(),
            image: image.to_string(),
            created_at,
            state: LifecycleState::Created,
            pod: pod_id.clone(),
            exit_code: None,
        };
        if let Some(pod_id) = &pod_id
            && let Some(pod) = inner.pods.get_mut(pod_id)
        {
            pod.members.push(record.id.clone());
        }
        inner.containers.insert(record.id.clone(), record.clone());
        Ok(record)
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Resolves a name, full ID or unique ID prefix to a full ID.
    ///
    /// # Errors
    ///
    /// [`Error::NoSuchContainer`] / [`Error::NoSuchPod`] when nothing
    /// matches, [`Error::AmbiguousId`] when a prefix matches several.
    pub fn lookup(&self, kind: EntityKind, token: &str) -> Result<String> {
        let inner = self.read()?;
        lookup_in(&inner, kind, token)
    }

    /// All IDs of one kind, oldest first.
    pub fn ids(&self, kind: EntityKind) -> Result<Vec<String>> {
        let inner = self.read()?;
        let mut entries: Vec<(DateTime<Utc>, String)> = match kind {
            EntityKind::Container => inner
                .containers
                .values()
                .map(|c| (c.created_at, c.id.clone()))
                .collect(),
            EntityKind::Pod => inner
                .pods
                .values()
                .map(|p| (p.created_at, p.id.clone()))
                .collect(),
        };
        entries.sort();
        Ok(entries.into_iter().map(|(_, id)| id).collect())
    }

    /// Most recently created entity of one kind.
    pub fn latest(&self, kind: EntityKind) -> Result<Option<String>> {
        Ok(self.ids(kind)?.pop())
    }

    /// Copy of a container record.
    pub fn container(&self, id: &str) -> Result<ContainerRecord> {
        self.read()?
            .containers
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NoSuchContainer(id.to_string()))
    }

    /// Copy of a pod record.
    pub fn pod(&self, id: &str) -> Result<PodRecord> {
        self.read()?
            .pods
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NoSuchPod(id.to_string()))
    }

    /// Returns true if the pod is still registered.
    pub fn has_pod(&self, id: &str) -> Result<bool> {
        Ok(self.read()?.pods.contains_key(id))
    }

    /// Snapshots of every container.
    pub fn container_snapshots(&self) -> Result<Vec<ContainerSnapshot>> {
        Ok(self
            .read()?
            .containers
            .values()
            .map(ContainerRecord::snapshot)
            .collect())
    }

    /// Snapshots of every pod with its current members.
    pub fn pod_snapshots(&self) -> Result<Vec<PodSnapshot>> {
        let pods: Vec<PodRecord> = self.read()?.pods.values().cloned().collect();
        pods.iter()
            .map(|p| {
                resolve_pod(&p.id, &p.name, p.created_at, &p.members, |id| {
                    Ok(self.read()?.containers.get(id).map(ContainerRecord::snapshot))
                })
            })
            .collect()
    }

    // =========================================================================
    // Mutation
    // =========================================================================

    /// Atomically checks and updates a container's state.
    ///
    /// `f` sees the current state and returns the new one, or an error that
    /// leaves the record untouched. Returns the previous state.
    pub fn transition<F>(&self, id: &str, f: F) -> Result<LifecycleState>
    where
        F: FnOnce(&ContainerRecord) -> Result<LifecycleState>,
    {
        let mut inner = self.write()?;
        let record = inner
            .containers
            .get_mut(id)
            .ok_or_else(|| Error::NoSuchContainer(id.to_string()))?;
        let previous = record.state;
        record.state = f(record)?;
        Ok(previous)
    }

    /// Sets a container's state and exit code unconditionally.
    pub fn set_state(&self, id: &str, state: LifecycleState, exit_code: Option<i32>) -> Result<()> {
        let mut inner = self.write()?;
        let record = inner
            .containers
            .get_mut(id)
            .ok_or_else(|| Error::NoSuchContainer(id.to_string()))?;
        record.state = state;
        if exit_code.is_some() {
            record.exit_code = exit_code;
        }
        Ok(())
    }

    /// Drops a container record and its pod membership.
    pub fn remove_container(&self, id: &str) -> Result<ContainerRecord> {
        let mut inner = self.write()?;
        let record = inner
            .containers
            .remove(id)
            .ok_or_else(|| Error::NoSuchContainer(id.to_string()))?;
        if let Some(pod_id) = &record.pod
            && let Some(pod) = inner.pods.get_mut(pod_id)
        {
            pod.members.retain(|m| m != id);
        }
        Ok(record)
    }

    /// Drops a pod record.
    ///
    /// # Errors
    ///
    /// [`Error::NotStopped`] if the pod still has members.
    pub fn remove_pod(&self, id: &str) -> Result<PodRecord> {
        let mut inner = self.write()?;
        let pod = inner
            .pods
            .get(id)
            .ok_or_else(|| Error::NoSuchPod(id.to_string()))?;
        if !pod.members.is_empty() {
            return Err(Error::NotStopped {
                kind: EntityKind::Pod,
                id: id.to_string(),
                state: format!("holding {} containers", pod.members.len()),
            });
        }
        inner
            .pods
            .remove(id)
            .ok_or_else(|| Error::NoSuchPod(id.to_string()))
    }
}

fn lookup_in(inner: &Inner, kind: EntityKind, token: &str) -> Result<String> {
    let entries: Vec<(&str, &str)> = match kind {
        EntityKind::Container => inner
            .containers
            .values()
            .map(|c| (c.id.as_str(), c.name.as_str()))
            .collect(),
        EntityKind::Pod => inner
            .pods
            .values()
            .map(|p| (p.id.as_str(), p.name.as_str()))
            .collect(),
    };

    if let Some((id, _)) = entries.iter().find(|(id, name)| *id == token || *name == token) {
        return Ok((*id).to_string());
    }
    if token.is_empty() || !token.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::no_such(kind, token));
    }
    let mut matches = entries.iter().filter(|(id, _)| id.starts_with(token));
    match (matches.next(), matches.next()) {
        (Some((id, _)), None) => Ok((*id).to_string()),
        (Some(_), Some(_)) => Err(Error::AmbiguousId {
            token: token.to_string(),
            kind,
        }),
        (None, _) => Err(Error::no_such(kind, token)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_is_unique_per_kind() {
        let store = StateStore::new();
        store.insert_container("web", "nginx", None).unwrap();
        assert!(matches!(
            store.insert_container("web", "nginx", None),
            Err(Error::NameInUse(_))
        ));
        // Pods have their own namespace.
        assert!(store.insert_pod("web").is_ok());
    }

    #[test]
    fn test_name_reusable_after_removal() {
        let store = StateStore::new();
        let first = store.insert_container("web", "nginx", None).unwrap();
        store.remove_container(&first.id).unwrap();
        let second = store.insert_container("web", "nginx", None).unwrap();
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_lookup_by_prefix() {
        let store = StateStore::new();
        let record = store.insert_container("web", "nginx", None).unwrap();
        let found = store
            .lookup(EntityKind::Container, &record.id[..8])
            .unwrap();
        assert_eq!(found, record.id);
        assert!(matches!(
            store.lookup(EntityKind::Container, "zzz"),
            Err(Error::NoSuchContainer(_))
        ));
    }

    #[test]
    fn test_pod_membership_follows_removal() {
        let store = StateStore::new();
        let pod = store.insert_pod("p").unwrap();
        let ctr = store.insert_container("c", "img", Some("p")).unwrap();
        assert_eq!(store.pod(&pod.id).unwrap().members, vec![ctr.id.clone()]);
        assert!(store.remove_pod(&pod.id).is_err());
        store.remove_container(&ctr.id).unwrap();
        assert!(store.pod(&pod.id).unwrap().members.is_empty());
        assert!(store.remove_pod(&pod.id).is_ok());
    }
}
