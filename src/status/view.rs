//! Tabular views of pods and containers.
//!
//! All formatting choices travel in an explicit [`ViewOptions`] value.
//! Column labels come from the static [`POD_FIELDS`] and
//! [`CONTAINER_FIELDS`] tables.

use super::{ContainerSnapshot, DisplayStatus, PodSnapshot};
use crate::entity::short_id;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::str::FromStr;
use std::time::Duration;

/// Member entries shown per pod before the list is cut with `...`.
pub const MAX_MEMBER_INFO: usize = 10;

/// Field name → column header of the pod view.
pub const POD_FIELDS: &[(&str, &str)] = &[
    ("ID", "POD ID"),
    ("Name", "NAME"),
    ("Status", "STATUS"),
    ("Created", "CREATED"),
    ("NumberOfContainers", "# OF CONTAINERS"),
    ("ContainerInfo", "CONTAINER INFO"),
];

/// Field name → column header of the container view.
pub const CONTAINER_FIELDS: &[(&str, &str)] = &[
    ("ID", "CONTAINER ID"),
    ("Image", "IMAGE"),
    ("Created", "CREATED"),
    ("Status", "STATUS"),
    ("Names", "NAMES"),
    ("Pod", "POD"),
];

/// Looks up the header for a field in one of the tables.
#[must_use]
pub fn header(fields: &[(&'static str, &'static str)], field: &str) -> Option<&'static str> {
    fields.iter().find(|(f, _)| *f == field).map(|(_, h)| *h)
}

// =============================================================================
// Options
// =============================================================================

/// Sort order of a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    /// Newest first.
    #[default]
    Created,
    Id,
    Name,
    /// Fewest members first.
    Number,
    Status,
}

impl FromStr for SortKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "created" => Ok(Self::Created),
            "id" => Ok(Self::Id),
            "name" => Ok(Self::Name),
            "number" => Ok(Self::Number),
            "status" => Ok(Self::Status),
            _ => Err(Error::InvalidInput(format!(
                "invalid sort key '{s}', options are: created, id, name, number, status"
            ))),
        }
    }
}

/// Presentation options for one listing call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ViewOptions {
    /// Show full IDs and every member.
    pub no_trunc: bool,
    /// Include member IDs in the container info column.
    pub ctr_ids: bool,
    /// Include member names in the container info column.
    pub ctr_names: bool,
    /// Include member statuses in the container info column.
    pub ctr_status: bool,
    pub sort: SortKey,
}

impl ViewOptions {
    #[must_use]
    pub fn with_sort(mut self, sort: SortKey) -> Self {
        self.sort = sort;
        self
    }

    #[must_use]
    pub fn with_no_trunc(mut self, no_trunc: bool) -> Self {
        self.no_trunc = no_trunc;
        self
    }

    /// Returns true if any member detail was requested.
    #[must_use]
    pub fn shows_members(&self) -> bool {
        self.ctr_ids || self.ctr_names || self.ctr_status
    }
}

// =============================================================================
// Rows
// =============================================================================

/// One line of the pod view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodRow {
    pub id: String,
    pub name: String,
    pub status: DisplayStatus,
    pub created: String,
    pub number_of_containers: usize,
    pub container_info: String,
}

impl PodRow {
    /// Cell value for a field of [`POD_FIELDS`].
    #[must_use]
    pub fn field(&self, field: &str) -> Option<String> {
        match field {
            "ID" => Some(self.id.clone()),
            "Name" => Some(self.name.clone()),
            "Status" => Some(self.status.to_string()),
            "Created" => Some(self.created.clone()),
            "NumberOfContainers" => Some(self.number_of_containers.to_string()),
            "ContainerInfo" => Some(self.container_info.clone()),
            _ => None,
        }
    }
}

/// One line of the container view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerRow {
    pub id: String,
    pub image: String,
    pub created: String,
    pub status: DisplayStatus,
    pub names: String,
    pub pod: String,
}

impl ContainerRow {
    /// Cell value for a field of [`CONTAINER_FIELDS`].
    #[must_use]
    pub fn field(&self, field: &str) -> Option<String> {
        match field {
            "ID" => Some(self.id.clone()),
            "Image" => Some(self.image.clone()),
            "Created" => Some(self.created.clone()),
            "Status" => Some(self.status.to_string()),
            "Names" => Some(self.names.clone()),
            "Pod" => Some(self.pod.clone()),
            _ => None,
        }
    }
}

// =============================================================================
// Building
// =============================================================================

/// Sorts pods and renders them as rows.
#[must_use]
pub fn pod_rows(mut pods: Vec<PodSnapshot>, opts: &ViewOptions, now: DateTime<Utc>) -> Vec<PodRow> {
    match opts.sort {
        SortKey::Created => pods.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortKey::Id => pods.sort_by(|a, b| a.id.cmp(&b.id)),
        SortKey::Name => pods.sort_by(|a, b| a.name.cmp(&b.name)),
        SortKey::Number => pods.sort_by_key(|p| p.members.len()),
        SortKey::Status => pods.sort_by(|a, b| a.status().as_str().cmp(b.status().as_str())),
    }
    pods.iter().map(|pod| pod_row(pod, opts, now)).collect()
}

fn pod_row(pod: &PodSnapshot, opts: &ViewOptions, now: DateTime<Utc>) -> PodRow {
    let (members, truncated) = if !opts.no_trunc && pod.members.len() > MAX_MEMBER_INFO {
        (&pod.members[..MAX_MEMBER_INFO], "...")
    } else {
        (&pod.members[..], "")
    };

    let mut info = String::new();
    for member in members {
        let mut parts = Vec::with_capacity(3);
        if opts.ctr_ids {
            parts.push(display_id(&member.id, opts).to_string());
        }
        if opts.ctr_names {
            parts.push(member.name.clone());
        }
        if opts.ctr_status {
            parts.push(member.status().as_str().to_uppercase());
        }
        if !parts.is_empty() {
            info.push_str(&format!("[{}] ", parts.join(",")));
        }
    }
    info.push_str(truncated);

    PodRow {
        id: display_id(&pod.id, opts).to_string(),
        name: pod.name.clone(),
        status: pod.status(),
        created: created_ago(pod.created_at, now),
        number_of_containers: pod.members.len(),
        container_info: info,
    }
}

/// Sorts containers and renders them as rows.
#[must_use]
pub fn container_rows(
    mut containers: Vec<ContainerSnapshot>,
    opts: &ViewOptions,
    now: DateTime<Utc>,
) -> Vec<ContainerRow> {
    match opts.sort {
        SortKey::Created | SortKey::Number => {
            containers.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        }
        SortKey::Id => containers.sort_by(|a, b| a.id.cmp(&b.id)),
        SortKey::Name => containers.sort_by(|a, b| a.name.cmp(&b.name)),
        SortKey::Status => {
            containers.sort_by(|a, b| a.status().as_str().cmp(b.status().as_str()));
        }
    }
    containers
        .iter()
        .map(|c| ContainerRow {
            id: display_id(&c.id, opts).to_string(),
            image: c.image.clone(),
            created: created_ago(c.created_at, now),
            status: c.status(),
            names: c.name.clone(),
            pod: c
                .pod
                .as_deref()
                .map(|p| display_id(p, opts).to_string())
                .unwrap_or_default(),
        })
        .collect()
}

fn display_id<'a>(id: &'a str, opts: &ViewOptions) -> &'a str {
    if opts.no_trunc { id } else { short_id(id) }
}

fn created_ago(created_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    let elapsed = (now - created_at).to_std().unwrap_or_default();
    format!("{} ago", human_duration(elapsed))
}

/// Renders a duration the way `docker ps` does ("About an hour", "3 days").
#[must_use]
pub fn human_duration(d: Duration) -> String {
    let seconds = d.as_secs();
    let minutes = seconds / 60;
    let hours = ((d.as_secs_f64() / 3600.0) + 0.5) as u64;
    if seconds < 1 {
        "Less than a second".to_string()
    } else if seconds == 1 {
        "1 second".to_string()
    } else if seconds < 60 {
        format!("{seconds} seconds")
    } else if minutes == 1 {
        "About a minute".to_string()
    } else if minutes < 60 {
        format!("{minutes} minutes")
    } else if hours == 1 {
        "About an hour".to_string()
    } else if hours < 48 {
        format!("{hours} hours")
    } else if hours < 24 * 7 * 2 {
        format!("{} days", hours / 24)
    } else if hours < 24 * 30 * 2 {
        format!("{} weeks", hours / 24 / 7)
    } else if hours < 24 * 365 * 2 {
        format!("{} months", hours / 24 / 30)
    } else {
        format!("{} years", seconds / 3600 / 24 / 365)
    }
}
