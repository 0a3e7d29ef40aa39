//! Entity model shared by every adapter.
//!
//! - `EntityKind`: pod or container
//! - `LifecycleState`: low-level container state
//! - `Selector`: which entities a bulk operation targets
//! - `generate_id`: content-derived entity identifiers

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

// =============================================================================
// Entity Kind
// =============================================================================

/// The two kinds of entity under lifecycle management.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    Pod,
    Container,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pod => write!(f, "pod"),
            Self::Container => write!(f, "container"),
        }
    }
}

// =============================================================================
// Lifecycle State
// =============================================================================

/// Low-level container state.
///
/// Pods have no state of their own; see [`crate::status::pod_status`].
///
/// ```text
///   Configured ──▶ Created ──▶ Running ◀──▶ Paused
///                     ▲           │
///                     │           ▼
///                     │       Stopping ──▶ Stopped / Exited ──▶ Removing
///                     └───────────────────────────┘ (start)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Configured,
    Created,
    Running,
    Paused,
    Stopping,
    Stopped,
    Exited,
    Removing,
    #[serde(rename = "error")]
    ErrorState,
}

impl LifecycleState {
    /// Returns true if the entity has no live process.
    #[must_use]
    pub fn is_stopped(self) -> bool {
        matches!(
            self,
            Self::Configured | Self::Created | Self::Stopped | Self::Exited
        )
    }

    /// Returns true if the entity has a live (possibly frozen) process.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, Self::Running | Self::Paused | Self::Stopping)
    }

    /// Parses the lowercase wire name used by remote peers.
    #[must_use]
    pub fn from_wire(s: &str) -> Option<Self> {
        match s {
            "configured" => Some(Self::Configured),
            "created" => Some(Self::Created),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "stopping" => Some(Self::Stopping),
            "stopped" => Some(Self::Stopped),
            "exited" => Some(Self::Exited),
            "removing" => Some(Self::Removing),
            "error" => Some(Self::ErrorState),
            _ => None,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Configured => "configured",
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Exited => "exited",
            Self::Removing => "removing",
            Self::ErrorState => "error",
        };
        write!(f, "{s}")
    }
}

// =============================================================================
// Selector
// =============================================================================

/// Which entities a bulk operation targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", content = "names", rename_all = "lowercase")]
pub enum Selector {
    /// Explicit names, IDs or unique ID prefixes.
    Names(Vec<String>),
    /// The most recently created entity.
    Latest,
    /// Every entity of the kind.
    All,
}

impl Selector {
    /// Builds a selector from the `--all` / `--latest` / names inputs.
    ///
    /// `latest` wins over everything else. `all` together with explicit
    /// names is rejected, as is supplying nothing at all.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSelector`] on inconsistent inputs.
    pub fn from_flags(all: bool, latest: bool, names: Vec<String>) -> Result<Self> {
        if latest {
            return Ok(Self::Latest);
        }
        match (all, names.is_empty()) {
            (true, false) => Err(Error::InvalidSelector(
                "--all and explicit names or IDs cannot be used together".to_string(),
            )),
            (true, true) => Ok(Self::All),
            (false, false) => Ok(Self::Names(names)),
            (false, true) => Err(Error::InvalidSelector(
                "you must provide at least one name or ID, or use --all or --latest".to_string(),
            )),
        }
    }

    /// Shorthand for an explicit name list.
    pub fn names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Names(names.into_iter().map(Into::into).collect())
    }
}

// =============================================================================
// Identifiers
// =============================================================================

/// Length of a full entity ID (hex-encoded SHA-256).
pub const ID_LEN: usize = 64;

/// Length of a truncated ID for display.
pub const SHORT_ID_LEN: usize = 12;

/// Generates a new content-derived entity ID.
///
/// SHA-256 over the name, the creation instant and a random UUID, hex
/// encoded. Recreating an entity under the same name yields a new ID.
#[must_use]
pub fn generate_id(name: &str, created_at: chrono::DateTime<chrono::Utc>) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(name.as_bytes());
    hasher.update(b"\0");
    hasher.update(
        created_at
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_be_bytes(),
    );
    hasher.update(uuid::Uuid::new_v4().as_bytes());
    hex::encode(hasher.finalize())
}

/// Truncates an ID to its display length.
#[must_use]
pub fn short_id(id: &str) -> &str {
    if id.len() > SHORT_ID_LEN && id.is_char_boundary(SHORT_ID_LEN) {
        &id[..SHORT_ID_LEN]
    } else {
        id
    }
}
