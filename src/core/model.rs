//! Replication data model: nodes, resources, and registry records.

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Namespace (group) identifier.
pub type NamespaceId = u64;
/// Project identifier.
pub type ProjectId = u64;

/// Role of a node in the replication topology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Source of truth.
    Primary,
    /// Replica target; the only role that dispatches downloads.
    Secondary,
}

/// Kind of replicable resource. The set is closed: every variant has a
/// matching [`TypePolicy`](crate::core::TypePolicy).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    /// Content-addressed blob object.
    Blob,
    /// User-uploaded attachment (avatars, logos, note files).
    Attachment,
}

impl ResourceType {
    /// Every known resource type, in default interleave order.
    pub const ALL: [Self; 2] = [Self::Blob, Self::Attachment];

    /// Stable lowercase name used in logs and transfer paths.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Attachment => "attachment",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a resource: `(resource_type, resource_id)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    /// Resource type.
    pub resource_type: ResourceType,
    /// Identifier unique within the type.
    pub id: u64,
}

impl ResourceKey {
    /// Build a key.
    pub const fn new(resource_type: ResourceType, id: u64) -> Self {
        Self { resource_type, id }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.resource_type, self.id)
    }
}

/// What a resource belongs to, for namespace filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Owner {
    /// Owned by a project living in a namespace.
    Project {
        /// Project id.
        project_id: ProjectId,
        /// Namespace the project lives in.
        namespace_id: NamespaceId,
    },
    /// Owned directly by a namespace (e.g. a group avatar).
    Namespace(NamespaceId),
    /// Not tied to any project or namespace (user avatars, appearance logos).
    Unowned,
}

/// A replicable unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    /// Identity.
    pub key: ResourceKey,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Owning project/namespace.
    pub owner: Owner,
}

impl Resource {
    /// Build a resource.
    pub const fn new(key: ResourceKey, size_bytes: u64, owner: Owner) -> Self {
        Self {
            key,
            size_bytes,
            owner,
        }
    }
}

/// A replication participant as seen by the scheduler (read-only).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Node identifier.
    pub id: u64,
    /// Base URL other nodes use to reach this node.
    pub url: String,
    /// Primary or secondary.
    pub role: NodeRole,
    /// Disabled nodes dispatch nothing.
    pub enabled: bool,
    /// Namespace restriction; empty means every namespace.
    pub namespaces: BTreeSet<NamespaceId>,
    /// Resource types this node replicates.
    pub resource_types: BTreeSet<ResourceType>,
}

impl Node {
    /// An enabled secondary replicating every resource type and namespace.
    pub fn secondary(id: u64, url: impl Into<String>) -> Self {
        Self {
            id,
            url: url.into(),
            role: NodeRole::Secondary,
            enabled: true,
            namespaces: BTreeSet::new(),
            resource_types: ResourceType::ALL.into_iter().collect(),
        }
    }

    /// An enabled primary.
    pub fn primary(id: u64, url: impl Into<String>) -> Self {
        Self {
            role: NodeRole::Primary,
            ..Self::secondary(id, url)
        }
    }

    /// Restrict replication to the given namespaces (and their descendants).
    #[must_use]
    pub fn with_namespaces(mut self, namespaces: impl IntoIterator<Item = NamespaceId>) -> Self {
        self.namespaces = namespaces.into_iter().collect();
        self
    }

    /// Limit the resource types this node replicates.
    #[must_use]
    pub fn with_resource_types(mut self, types: impl IntoIterator<Item = ResourceType>) -> Self {
        self.resource_types = types.into_iter().collect();
        self
    }

    /// True when this node should be dispatching downloads.
    pub fn is_replicating(&self) -> bool {
        self.enabled && self.role == NodeRole::Secondary
    }

    /// True when the node declares a namespace restriction.
    pub fn is_selective(&self) -> bool {
        !self.namespaces.is_empty()
    }
}

/// Result reported for a finished transfer job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobOutcome {
    /// Bytes transferred and verified.
    Success,
    /// Will never succeed without remediation.
    PermanentFailure(String),
    /// May succeed on a later attempt.
    TransientFailure(String),
}

/// Replication status of one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryState {
    /// Up to date as of `synced_at_ms`.
    Synced {
        /// Completion time, ms since epoch.
        synced_at_ms: u128,
    },
    /// Last attempt failed transiently; eligible again from `retry_at_ms`.
    Retrying {
        /// Consecutive transient failures.
        retry_count: u32,
        /// Last error message.
        last_error: String,
        /// Earliest time (ms since epoch) the resource is pending again.
        retry_at_ms: u128,
    },
    /// Permanently failed; excluded until cleared.
    Failed {
        /// Failure reason.
        reason: String,
        /// Failure time, ms since epoch.
        failed_at_ms: u128,
    },
}

const RETRY_BASE: Duration = Duration::from_secs(5);
const RETRY_MAX: Duration = Duration::from_secs(3600);

/// Delay before the `retry_count`-th retry: doubles from 5s, capped at one hour.
pub fn retry_backoff(retry_count: u32) -> Duration {
    let exp = retry_count.saturating_sub(1).min(16);
    RETRY_BASE.saturating_mul(1 << exp).min(RETRY_MAX)
}

/// Persisted registry record for a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryRecord {
    /// Resource this record tracks.
    pub key: ResourceKey,
    /// Current state.
    pub state: RegistryState,
}

impl RegistryRecord {
    /// Whether the record keeps the resource out of the pending backlog at `now_ms`.
    pub const fn excludes_from_backlog_at(&self, now_ms: u128) -> bool {
        match &self.state {
            RegistryState::Synced { .. } | RegistryState::Failed { .. } => true,
            RegistryState::Retrying { retry_at_ms, .. } => now_ms < *retry_at_ms,
        }
    }

    /// Fold a job outcome into the record, returning the next record.
    pub fn apply(
        previous: Option<&Self>,
        key: ResourceKey,
        outcome: &JobOutcome,
        now_ms: u128,
    ) -> Self {
        let state = match outcome {
            JobOutcome::Success => RegistryState::Synced {
                synced_at_ms: now_ms,
            },
            JobOutcome::PermanentFailure(reason) => RegistryState::Failed {
                reason: reason.clone(),
                failed_at_ms: now_ms,
            },
            JobOutcome::TransientFailure(err) => {
                let retry_count = match previous.map(|r| &r.state) {
                    Some(RegistryState::Retrying { retry_count, .. }) => {
                        retry_count.saturating_add(1)
                    }
                    _ => 1,
                };
                RegistryState::Retrying {
                    retry_count,
                    last_error: err.clone(),
                    retry_at_ms: now_ms.saturating_add(retry_backoff(retry_count).as_millis()),
                }
            }
        };
        Self { key, state }
    }
}
