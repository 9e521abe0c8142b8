//! Topology snapshots delivered by the cluster watchers.
//!
//! These mirror the subset of the scheduler's node and allocation objects
//! the tracker needs. Unknown status strings deserialize into an
//! `Unknown` variant instead of failing the whole message.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a client node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Initializing,
    Ready,
    Down,
    #[serde(other)]
    Unknown,
}

/// Whether the scheduler may place new work on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingEligibility {
    Eligible,
    Ineligible,
    #[serde(other)]
    Unknown,
}

/// Client status of an allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AllocationStatus {
    Pending,
    Running,
    Complete,
    Failed,
    Lost,
    #[serde(other)]
    Unknown,
}

impl AllocationStatus {
    /// Anything that is neither pending nor running no longer holds
    /// resources on its node.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, AllocationStatus::Pending | AllocationStatus::Running)
    }
}

/// Structured node resources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeResources {
    pub cpu_shares: u64,
    pub memory_mb: u64,
}

/// Flat resources reported by older scheduler versions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LegacyResources {
    pub cpu: u64,
    pub memory_mb: u64,
}

/// A node as reported by the node watcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub id: String,
    /// Empty when the operator configured no class.
    #[serde(default)]
    pub node_class: String,
    pub status: NodeStatus,
    pub scheduling_eligibility: SchedulingEligibility,
    #[serde(default)]
    pub node_resources: Option<NodeResources>,
    #[serde(default)]
    pub reserved_resources: Option<NodeResources>,
    #[serde(default)]
    pub resources: Option<LegacyResources>,
    #[serde(default)]
    pub reserved: Option<LegacyResources>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

/// Resources requested by an allocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct AllocationResources {
    pub cpu: u64,
    pub memory_mb: u64,
}

/// An allocation as reported by the allocation watcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationSnapshot {
    pub id: String,
    pub node_id: String,
    pub client_status: AllocationStatus,
    pub resources: AllocationResources,
}
