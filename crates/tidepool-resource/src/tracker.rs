//! ResourceTracker: in-memory capacity state per node class.
//!
//! Nodes are grouped into class pools. Every pool keeps an aggregate
//! [`ResourceStats`] equal to the sum of its member nodes' stats; each
//! mutation of a node's stats applies the same delta to the aggregate
//! while the pool lock is held.
//!
//! Lock order is always node-class index first, then pools.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, error, info};

use crate::error::ResourceError;
use crate::stats::{
    calculate_allocated_percentage_stats, AllocatedStats, ResourceStats, Resources,
};
use crate::types::{
    AllocationSnapshot, AllocationStatus, NodeSnapshot, NodeStatus, SchedulingEligibility,
};

/// Class assigned to nodes that report none.
pub const DEFAULT_NODE_CLASS: &str = "tidepool-default";

/// A tracked client node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub id: String,
    pub class: String,
    pub status: NodeStatus,
    pub eligibility: SchedulingEligibility,
    pub stats: ResourceStats,
}

/// Contribution of a running allocation, remembered so a terminal update
/// subtracts exactly what was added.
#[derive(Debug, Clone)]
struct TrackedAllocation {
    node_id: String,
    resources: Resources,
}

#[derive(Debug, Default)]
struct ClassPool {
    nodes: BTreeMap<String, NodeRecord>,
    /// Allocation ID → recorded contribution.
    allocations: HashMap<String, TrackedAllocation>,
    stats: ResourceStats,
}

impl ClassPool {
    /// Drop a node, its stats and every allocation it hosted.
    fn remove_node(&mut self, node_id: &str) -> Option<NodeRecord> {
        let record = self.nodes.remove(node_id)?;
        self.stats -= record.stats;
        self.allocations.retain(|_, alloc| alloc.node_id != node_id);
        Some(record)
    }
}

struct TrackerInner {
    /// Node the control plane runs on; never chosen for scale-in.
    local_node_id: Option<String>,
    /// Class name → pool.
    pools: RwLock<HashMap<String, ClassPool>>,
    /// Node ID → class name.
    node_class: RwLock<HashMap<String, String>>,
}

/// Cloneable handle to the shared tracker state.
#[derive(Clone)]
pub struct ResourceTracker {
    inner: Arc<TrackerInner>,
}

impl ResourceTracker {
    pub fn new(local_node_id: Option<String>) -> Self {
        Self {
            inner: Arc::new(TrackerInner {
                local_node_id,
                pools: RwLock::new(HashMap::new()),
                node_class: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn local_node_id(&self) -> Option<&str> {
        self.inner.local_node_id.as_deref()
    }

    // ── Queries ────────────────────────────────────────────────────

    /// Tracked nodes of `class`, empty when the class is unknown.
    pub async fn nodes_of_class(&self, class: &str) -> BTreeMap<String, NodeRecord> {
        let pools = self.inner.pools.read().await;
        pools
            .get(class)
            .map(|pool| pool.nodes.clone())
            .unwrap_or_default()
    }

    /// Aggregate stats of `class`, if the class has ever had a node.
    pub async fn class_stats(&self, class: &str) -> Option<ResourceStats> {
        let pools = self.inner.pools.read().await;
        pools.get(class).map(|pool| pool.stats)
    }

    /// Allocated CPU and memory of `class` as percentages of its
    /// allocatable capacity.
    pub async fn class_resource_allocation(
        &self,
        class: &str,
    ) -> Result<AllocatedStats, ResourceError> {
        let pools = self.inner.pools.read().await;
        let pool = pools
            .get(class)
            .ok_or_else(|| ResourceError::ClassNotFound(class.to_string()))?;
        calculate_allocated_percentage_stats(&pool.stats)
    }

    /// The node of `class` whose removal displaces the least work.
    ///
    /// The local node and nodes without capacity are never returned.
    pub async fn least_allocated_node_in_class(&self, class: &str) -> Option<NodeRecord> {
        let pools = self.inner.pools.read().await;
        let pool = pools.get(class)?;

        let mut best: Option<&NodeRecord> = None;
        let mut benchmark = 0.0;

        for node in pool.nodes.values() {
            if self.local_node_id() == Some(node.id.as_str()) {
                continue;
            }

            let stats = match calculate_allocated_percentage_stats(&node.stats) {
                Ok(stats) => stats,
                Err(e) => {
                    debug!(node_id = %node.id, error = %e, "skipping node in least allocated selection");
                    continue;
                }
            };

            // The first candidate sets the benchmark, compared on memory.
            let replace = match best {
                None => true,
                Some(_) => stats.memory < benchmark || stats.cpu < benchmark,
            };
            if replace {
                benchmark = stats.memory;
                best = Some(node);
            }
        }

        best.cloned()
    }

    // ── Updates ────────────────────────────────────────────────────

    /// Apply a node update from the node watcher.
    pub async fn handle_node_update(&self, mut node: NodeSnapshot) {
        if node.node_class.is_empty() {
            debug!(node_id = %node.id, "node has empty class, using {DEFAULT_NODE_CLASS}");
            node.node_class = DEFAULT_NODE_CLASS.to_string();
        }

        debug!(
            node_id = %node.id,
            status = ?node.status,
            eligibility = ?node.scheduling_eligibility,
            "received node update"
        );

        match (node.status, node.scheduling_eligibility) {
            // Picked up once the node becomes ready.
            (NodeStatus::Initializing, _) => {}
            (NodeStatus::Down, _) | (NodeStatus::Ready, SchedulingEligibility::Ineligible) => {
                self.node_unavailable(&node).await;
            }
            (NodeStatus::Ready, SchedulingEligibility::Eligible) => {
                self.node_available(&node).await;
            }
            (NodeStatus::Ready, SchedulingEligibility::Unknown) => {
                debug!(node_id = %node.id, "ignoring node with unknown eligibility");
            }
            (NodeStatus::Unknown, _) => {
                debug!(node_id = %node.id, "ignoring node with unknown status");
            }
        }
    }

    async fn node_available(&self, node: &NodeSnapshot) {
        let mut index = self.inner.node_class.write().await;
        let mut pools = self.inner.pools.write().await;

        if let Some(previous) = index.get(&node.id).cloned() {
            if previous != node.node_class {
                if let Some(pool) = pools.get_mut(&previous) {
                    pool.remove_node(&node.id);
                }
                info!(
                    node_id = %node.id,
                    from = %previous,
                    to = %node.node_class,
                    "node changed class"
                );
            } else if let Some(pool) = pools.get_mut(&previous) {
                match pool.nodes.get(&node.id) {
                    Some(stored) if stored.status == node.status => {
                        debug!(node_id = %node.id, "node already tracked with current status");
                        return;
                    }
                    Some(_) => {
                        pool.remove_node(&node.id);
                    }
                    None => {}
                }
            }
        }

        let record = NodeRecord {
            id: node.id.clone(),
            class: node.node_class.clone(),
            status: node.status,
            eligibility: node.scheduling_eligibility,
            stats: ResourceStats {
                allocatable: allocatable_resources(node),
                allocated: Resources::default(),
            },
        };

        info!(
            node_id = %record.id,
            class = %record.class,
            allocatable_cpu = record.stats.allocatable.cpu,
            allocatable_memory = record.stats.allocatable.memory,
            "node added to resource tracking"
        );

        let pool = pools.entry(node.node_class.clone()).or_default();
        pool.stats += record.stats;
        pool.nodes.insert(record.id.clone(), record);
        index.insert(node.id.clone(), node.node_class.clone());
    }

    async fn node_unavailable(&self, node: &NodeSnapshot) {
        let mut index = self.inner.node_class.write().await;
        let mut pools = self.inner.pools.write().await;

        let class = index
            .get(&node.id)
            .cloned()
            .unwrap_or_else(|| node.node_class.clone());

        let removed = pools
            .get_mut(&class)
            .and_then(|pool| pool.remove_node(&node.id));
        index.remove(&node.id);

        if removed.is_some() {
            info!(node_id = %node.id, %class, "node removed from resource tracking");
        }
    }

    /// Apply an allocation update from the allocation watcher.
    pub async fn handle_allocation_update(
        &self,
        alloc: AllocationSnapshot,
    ) -> Result<(), ResourceError> {
        debug!(
            alloc_id = %alloc.id,
            status = ?alloc.client_status,
            "received allocation update"
        );

        let index = self.inner.node_class.read().await;
        let class = index.get(&alloc.node_id).cloned().ok_or_else(|| {
            ResourceError::UnknownNode {
                alloc_id: alloc.id.clone(),
                node_id: alloc.node_id.clone(),
            }
        })?;

        let mut pools = self.inner.pools.write().await;
        // Hold the index until the pool lock is taken so the node cannot
        // leave the class in between.
        drop(index);

        let pool = pools.get_mut(&class).ok_or_else(|| ResourceError::UnknownNode {
            alloc_id: alloc.id.clone(),
            node_id: alloc.node_id.clone(),
        })?;

        if alloc.client_status.is_terminal() {
            allocation_terminal(pool, &alloc);
            return Ok(());
        }
        match alloc.client_status {
            AllocationStatus::Running => allocation_running(pool, &alloc),
            _ => Ok(()),
        }
    }
}

fn allocation_running(pool: &mut ClassPool, alloc: &AllocationSnapshot) -> Result<(), ResourceError> {
    if pool.allocations.contains_key(&alloc.id) {
        debug!(alloc_id = %alloc.id, "allocation already tracked as running");
        return Ok(());
    }

    let node = pool
        .nodes
        .get_mut(&alloc.node_id)
        .ok_or_else(|| ResourceError::UnknownNode {
            alloc_id: alloc.id.clone(),
            node_id: alloc.node_id.clone(),
        })?;

    let resources = Resources::new(alloc.resources.cpu as f64, alloc.resources.memory_mb as f64);
    node.stats.allocated += resources;
    pool.stats.allocated += resources;
    pool.allocations.insert(
        alloc.id.clone(),
        TrackedAllocation {
            node_id: alloc.node_id.clone(),
            resources,
        },
    );
    Ok(())
}

fn allocation_terminal(pool: &mut ClassPool, alloc: &AllocationSnapshot) {
    // Allocations never seen running hold nothing to release.
    let Some(tracked) = pool.allocations.remove(&alloc.id) else {
        return;
    };

    if let Some(node) = pool.nodes.get_mut(&tracked.node_id) {
        node.stats.allocated -= tracked.resources;
    }
    pool.stats.allocated -= tracked.resources;
}

/// Total minus reserved resources. Structured fields win when present;
/// older schedulers only report the flat ones.
fn allocatable_resources(node: &NodeSnapshot) -> Resources {
    if let (Some(total), Some(reserved)) = (&node.node_resources, &node.reserved_resources) {
        return Resources::new(
            total.cpu_shares.saturating_sub(reserved.cpu_shares) as f64,
            total.memory_mb.saturating_sub(reserved.memory_mb) as f64,
        );
    }
    if let (Some(total), Some(reserved)) = (&node.resources, &node.reserved) {
        return Resources::new(
            total.cpu.saturating_sub(reserved.cpu) as f64,
            total.memory_mb.saturating_sub(reserved.memory_mb) as f64,
        );
    }
    error!(node_id = %node.id, "node reported no resources, tracking with zero capacity");
    Resources::default()
}
