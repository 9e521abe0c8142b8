//! Update dispatchers feeding topology changes into the tracker.
//!
//! One dispatcher per message kind receives from an `mpsc` channel and
//! spawns a task per message. Both stop when the shutdown signal flips.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::tracker::ResourceTracker;
use crate::types::{AllocationSnapshot, NodeSnapshot};

/// Senders for the two topology channels plus the dispatcher tasks.
pub struct UpdateHandlers {
    pub nodes: mpsc::Sender<NodeSnapshot>,
    pub allocations: mpsc::Sender<AllocationSnapshot>,
    node_task: JoinHandle<()>,
    alloc_task: JoinHandle<()>,
}

impl UpdateHandlers {
    /// Wait for both dispatchers to exit.
    pub async fn join(self) {
        let _ = self.node_task.await;
        let _ = self.alloc_task.await;
    }
}

/// Start the node and allocation dispatchers for `tracker`.
pub fn spawn_update_handlers(
    tracker: ResourceTracker,
    buffer: usize,
    shutdown: watch::Receiver<bool>,
) -> UpdateHandlers {
    let (node_tx, node_rx) = mpsc::channel(buffer);
    let (alloc_tx, alloc_rx) = mpsc::channel(buffer);

    let node_task = tokio::spawn(run_node_update_handler(
        tracker.clone(),
        node_rx,
        shutdown.clone(),
    ));
    let alloc_task = tokio::spawn(run_allocation_update_handler(tracker, alloc_rx, shutdown));

    UpdateHandlers {
        nodes: node_tx,
        allocations: alloc_tx,
        node_task,
        alloc_task,
    }
}

async fn run_node_update_handler(
    tracker: ResourceTracker,
    mut rx: mpsc::Receiver<NodeSnapshot>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("node update handler started");
    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(node) = msg else { break };
                let tracker = tracker.clone();
                tokio::spawn(async move { tracker.handle_node_update(node).await });
            }
            _ = shutdown.changed() => break,
        }
    }
    info!("node update handler stopped");
}

async fn run_allocation_update_handler(
    tracker: ResourceTracker,
    mut rx: mpsc::Receiver<AllocationSnapshot>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!("allocation update handler started");
    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(alloc) = msg else { break };
                let tracker = tracker.clone();
                tokio::spawn(async move {
                    if let Err(e) = tracker.handle_allocation_update(alloc).await {
                        error!(error = %e, "dropping allocation update");
                    }
                });
            }
            _ = shutdown.changed() => break,
        }
    }
    info!("allocation update handler stopped");
}
