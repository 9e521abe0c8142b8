//! Cluster scheduler seam and node drain.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use tidepool_state::{EventMessage, SOURCE_CLUSTER};

use crate::event::EventSender;

/// Deadline given to the scheduler for migrating work off a node.
pub const DRAIN_DEADLINE: Duration = Duration::from_secs(5 * 60);

/// Calls made against the cluster scheduler during scale-in.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Start draining `node_id`. Returns the index to monitor from.
    async fn update_drain(&self, node_id: &str, deadline: Duration) -> anyhow::Result<u64>;

    /// Stream drain progress messages. The channel closes when the drain
    /// finishes.
    async fn monitor_drain(&self, node_id: &str, index: u64)
    -> anyhow::Result<mpsc::Receiver<String>>;

    /// Attributes the scheduler reports for `node_id`.
    async fn node_attributes(&self, node_id: &str) -> anyhow::Result<HashMap<String, String>>;
}

/// Drain `node_id` and forward every progress message as a cluster event
/// of activity `id`. Returns once the drain monitor closes.
pub async fn drain_node(
    cluster: &dyn ClusterClient,
    events: &EventSender,
    node_id: &str,
    id: Uuid,
) -> anyhow::Result<()> {
    info!(%node_id, activity_id = %id, "removing node from cluster");

    let index = cluster.update_drain(node_id, DRAIN_DEADLINE).await?;
    let mut progress = cluster.monitor_drain(node_id, index).await?;

    while let Some(message) = progress.recv().await {
        events
            .send(EventMessage::progress(id, SOURCE_CLUSTER, message.to_lowercase()))
            .await;
    }
    Ok(())
}
