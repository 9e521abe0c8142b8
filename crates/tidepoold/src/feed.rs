//! Topology feed: newline-delimited JSON node and allocation updates.
//!
//! ```text
//! {"kind":"node","id":"n1","node_class":"batch","status":"ready",...}
//! {"kind":"allocation","id":"a1","node_id":"n1","client_status":"running",...}
//! ```
//!
//! Each line is pushed into the tracker's update channels. Node
//! attributes are remembered for the cluster client, which is the only
//! view of the scheduler this daemon has.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, info, warn};

use tidepool_resource::{AllocationSnapshot, NodeSnapshot};
use tidepool_scale::ClusterClient;

/// Pause after a failed read before trying again.
pub const FEED_RETRY_BACKOFF: Duration = Duration::from_secs(10);

/// One line of the topology feed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum TopologyEvent {
    Node(NodeSnapshot),
    Allocation(AllocationSnapshot),
}

/// Where the feed is read from.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedSource {
    Stdin,
    File(PathBuf),
}

impl FeedSource {
    /// `-` selects stdin, anything else is a file path.
    pub fn parse(value: &str) -> Self {
        match value {
            "-" => FeedSource::Stdin,
            path => FeedSource::File(PathBuf::from(path)),
        }
    }
}

/// Cluster client backed by what the feed has reported.
///
/// Node attributes come from node events. Drains need a live scheduler
/// connection and always fail.
#[derive(Default)]
pub struct FeedClusterClient {
    attributes: RwLock<HashMap<String, HashMap<String, String>>>,
}

impl FeedClusterClient {
    pub async fn record_node(&self, node: &NodeSnapshot) {
        self.attributes
            .write()
            .await
            .insert(node.id.clone(), node.attributes.clone());
    }
}

#[async_trait]
impl ClusterClient for FeedClusterClient {
    async fn update_drain(&self, node_id: &str, _deadline: Duration) -> anyhow::Result<u64> {
        bail!("drain of node {node_id} requires a cluster scheduler connection")
    }

    async fn monitor_drain(
        &self,
        node_id: &str,
        _index: u64,
    ) -> anyhow::Result<mpsc::Receiver<String>> {
        bail!("drain of node {node_id} requires a cluster scheduler connection")
    }

    async fn node_attributes(&self, node_id: &str) -> anyhow::Result<HashMap<String, String>> {
        self.attributes
            .read()
            .await
            .get(node_id)
            .cloned()
            .ok_or_else(|| anyhow!("node {node_id} has not been reported on the topology feed"))
    }
}

/// Destination of feed events.
#[derive(Clone)]
pub struct TopologySink {
    pub nodes: mpsc::Sender<NodeSnapshot>,
    pub allocations: mpsc::Sender<AllocationSnapshot>,
    pub cluster: Arc<FeedClusterClient>,
}

impl TopologySink {
    /// Forward one event to the tracker.
    pub async fn apply(&self, event: TopologyEvent) -> anyhow::Result<()> {
        match event {
            TopologyEvent::Node(node) => {
                self.cluster.record_node(&node).await;
                self.nodes
                    .send(node)
                    .await
                    .map_err(|_| anyhow!("node update channel closed"))
            }
            TopologyEvent::Allocation(alloc) => self
                .allocations
                .send(alloc)
                .await
                .map_err(|_| anyhow!("allocation update channel closed")),
        }
    }
}

/// Read `source` until it ends or shutdown is signalled.
pub async fn run_feed(
    source: FeedSource,
    sink: TopologySink,
    shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    info!(?source, "topology feed started");
    match source {
        FeedSource::Stdin => read_feed(BufReader::new(tokio::io::stdin()), sink, shutdown).await,
        FeedSource::File(path) => {
            let file = tokio::fs::File::open(&path)
                .await
                .map_err(|e| anyhow!("open topology feed {}: {e}", path.display()))?;
            read_feed(BufReader::new(file), sink, shutdown).await
        }
    }
}

/// Apply every line of `reader`. Malformed lines are skipped.
pub async fn read_feed<R>(
    reader: R,
    sink: TopologySink,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut applied = 0u64;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = shutdown.changed() => break,
        };

        match line {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<TopologyEvent>(line) {
                    Ok(event) => {
                        sink.apply(event).await?;
                        applied += 1;
                    }
                    Err(e) => warn!(error = %e, "skipping malformed topology event"),
                }
            }
            Ok(None) => {
                debug!("topology feed reached end of input");
                break;
            }
            Err(e) => {
                error!(error = %e, "failed to read topology feed, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(FEED_RETRY_BACKOFF) => {}
                    _ = shutdown.changed() => break,
                }
            }
        }
    }

    info!(applied, "topology feed stopped");
    Ok(())
}
