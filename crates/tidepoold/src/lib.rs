//! tidepoold: assembly of the tidepool control plane.
//!
//! ```text
//! topology feed ──► UpdateHandlers ──► ResourceTracker
//!                                          │
//!        PolicyBackend ──► Autoscaler ─────┤
//!                              │           │
//!                              ▼           ▼
//!                            Scaler ──► ProviderRegistry
//!                              │
//!                              ▼
//!                        EventPipeline ──► ActivityBackend ◄── GC loop
//! ```
//!
//! Shutdown runs in dependency order. The autoscaler drains its workers and
//! submitted scaling activities run to their closing event. Then the shared
//! shutdown signal stops the dispatchers, the feed and the GC loop, and
//! finally the event pipeline writes what is still queued.

pub mod config;
pub mod feed;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant};
use tracing::{debug, error, info, warn};

use tidepool_autoscale::{Autoscaler, AutoscalerConfig};
use tidepool_resource::{spawn_update_handlers, ResourceTracker, UpdateHandlers};
use tidepool_scale::{
    AutoScalingApi, AwsAsgProvider, EventPipeline, EventSender, NoOpProvider, ProviderRegistry,
    Scaler, ScalerConfig,
};
use tidepool_state::{
    ActivityBackend, MemoryActivityBackend, MemoryPolicyBackend, PolicyBackend, StateStore,
};

use crate::config::{ProvidersSection, ServerConfig, StorageSection};
use crate::feed::{run_feed, FeedClusterClient, FeedSource, TopologySink};

/// Buffer of each topology update channel.
const TOPOLOGY_CHANNEL_BUFFER: usize = 64;

/// Interval between activity garbage collection runs.
pub const GC_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// A running control plane.
pub struct ControlPlane {
    tracker: ResourceTracker,
    policies: Arc<dyn PolicyBackend>,
    activities: Arc<dyn ActivityBackend>,
    cluster: Arc<FeedClusterClient>,
    handlers: UpdateHandlers,
    pipeline: EventPipeline,
    scaler: Scaler,
    autoscaler: Option<(Autoscaler, JoinHandle<()>)>,
    gc_task: JoinHandle<()>,
    feed_task: Option<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl ControlPlane {
    /// Open state, seed configured policies and start every subsystem.
    ///
    /// `asg_api` is the AutoScaling client used when the AWS provider is
    /// enabled. Without one the provider is not registered.
    pub fn start(
        config: &ServerConfig,
        asg_api: Option<Arc<dyn AutoScalingApi>>,
    ) -> anyhow::Result<Self> {
        let (policies, activities) = open_backends(&config.storage)?;
        for policy in &config.policies {
            policies
                .put_policy(policy)
                .with_context(|| format!("store policy for class {}", policy.class))?;
            info!(class = %policy.class, provider = %policy.provider, "scaling policy loaded");
        }

        let (shutdown, shutdown_rx) = watch::channel(false);

        let tracker = ResourceTracker::new(config.node_id.clone());
        let handlers =
            spawn_update_handlers(tracker.clone(), TOPOLOGY_CHANNEL_BUFFER, shutdown_rx.clone());
        info!(node_id = ?config.node_id, "resource tracker started");

        let pipeline = EventPipeline::start(activities.clone(), shutdown_rx.clone());
        let providers = build_providers(&config.providers, pipeline.sender(), asg_api);
        info!(providers = providers.len(), "provider registry built");

        let cluster = Arc::new(FeedClusterClient::default());
        let scaler = Scaler::new(ScalerConfig {
            tracker: tracker.clone(),
            activities: activities.clone(),
            providers,
            cluster: cluster.clone(),
            events: pipeline.sender(),
            shutdown: shutdown_rx.clone(),
        });

        let autoscaler = if config.autoscaler.enabled {
            let autoscaler = Autoscaler::new(
                AutoscalerConfig {
                    interval: config.autoscaler.interval(),
                    threads: config.autoscaler.threads,
                },
                policies.clone(),
                tracker.clone(),
                Arc::new(scaler.clone()),
            );
            let handle = autoscaler.spawn();
            Some((autoscaler, handle))
        } else {
            info!("autoscaler disabled");
            None
        };

        let gc_task = tokio::spawn(run_garbage_collector(
            activities.clone(),
            GC_INTERVAL,
            shutdown_rx,
        ));

        Ok(Self {
            tracker,
            policies,
            activities,
            cluster,
            handlers,
            pipeline,
            scaler,
            autoscaler,
            gc_task,
            feed_task: None,
            shutdown,
        })
    }

    pub fn tracker(&self) -> &ResourceTracker {
        &self.tracker
    }

    pub fn policies(&self) -> &Arc<dyn PolicyBackend> {
        &self.policies
    }

    pub fn activities(&self) -> &Arc<dyn ActivityBackend> {
        &self.activities
    }

    pub fn scaler(&self) -> &Scaler {
        &self.scaler
    }

    pub fn autoscaler(&self) -> Option<&Autoscaler> {
        self.autoscaler.as_ref().map(|(autoscaler, _)| autoscaler)
    }

    /// Entry point for topology updates.
    pub fn topology(&self) -> TopologySink {
        TopologySink {
            nodes: self.handlers.nodes.clone(),
            allocations: self.handlers.allocations.clone(),
            cluster: self.cluster.clone(),
        }
    }

    /// Start reading a topology feed. Stops at end of input or shutdown.
    pub fn spawn_feed(&mut self, source: FeedSource) {
        let sink = self.topology();
        let shutdown = self.shutdown.subscribe();
        self.feed_task = Some(tokio::spawn(async move {
            if let Err(e) = run_feed(source, sink, shutdown).await {
                error!(error = %e, "topology feed failed");
            }
        }));
    }

    /// Stop every subsystem and wait for queued events to be written.
    pub async fn shutdown(self) {
        info!("control plane shutting down");

        if let Some((autoscaler, handle)) = self.autoscaler {
            autoscaler.stop().await;
            let _ = handle.await;
        }
        self.scaler.wait_for_activities().await;

        self.shutdown.send_replace(true);

        self.handlers.join().await;
        if let Some(feed) = self.feed_task {
            let _ = feed.await;
        }
        let _ = self.gc_task.await;
        self.pipeline.join().await;

        info!("control plane stopped");
    }
}

fn open_backends(
    storage: &StorageSection,
) -> anyhow::Result<(Arc<dyn PolicyBackend>, Arc<dyn ActivityBackend>)> {
    match &storage.path {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create state directory {}", parent.display()))?;
            }
            let store = StateStore::open(path)?;
            info!(path = ?path, "state store opened");
            Ok((Arc::new(store.clone()), Arc::new(store)))
        }
        None => {
            info!("using in-memory state backends");
            Ok((
                Arc::new(MemoryPolicyBackend::new()),
                Arc::new(MemoryActivityBackend::new()),
            ))
        }
    }
}

fn build_providers(
    config: &ProvidersSection,
    events: EventSender,
    asg_api: Option<Arc<dyn AutoScalingApi>>,
) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();

    if config.noop {
        registry = registry.with_provider(Arc::new(NoOpProvider::new(events.clone())));
    }

    if config.aws_asg {
        match asg_api {
            Some(api) => {
                registry = registry.with_provider(Arc::new(AwsAsgProvider::new(api, events)));
            }
            None => warn!("aws autoscaling provider enabled without an AutoScaling client, not registering"),
        }
    }

    registry
}

async fn run_garbage_collector(
    activities: Arc<dyn ActivityBackend>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => match activities.run_garbage_collection() {
                Ok(removed) => debug!(removed, "activity garbage collection finished"),
                Err(e) => error!(error = %e, "activity garbage collection failed"),
            },
            _ = shutdown.changed() => break,
        }
    }

    debug!("garbage collection loop stopped");
}
