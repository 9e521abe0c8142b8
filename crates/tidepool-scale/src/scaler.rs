//! Scaler: precondition checks and execution of scaling requests.
//!
//! ```text
//! ok_to_scale(req)
//!   ├── policy enabled?            422
//!   ├── provider registered?       422
//!   ├── class has nodes?           422
//!   └── new count within bounds?   412
//!
//! invoke_scaling(req)
//!   ├── write "started" activity   (abort silently on failure)
//!   ├── out: provider.scale_out
//!   ├── in:  least allocated node → drain → provider target → provider.scale_in
//!   └── closing event              (exactly one)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use http::StatusCode;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use tidepool_resource::ResourceTracker;
use tidepool_state::{
    ActivityBackend, EventMessage, ProviderKind, ScaleDirection, ScalingRequest, SOURCE_CLUSTER,
};

use crate::drain::{drain_node, ClusterClient};
use crate::error::ScaleError;
use crate::event::EventSender;
use crate::provider::ProviderRegistry;

/// Node attribute holding the EC2 instance ID of a client node.
pub const AWS_INSTANCE_ID_ATTRIBUTE: &str = "unique.platform.aws.instance-id";

const MSG_NODE_INFO_FAILED: &str = "failed to call cluster node info API";
const MSG_INSTANCE_ID_NOT_FOUND: &str = "aws instance-id not found within attributes";

/// Entry points the autoscaler uses to act on a decision.
#[async_trait]
pub trait Scale: Send + Sync {
    /// Check that `req` may run. `Ok` carries `200 OK`; errors carry their
    /// own status code.
    async fn ok_to_scale(&self, req: &ScalingRequest) -> Result<StatusCode, ScaleError>;

    /// Run `req` as an independent task.
    fn submit_scaling(&self, req: ScalingRequest) -> JoinHandle<()>;
}

/// Collaborators of the scaler.
pub struct ScalerConfig {
    pub tracker: ResourceTracker,
    pub activities: Arc<dyn ActivityBackend>,
    pub providers: ProviderRegistry,
    pub cluster: Arc<dyn ClusterClient>,
    pub events: EventSender,
    pub shutdown: watch::Receiver<bool>,
}

struct ScalerInner {
    tracker: ResourceTracker,
    activities: Arc<dyn ActivityBackend>,
    providers: ProviderRegistry,
    cluster: Arc<dyn ClusterClient>,
    events: EventSender,
    shutdown: watch::Receiver<bool>,
    /// Submitted activities that have not returned yet.
    in_flight: AtomicUsize,
    idle: Notify,
}

/// Counts a submitted activity until its task ends.
struct ActivityGuard(Arc<ScalerInner>);

impl ActivityGuard {
    fn new(inner: &Arc<ScalerInner>) -> Self {
        inner.in_flight.fetch_add(1, Ordering::SeqCst);
        Self(inner.clone())
    }
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        if self.0.in_flight.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Cloneable scaling orchestrator.
#[derive(Clone)]
pub struct Scaler {
    inner: Arc<ScalerInner>,
}

impl Scaler {
    pub fn new(config: ScalerConfig) -> Self {
        Self {
            inner: Arc::new(ScalerInner {
                tracker: config.tracker,
                activities: config.activities,
                providers: config.providers,
                cluster: config.cluster,
                events: config.events,
                shutdown: config.shutdown,
                in_flight: AtomicUsize::new(0),
                idle: Notify::new(),
            }),
        }
    }

    /// Number of submitted activities still running.
    pub fn activities_in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    /// Wait until every submitted activity has returned. Used at shutdown
    /// so closing events are emitted before the event pipeline stops.
    pub async fn wait_for_activities(&self) {
        loop {
            let idle = self.inner.idle.notified();
            let remaining = self.activities_in_flight();
            if remaining == 0 {
                return;
            }
            info!(remaining, "waiting for in-flight scaling activities");
            idle.await;
        }
    }

    /// Run every precondition check, stopping at the first failure.
    pub async fn ok_to_scale(&self, req: &ScalingRequest) -> Result<StatusCode, ScaleError> {
        let class = req.class();
        info!(
            %class,
            activity_id = %req.id,
            direction = %req.direction,
            "performing scaling precondition checks"
        );

        let result = self.check_preconditions(req).await;
        if let Err(e) = &result {
            warn!(%class, activity_id = %req.id, error = %e, "scaling activity failed precondition check");
        }
        result
    }

    async fn check_preconditions(&self, req: &ScalingRequest) -> Result<StatusCode, ScaleError> {
        let policy = &req.policy;

        if !policy.enabled {
            return Err(ScaleError::PolicyDisabled);
        }
        if !self.inner.providers.contains(policy.provider) {
            return Err(ScaleError::ProviderNotFound(policy.provider));
        }

        let nodes = self.inner.tracker.nodes_of_class(&policy.class).await.len() as u64;
        if nodes == 0 {
            return Err(ScaleError::NoNodesInClass(policy.class.clone()));
        }

        match req.direction {
            ScaleDirection::In => {
                // Signed so a step larger than the pool reads as a breach.
                let remaining = nodes as i64 - i64::from(policy.scale_in_count);
                if remaining < i64::from(policy.min_count) {
                    return Err(ScaleError::MinCountBreached);
                }
            }
            ScaleDirection::Out => {
                if nodes + u64::from(policy.scale_out_count) > u64::from(policy.max_count) {
                    return Err(ScaleError::MaxCountBreached);
                }
            }
        }

        Ok(StatusCode::OK)
    }

    /// Execute a scaling request end to end, recording its activity.
    pub async fn invoke_scaling(&self, mut req: ScalingRequest) {
        let class = req.class().to_string();

        if *self.inner.shutdown.borrow() {
            debug!(%class, activity_id = %req.id, "scaler shutting down, not starting activity");
            return;
        }

        info!(%class, activity_id = %req.id, direction = %req.direction, "performing scaling activity");

        // Nothing else happens for an activity without its started record.
        if let Err(e) = self.inner.activities.write_request(&req) {
            error!(%class, activity_id = %req.id, error = %e, "failed to write initial state entry");
            return;
        }

        let outcome = self.execute(&mut req).await;
        let error = match outcome {
            Ok(()) => {
                info!(%class, activity_id = %req.id, "scaling activity ended successfully");
                None
            }
            Err(e) => {
                error!(%class, activity_id = %req.id, error = %e, "scaling activity ended in failure");
                Some(e.to_string())
            }
        };

        self.inner
            .events
            .send(EventMessage::closing(req.id, error))
            .await;
    }

    async fn execute(&self, req: &mut ScalingRequest) -> Result<(), ScaleError> {
        let provider = self
            .inner
            .providers
            .get(req.policy.provider)
            .ok_or(ScaleError::ProviderNotFound(req.policy.provider))?;

        match req.direction {
            ScaleDirection::Out => provider.scale_out(req).await?,
            ScaleDirection::In => {
                let node = self
                    .inner
                    .tracker
                    .least_allocated_node_in_class(req.class())
                    .await
                    .ok_or_else(|| ScaleError::NoTargetNode(req.class().to_string()))?;
                req.target_node_id = Some(node.id.clone());

                // The no-op provider never removes the machine, so the node
                // stays in the cluster.
                if req.policy.provider != ProviderKind::NoOp {
                    drain_node(
                        self.inner.cluster.as_ref(),
                        &self.inner.events,
                        &node.id,
                        req.id,
                    )
                    .await?;
                }

                let target = self.identify_provider_target(req, &node.id).await?;
                provider.scale_in(req, &target).await?;
            }
        }
        Ok(())
    }

    /// Translate a cluster node ID into the provider's machine identifier.
    async fn identify_provider_target(
        &self,
        req: &ScalingRequest,
        node_id: &str,
    ) -> Result<String, ScaleError> {
        match req.policy.provider {
            ProviderKind::NoOp => Ok(node_id.to_string()),
            ProviderKind::AwsAutoscaling => {
                let attributes = match self.inner.cluster.node_attributes(node_id).await {
                    Ok(attributes) => attributes,
                    Err(e) => {
                        self.cluster_event(req, MSG_NODE_INFO_FAILED).await;
                        return Err(e.into());
                    }
                };
                match attributes.get(AWS_INSTANCE_ID_ATTRIBUTE) {
                    Some(instance_id) => Ok(instance_id.clone()),
                    None => {
                        self.cluster_event(req, MSG_INSTANCE_ID_NOT_FOUND).await;
                        Err(ScaleError::InstanceIdNotFound)
                    }
                }
            }
        }
    }

    async fn cluster_event(&self, req: &ScalingRequest, message: &str) {
        self.inner
            .events
            .send(EventMessage::progress(req.id, SOURCE_CLUSTER, message))
            .await;
    }
}

#[async_trait]
impl Scale for Scaler {
    async fn ok_to_scale(&self, req: &ScalingRequest) -> Result<StatusCode, ScaleError> {
        Scaler::ok_to_scale(self, req).await
    }

    fn submit_scaling(&self, req: ScalingRequest) -> JoinHandle<()> {
        let guard = ActivityGuard::new(&self.inner);
        let scaler = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            scaler.invoke_scaling(req).await
        })
    }
}
