//! AWS AutoScaling group provider.
//!
//! Scale-out raises the desired capacity of the group named by the
//! policy's `asg-name`. Scale-in detaches the target instance (lowering
//! the desired capacity) and terminates it. Every API call records a
//! success or failure event.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{error, info};
use uuid::Uuid;

use tidepool_state::{EventMessage, ProviderKind, ScalingRequest, ASG_NAME_CONFIG_KEY};

use super::ClientProvider;
use crate::error::ScaleError;
use crate::event::EventSender;

/// The subset of an AutoScaling group the provider reads.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoScalingGroup {
    pub name: String,
    pub desired_capacity: i64,
    pub availability_zones: Vec<String>,
}

/// Cloud API calls used by the provider.
#[async_trait]
pub trait AutoScalingApi: Send + Sync {
    /// Describe the groups matching `name`.
    async fn describe_group(&self, name: &str) -> anyhow::Result<Vec<AutoScalingGroup>>;

    async fn set_desired_capacity(
        &self,
        name: &str,
        capacity: i64,
        availability_zones: &[String],
    ) -> anyhow::Result<()>;

    /// Detach an instance, optionally decrementing the desired capacity.
    async fn detach_instance(
        &self,
        name: &str,
        instance_id: &str,
        decrement_desired: bool,
    ) -> anyhow::Result<()>;

    async fn terminate_instance(&self, instance_id: &str) -> anyhow::Result<()>;
}

/// Kind of provider interaction, used for event wording.
#[derive(Debug, Clone, Copy)]
enum AsgCall {
    Describe,
    Update,
    Detach,
    Terminate,
}

impl AsgCall {
    fn message(self, ok: bool, instance: &str) -> String {
        match (self, ok) {
            (AsgCall::Describe, true) => "successfully described AWS AutoScaling group".to_string(),
            (AsgCall::Describe, false) => "failed to describe AWS AutoScaling group".to_string(),
            (AsgCall::Update, true) => {
                "successfully updated count of AWS AutoScaling group".to_string()
            }
            (AsgCall::Update, false) => "failed to update count of AWS AutoScaling group".to_string(),
            (AsgCall::Detach, true) => {
                format!("successfully detached instance {instance} from AWS AutoScaling group")
            }
            (AsgCall::Detach, false) => {
                format!("failed to detach instance {instance} from AWS AutoScaling group")
            }
            (AsgCall::Terminate, true) => format!("successfully terminated AWS EC2 instance {instance}"),
            (AsgCall::Terminate, false) => format!("failed to terminate AWS EC2 instance {instance}"),
        }
    }
}

pub struct AwsAsgProvider {
    api: Arc<dyn AutoScalingApi>,
    events: EventSender,
}

impl AwsAsgProvider {
    pub fn new(api: Arc<dyn AutoScalingApi>, events: EventSender) -> Self {
        Self { api, events }
    }

    /// Log and record the outcome of one API call.
    async fn record<T>(
        &self,
        call: AsgCall,
        result: &anyhow::Result<T>,
        instance: &str,
        id: Uuid,
    ) {
        let message = call.message(result.is_ok(), instance);
        match result {
            Ok(_) => info!(provider = %self.kind(), activity_id = %id, "{message}"),
            Err(e) => error!(provider = %self.kind(), activity_id = %id, error = %e, "{message}"),
        }
        self.events
            .send(EventMessage::progress(id, self.kind().as_str(), message))
            .await;
    }

    async fn describe(&self, name: &str) -> anyhow::Result<AutoScalingGroup> {
        let mut groups = self.api.describe_group(name).await?;
        if groups.len() != 1 {
            anyhow::bail!("described {} AutoScaling groups, expected 1", groups.len());
        }
        Ok(groups.remove(0))
    }
}

fn group_name(req: &ScalingRequest) -> Result<&str, ScaleError> {
    req.policy
        .provider_config
        .get(ASG_NAME_CONFIG_KEY)
        .map(String::as_str)
        .ok_or(ScaleError::MissingProviderConfig(ASG_NAME_CONFIG_KEY))
}

#[async_trait]
impl ClientProvider for AwsAsgProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AwsAutoscaling
    }

    async fn scale_out(&self, req: &ScalingRequest) -> anyhow::Result<()> {
        let name = group_name(req)?;

        let described = self.describe(name).await;
        self.record(AsgCall::Describe, &described, "", req.id).await;
        let group = described?;

        let desired = group.desired_capacity + i64::from(req.policy.scale_out_count);
        let updated = self
            .api
            .set_desired_capacity(name, desired, &group.availability_zones)
            .await;
        self.record(AsgCall::Update, &updated, "", req.id).await;
        updated
    }

    async fn scale_in(&self, req: &ScalingRequest, target: &str) -> anyhow::Result<()> {
        let name = group_name(req)?;

        let detached = self.api.detach_instance(name, target, true).await;
        self.record(AsgCall::Detach, &detached, target, req.id).await;
        detached?;

        let terminated = self.api.terminate_instance(target).await;
        self.record(AsgCall::Terminate, &terminated, target, req.id).await;
        terminated
    }
}
