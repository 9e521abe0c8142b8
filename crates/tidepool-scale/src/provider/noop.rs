//! No-op provider: logs the activity and records a single event.
//!
//! Lets the control plane run the full scaling cycle without touching
//! any infrastructure.

use async_trait::async_trait;
use tracing::info;

use tidepool_state::{EventMessage, ProviderKind, ScalingRequest};

use super::ClientProvider;
use crate::event::EventSender;

pub const NOTIFY_MESSAGE: &str = "successfully triggered log notification";

pub struct NoOpProvider {
    events: EventSender,
}

impl NoOpProvider {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }

    async fn notify(&self, req: &ScalingRequest) -> anyhow::Result<()> {
        info!(
            provider = %self.kind(),
            activity_id = %req.id,
            class = %req.class(),
            direction = %req.direction,
            target_node = req.target_node_id.as_deref().unwrap_or(""),
            "no-op log notification of scaling activity"
        );
        self.events
            .send(EventMessage::progress(req.id, self.kind().as_str(), NOTIFY_MESSAGE))
            .await;
        Ok(())
    }
}

#[async_trait]
impl ClientProvider for NoOpProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::NoOp
    }

    async fn scale_out(&self, req: &ScalingRequest) -> anyhow::Result<()> {
        self.notify(req).await
    }

    async fn scale_in(&self, req: &ScalingRequest, _target: &str) -> anyhow::Result<()> {
        self.notify(req).await
    }
}
