//! Scaling requests and the activity records they produce.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{Policy, ProviderKind, ScaleDirection, ScaleStatus};

/// Source of events emitted by tidepool itself. The pipeline treats an
/// event from this source as the closing record of an activity.
pub const SOURCE_TIDEPOOL: &str = "tidepool";

/// Source of events produced by interactions with the cluster scheduler.
pub const SOURCE_CLUSTER: &str = "cluster";

/// Message of the first event of every activity.
pub const START_MESSAGE: &str = "scaling activity has started";

/// A request to scale one node class in one direction.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingRequest {
    pub id: Uuid,
    pub direction: ScaleDirection,
    /// Node chosen for removal; only set while scaling in.
    pub target_node_id: Option<String>,
    pub policy: Policy,
}

impl ScalingRequest {
    /// Build a request with a fresh random identifier.
    pub fn new(policy: Policy, direction: ScaleDirection) -> Self {
        Self {
            id: Uuid::new_v4(),
            direction,
            target_node_id: None,
            policy,
        }
    }

    pub fn class(&self) -> &str {
        &self.policy.class
    }
}

/// One entry in an activity's event trail.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Unix timestamp in nanoseconds.
    pub timestamp: i64,
    pub message: String,
    pub source: String,
}

/// The stored record of a scaling activity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingActivity {
    pub events: Vec<Event>,
    pub direction: ScaleDirection,
    /// Unix nanoseconds of the latest event.
    pub last_update: i64,
    pub status: ScaleStatus,
    pub provider: ProviderKind,
    pub provider_config: HashMap<String, String>,
}

impl ScalingActivity {
    /// The initial "started" record for a request.
    pub fn started(req: &ScalingRequest) -> Self {
        let ts = event_timestamp();
        Self {
            events: vec![Event {
                timestamp: ts,
                message: START_MESSAGE.to_string(),
                source: SOURCE_TIDEPOOL.to_string(),
            }],
            direction: req.direction,
            last_update: ts,
            status: ScaleStatus::Started,
            provider: req.policy.provider,
            provider_config: req.policy.provider_config.clone(),
        }
    }

    /// Append an update's event and take over its status.
    pub fn apply(&mut self, update: &ScalingUpdate) {
        self.events.push(update.detail.clone());
        self.last_update = update.detail.timestamp;
        self.status = update.status;
    }
}

/// An append to an existing activity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingUpdate {
    pub id: Uuid,
    pub status: ScaleStatus,
    pub detail: Event,
}

/// Envelope produced by any component and consumed by the event pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMessage {
    pub id: Uuid,
    pub timestamp: i64,
    pub source: String,
    pub message: String,
    /// Terminal error; only meaningful on closing events.
    pub error: Option<String>,
}

impl EventMessage {
    /// A progress event from `source`.
    pub fn progress(id: Uuid, source: &str, message: impl Into<String>) -> Self {
        Self {
            id,
            timestamp: event_timestamp(),
            source: source.to_string(),
            message: message.into(),
            error: None,
        }
    }

    /// The closing event of an activity.
    pub fn closing(id: Uuid, error: Option<String>) -> Self {
        Self {
            id,
            timestamp: event_timestamp(),
            source: SOURCE_TIDEPOOL.to_string(),
            message: String::new(),
            error,
        }
    }

    pub fn is_closing(&self) -> bool {
        self.source == SOURCE_TIDEPOOL
    }
}

/// Current Unix time in nanoseconds.
pub fn event_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or_default()
}
