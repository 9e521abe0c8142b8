//! In-memory policy and activity backends.
//!
//! State is lost on restart. Used by default and throughout the tests.

use std::collections::HashMap;
use std::sync::RwLock;

use tracing::debug;
use uuid::Uuid;

use crate::activity::{event_timestamp, ScalingActivity, ScalingRequest, ScalingUpdate};
use crate::backend::{is_collectable, ActivityBackend, PolicyBackend};
use crate::error::{StateError, StateResult};
use crate::types::Policy;

/// Policies held in a map keyed by class.
#[derive(Default)]
pub struct MemoryPolicyBackend {
    policies: RwLock<HashMap<String, Policy>>,
}

impl MemoryPolicyBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PolicyBackend for MemoryPolicyBackend {
    fn get_policies(&self) -> StateResult<HashMap<String, Policy>> {
        let policies = self.policies.read().map_err(|_| StateError::Poisoned)?;
        Ok(policies.clone())
    }

    fn get_policy(&self, class: &str) -> StateResult<Option<Policy>> {
        let policies = self.policies.read().map_err(|_| StateError::Poisoned)?;
        Ok(policies.get(class).cloned())
    }

    fn put_policy(&self, policy: &Policy) -> StateResult<()> {
        policy.validate()?;
        let mut policies = self.policies.write().map_err(|_| StateError::Poisoned)?;
        policies.insert(policy.class.clone(), policy.clone());
        debug!(class = %policy.class, "policy stored");
        Ok(())
    }

    fn delete_policy(&self, class: &str) -> StateResult<()> {
        let mut policies = self.policies.write().map_err(|_| StateError::Poisoned)?;
        policies.remove(class);
        Ok(())
    }
}

/// Activities held in a map keyed by request ID.
#[derive(Default)]
pub struct MemoryActivityBackend {
    activities: RwLock<HashMap<Uuid, ScalingActivity>>,
}

impl MemoryActivityBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ActivityBackend for MemoryActivityBackend {
    fn write_request(&self, req: &ScalingRequest) -> StateResult<()> {
        let entry = ScalingActivity::started(req);
        let mut activities = self.activities.write().map_err(|_| StateError::Poisoned)?;
        activities.insert(req.id, entry);
        Ok(())
    }

    fn write_request_event(&self, update: &ScalingUpdate) -> StateResult<()> {
        let mut activities = self.activities.write().map_err(|_| StateError::Poisoned)?;
        let activity = activities
            .get_mut(&update.id)
            .ok_or_else(|| StateError::NotFound(update.id.to_string()))?;
        activity.apply(update);
        Ok(())
    }

    fn get_activity(&self, id: Uuid) -> StateResult<Option<ScalingActivity>> {
        let activities = self.activities.read().map_err(|_| StateError::Poisoned)?;
        Ok(activities.get(&id).cloned())
    }

    fn get_activities(&self) -> StateResult<HashMap<Uuid, ScalingActivity>> {
        let activities = self.activities.read().map_err(|_| StateError::Poisoned)?;
        Ok(activities.clone())
    }

    fn run_garbage_collection(&self) -> StateResult<usize> {
        let now = event_timestamp();
        let mut activities = self.activities.write().map_err(|_| StateError::Poisoned)?;
        let before = activities.len();
        activities.retain(|_, activity| !is_collectable(activity, now));
        let removed = before - activities.len();
        debug!(removed, "activity garbage collection finished");
        Ok(removed)
    }
}
