//! Storage contracts used by the control loop.

use std::collections::HashMap;
use std::time::Duration;

use uuid::Uuid;

use crate::activity::{ScalingActivity, ScalingRequest, ScalingUpdate};
use crate::error::StateResult;
use crate::types::Policy;

/// Terminal activities whose last update is older than this are removed
/// by garbage collection.
pub const GARBAGE_COLLECTION_THRESHOLD: Duration = Duration::from_secs(48 * 60 * 60);

/// Stores one scaling policy per node class.
pub trait PolicyBackend: Send + Sync {
    /// All stored policies keyed by class.
    fn get_policies(&self) -> StateResult<HashMap<String, Policy>>;

    /// The policy of `class`, or `None` when the class has none.
    fn get_policy(&self, class: &str) -> StateResult<Option<Policy>>;

    /// Validate and insert or replace the policy for its class.
    fn put_policy(&self, policy: &Policy) -> StateResult<()>;

    /// Remove the policy of `class`. Missing classes are a no-op.
    fn delete_policy(&self, class: &str) -> StateResult<()>;
}

/// Stores scaling activities and their event trails.
pub trait ActivityBackend: Send + Sync {
    /// Write the initial "started" record of a request.
    fn write_request(&self, req: &ScalingRequest) -> StateResult<()>;

    /// Append an event to a stored activity.
    fn write_request_event(&self, update: &ScalingUpdate) -> StateResult<()>;

    fn get_activity(&self, id: Uuid) -> StateResult<Option<ScalingActivity>>;

    fn get_activities(&self) -> StateResult<HashMap<Uuid, ScalingActivity>>;

    /// Remove terminal activities older than
    /// [`GARBAGE_COLLECTION_THRESHOLD`]. Returns the number removed.
    fn run_garbage_collection(&self) -> StateResult<usize>;
}

/// Whether `activity` is due for removal at time `now` (Unix nanoseconds).
pub(crate) fn is_collectable(activity: &ScalingActivity, now: i64) -> bool {
    let threshold = now - GARBAGE_COLLECTION_THRESHOLD.as_nanos() as i64;
    activity.status.is_terminal() && activity.last_update < threshold
}
