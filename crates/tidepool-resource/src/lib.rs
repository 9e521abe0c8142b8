//! tidepool resource tracker: per-class capacity from topology updates.
//!
//! The tracker is fed by watchers of the cluster scheduler rather than
//! queried on demand, so the control loop can read capacity without
//! touching the scheduler API.
//!
//! # Components
//!
//! - **`types`**: node and allocation snapshots from the watchers
//! - **`stats`**: allocatable/allocated arithmetic and percentages
//! - **`tracker`**: the shared [`ResourceTracker`] handle
//! - **`handler`**: channel dispatchers that apply updates concurrently

pub mod error;
pub mod handler;
pub mod stats;
pub mod tracker;
pub mod types;

pub use error::ResourceError;
pub use handler::{spawn_update_handlers, UpdateHandlers};
pub use stats::{calculate_allocated_percentage_stats, AllocatedStats, ResourceStats, Resources};
pub use tracker::{NodeRecord, ResourceTracker, DEFAULT_NODE_CLASS};
pub use types::*;
