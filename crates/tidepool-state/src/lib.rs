//! tidepool-state: scaling policies and activity records.
//!
//! Holds the domain types shared by every tidepool crate and the two
//! storage contracts the control loop talks to:
//!
//! - [`PolicyBackend`] stores one [`Policy`] per node class.
//! - [`ActivityBackend`] stores one [`ScalingActivity`] per scaling
//!   request, with its ordered event trail.
//!
//! # Backends
//!
//! ```text
//! MemoryPolicyBackend / MemoryActivityBackend
//!   └── HashMap behind a std RwLock (lost on restart)
//!
//! StateStore
//!   └── redb database, JSON values in `policies` / `activities` tables
//! ```
//!
//! Every backend is `Send + Sync` and shared as `Arc<dyn ...>`.

pub mod activity;
pub mod backend;
pub mod error;
pub mod memory;
pub mod store;
pub mod tables;
pub mod types;

pub use activity::*;
pub use backend::{ActivityBackend, PolicyBackend, GARBAGE_COLLECTION_THRESHOLD};
pub use error::{StateError, StateResult};
pub use memory::{MemoryActivityBackend, MemoryPolicyBackend};
pub use store::StateStore;
pub use types::*;
