//! tidepool-scale: scaling orchestration.
//!
//! Turns an approved scaling request into provider calls and an audited
//! activity trail.
//!
//! # Architecture
//!
//! ```text
//! Scaler ──ok_to_scale──► precondition checks (policy, provider, counts)
//!    │
//!    └──invoke_scaling──► drain (ClusterClient) ──► ClientProvider
//!                │                 │                     │
//!                ▼                 ▼                     ▼
//!              EventSender ──► EventPipeline ──► ActivityBackend
//! ```
//!
//! Providers are registered once in a [`ProviderRegistry`]; the
//! AWS AutoScaling provider talks to the cloud through the
//! [`AutoScalingApi`] seam.

pub mod drain;
pub mod error;
pub mod event;
pub mod provider;
pub mod scaler;

pub use drain::{drain_node, ClusterClient, DRAIN_DEADLINE};
pub use error::ScaleError;
pub use event::{EventPipeline, EventSender, EVENT_CHANNEL_CAPACITY};
pub use provider::{
    AutoScalingApi, AutoScalingGroup, AwsAsgProvider, ClientProvider, NoOpProvider,
    ProviderRegistry,
};
pub use scaler::{Scale, Scaler, ScalerConfig, AWS_INSTANCE_ID_ATTRIBUTE};
