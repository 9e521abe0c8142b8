//! Infrastructure providers that add and remove client machines.
//!
//! Each provider emits its own descriptive events through the pipeline;
//! the orchestrator only reports the final outcome.

pub mod asg;
pub mod noop;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use tidepool_state::{ProviderKind, ScalingRequest};

pub use asg::{AutoScalingApi, AutoScalingGroup, AwsAsgProvider};
pub use noop::NoOpProvider;

/// A backend able to change the number of client nodes of a class.
///
/// Callers have already run every safety check; implementations only talk
/// to the provider and record what happened.
#[async_trait]
pub trait ClientProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Add `scale_out_count` nodes to the class.
    async fn scale_out(&self, req: &ScalingRequest) -> anyhow::Result<()>;

    /// Remove the machine identified by `target`, in the provider's own
    /// naming.
    async fn scale_in(&self, req: &ScalingRequest, target: &str) -> anyhow::Result<()>;
}

/// Providers keyed by kind. Built once at startup, read-only afterwards.
#[derive(Default, Clone)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, Arc<dyn ClientProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `provider` under its own kind, replacing any previous one.
    pub fn with_provider(mut self, provider: Arc<dyn ClientProvider>) -> Self {
        self.providers.insert(provider.kind(), provider);
        self
    }

    pub fn get(&self, kind: ProviderKind) -> Option<Arc<dyn ClientProvider>> {
        self.providers.get(&kind).cloned()
    }

    pub fn contains(&self, kind: ProviderKind) -> bool {
        self.providers.contains_key(&kind)
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
