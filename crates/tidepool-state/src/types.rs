//! Scaling policy types.
//!
//! A [`Policy`] is the operator-authored document describing how one node
//! class scales: its size bounds, step counts, the provider that adds or
//! removes machines, and the checks evaluated against class utilisation.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{StateError, StateResult};

/// Provider config key naming the AutoScaling group of a class.
pub const ASG_NAME_CONFIG_KEY: &str = "asg-name";

/// Implements `Display` through the enum's `as_str()`.
macro_rules! display_as_str {
    ($($ty:ty),+ $(,)?) => {
        $(
            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.as_str())
                }
            }
        )+
    };
}

/// Backend responsible for adding and removing client nodes of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProviderKind {
    /// AWS AutoScaling groups.
    AwsAutoscaling,
    /// Logs the scaling activity and changes nothing.
    NoOp,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::AwsAutoscaling => "aws-autoscaling",
            ProviderKind::NoOp => "no-op",
        }
    }
}

/// Resource a policy check reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScaleResource {
    Cpu,
    Memory,
}

impl ScaleResource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleResource::Cpu => "cpu",
            ScaleResource::Memory => "memory",
        }
    }
}

/// How the observed value is compared to the check threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComparisonOperator {
    GreaterThan,
    LessThan,
}

impl ComparisonOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOperator::GreaterThan => "greater-than",
            ComparisonOperator::LessThan => "less-than",
        }
    }
}

/// Action taken when a check's comparison holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ComparisonAction {
    ScaleIn,
    ScaleOut,
}

impl ComparisonAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonAction::ScaleIn => "scale-in",
            ComparisonAction::ScaleOut => "scale-out",
        }
    }

    /// The scaling direction this action requests.
    pub fn direction(&self) -> ScaleDirection {
        match self {
            ComparisonAction::ScaleIn => ScaleDirection::In,
            ComparisonAction::ScaleOut => ScaleDirection::Out,
        }
    }
}

/// Direction of a scaling activity. "No action" is `Option::None`, never
/// a variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScaleDirection {
    /// Remove client nodes.
    In,
    /// Add client nodes.
    Out,
}

impl ScaleDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleDirection::In => "in",
            ScaleDirection::Out => "out",
        }
    }
}

/// Status of a scaling activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScaleStatus {
    Started,
    InProgress,
    Completed,
    Failed,
}

impl ScaleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScaleStatus::Started => "started",
            ScaleStatus::InProgress => "in-progress",
            ScaleStatus::Completed => "completed",
            ScaleStatus::Failed => "failed",
        }
    }

    /// Completed and failed activities receive no further events.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScaleStatus::Completed | ScaleStatus::Failed)
    }
}

display_as_str!(
    ProviderKind,
    ScaleResource,
    ComparisonOperator,
    ComparisonAction,
    ScaleDirection,
    ScaleStatus,
);

// ── Policy ────────────────────────────────────────────────────────

/// Scaling policy for one node class.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Policy {
    pub class: String,
    pub enabled: bool,
    pub min_count: u32,
    pub max_count: u32,
    pub scale_in_count: u32,
    pub scale_out_count: u32,
    pub provider: ProviderKind,
    #[serde(default)]
    pub provider_config: HashMap<String, String>,
    #[serde(default)]
    pub checks: HashMap<String, PolicyCheck>,
}

/// One check evaluated against the class utilisation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyCheck {
    pub enabled: bool,
    pub resource: ScaleResource,
    pub comparison_operator: ComparisonOperator,
    /// Threshold as a percentage of allocatable capacity.
    pub comparison_percentage: f64,
    pub action: ComparisonAction,
}

impl Policy {
    /// Reject policies the control loop cannot act on. Called before any
    /// backend persists a policy.
    pub fn validate(&self) -> StateResult<()> {
        if self.class.is_empty() {
            return Err(StateError::InvalidPolicy("class must not be empty".to_string()));
        }

        // Only single node scale-in is supported.
        if self.scale_in_count > 1 {
            return Err(StateError::InvalidPolicy(
                "scale_in_count greater than 1 is not supported".to_string(),
            ));
        }

        if self.min_count > self.max_count {
            return Err(StateError::InvalidPolicy(format!(
                "min_count {} exceeds max_count {}",
                self.min_count, self.max_count
            )));
        }

        if self.provider == ProviderKind::AwsAutoscaling
            && !self.provider_config.contains_key(ASG_NAME_CONFIG_KEY)
        {
            return Err(StateError::InvalidPolicy(format!(
                "provider config must include \"{ASG_NAME_CONFIG_KEY}\" for {}",
                self.provider
            )));
        }

        for (name, check) in &self.checks {
            let pct = check.comparison_percentage;
            if !pct.is_finite() || pct < 0.0 {
                return Err(StateError::InvalidPolicy(format!(
                    "check {name}: comparison_percentage must be a non-negative number, got {pct}"
                )));
            }
        }

        Ok(())
    }
}
