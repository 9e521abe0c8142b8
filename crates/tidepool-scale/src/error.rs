//! Scaling orchestrator errors.

use http::StatusCode;
use thiserror::Error;

use tidepool_state::ProviderKind;

/// Errors from precondition checks and scaling execution.
#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("scaling policy is currently disabled")]
    PolicyDisabled,

    #[error("scaling provider {0} not found in configuration")]
    ProviderNotFound(ProviderKind),

    #[error("no nodes found of client class {0}")]
    NoNodesInClass(String),

    #[error("scaling in activity would break policy minimum threshold")]
    MinCountBreached,

    #[error("scaling out activity would break policy maximum threshold")]
    MaxCountBreached,

    #[error("failed to discover least allocated node in class {0}")]
    NoTargetNode(String),

    #[error("aws instance-id not found within attributes")]
    InstanceIdNotFound,

    #[error("required provider config key {0} not found")]
    MissingProviderConfig(&'static str),

    #[error(transparent)]
    Provider(#[from] anyhow::Error),
}

impl ScaleError {
    /// HTTP status describing a failed precondition check.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ScaleError::PolicyDisabled
            | ScaleError::ProviderNotFound(_)
            | ScaleError::NoNodesInClass(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ScaleError::MinCountBreached | ScaleError::MaxCountBreached => {
                StatusCode::PRECONDITION_FAILED
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
