//! Error types for resource tracker queries and updates.

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ResourceError {
    /// No nodes of the class are currently tracked.
    #[error("no nodes of class {0} found")]
    ClassNotFound(String),

    /// Allocatable CPU or memory is zero, so no percentage exists.
    #[error("no allocatable capacity to calculate against")]
    NoCapacity,

    /// An allocation references a node that is not tracked.
    #[error("allocation {alloc_id} placed on untracked node {node_id}")]
    UnknownNode { alloc_id: String, node_id: String },
}
