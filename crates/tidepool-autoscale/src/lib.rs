//! tidepool-autoscale: policy-driven scaling decisions.
//!
//! Reads class utilisation from the resource tracker, evaluates each
//! enabled policy's checks and hands resulting requests to the scaler.
//!
//! # Decision Algorithm
//!
//! ```text
//! for each enabled check:
//!     actual = class cpu% or memory%
//!     greater-than: actual >  threshold → check.action
//!     less-than:    actual <  threshold → check.action
//!
//! any scale-out → Out
//! else any scale-in → In
//! else no action
//! ```
//!
//! Evaluation runs on a fixed interval over a bounded worker pool, with
//! at most one pass in flight.

pub mod autoscaler;
pub mod decision;

pub use autoscaler::{Autoscaler, AutoscalerConfig, MIN_INTERVAL};
pub use decision::{check_greater_than, check_less_than, evaluate};
