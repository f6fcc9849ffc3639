//! Scaling controller
//!
//! This module provides:
//! - Alarm notification parsing
//! - Sizing policy (step, ceiling, platform compatibility matrix)
//! - Bounded retry for external calls
//! - The describe → compute → register → rebind → adjust-alarm cycle
//!
//! Cycles for the same (cluster, service, container) never overlap inside
//! one process; across processes the rebind is a compare-and-swap on the
//! revision the cycle started from, so a stale cycle exits as superseded.

mod machine;
mod notification;
mod policy;
mod retry;


pub use machine::{AlarmUpdate, ScalingController, ScalingOutcome, ScalingReport, ScalingState};
pub use notification::{parse_notification, AlarmNotification, AlarmState};
pub use policy::{
    AlarmThresholdPolicy, CompatibilityMatrix, Platform, ScalingPolicy, SizingDecision, Step,
};
pub use retry::RetryPolicy;
