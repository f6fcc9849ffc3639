//! Resource scaler library
//!
//! This crate provides the core functionality for:
//! - Decoding and averaging container utilization log batches
//! - Publishing the averages to a metrics backend
//! - Scaling a service's task definition when its alarm fires
//! - Health checks and observability

pub mod backends;
pub mod controller;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod pipeline;

pub use error::{ScalerError, ScalerResult};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{ScalerMetrics, StructuredLogger};
