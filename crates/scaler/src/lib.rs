//! Resource scaler service
//!
//! Dispatcher endpoint that turns each inbound log batch or alarm
//! notification into one invocation of the scaler library.

pub mod api;
pub mod config;
