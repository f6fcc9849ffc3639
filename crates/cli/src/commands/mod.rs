//! CLI command implementations

pub mod aggregate;
pub mod alarm;
pub mod health;
pub mod ingest;
