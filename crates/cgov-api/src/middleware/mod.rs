//! Tower middleware for the API layer.

pub mod metrics;
